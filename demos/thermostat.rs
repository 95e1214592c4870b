//! Thermostat - a device controller served through the router.
//!
//! This example demonstrates:
//! - Declaring a versioned controller with whole-payload and named parameters
//! - A controller-wide failure filter mapping a domain error to a status
//! - Calling the router in-process, including a schedule far larger than
//!   one transport call
//!
//! Run with `RUST_LOG=methodwire=debug` to watch chunk sessions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use methodwire::client::ChunkedClient;
use methodwire::handler::{
    BoxError, Controller, Failure, FailureFilter, FilteredFailure, MethodTable, Param,
};
use methodwire::transport::LoopbackTransport;
use methodwire::{Router, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// One heating slot in a weekly schedule.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Slot {
    minute_of_week: u16,
    celsius: f32,
}

#[derive(Debug, thiserror::Error)]
#[error("{0} C is outside the safe range")]
struct OutOfRange(f64);

struct Thermostat {
    setpoint: Mutex<f64>,
    schedule: Mutex<Vec<Slot>>,
}

impl Controller for Thermostat {
    fn version(&self) -> Option<&str> {
        Some("1")
    }

    fn failure_filter(&self) -> Option<Arc<dyn FailureFilter>> {
        Some(Arc::new(|failure: &Failure| match failure.downcast_ref::<OutOfRange>() {
            Some(e) => FilteredFailure::new(StatusCode::new(422), json!({ "rejected": e.0 })),
            None => FilteredFailure::bad_request(failure),
        }))
    }

    fn methods(table: &mut MethodTable<Self>) {
        table.method_no_args("GetSetpointAsync", |t: Arc<Thermostat>| async move {
            Ok::<_, BoxError>(*t.setpoint.lock().map_err(|e| e.to_string())?)
        });

        table.method_with_params(
            "SetSetpoint",
            [Param::new("celsius"), Param::new("hold_minutes").default_value(json!(60))],
            |t: Arc<Thermostat>, (celsius, hold): (f64, u32)| async move {
                if !(5.0..=30.0).contains(&celsius) {
                    return Err(BoxError::from(OutOfRange(celsius)));
                }
                *t.setpoint.lock().map_err(|e| e.to_string())? = celsius;
                Ok(json!({ "celsius": celsius, "hold_minutes": hold }))
            },
        );

        table.method("UploadSchedule", |t: Arc<Thermostat>, slots: Vec<Slot>| async move {
            let count = slots.len();
            *t.schedule.lock().map_err(|e| e.to_string())? = slots;
            Ok::<_, BoxError>(count)
        });

        table.method_no_args("DownloadSchedule", |t: Arc<Thermostat>| async move {
            let slots = t.schedule.lock().map_err(|e| e.to_string())?.clone();
            Ok::<_, BoxError>(slots)
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("methodwire=info")),
        )
        .init();

    let thermostat = Arc::new(Thermostat {
        setpoint: Mutex::new(19.0),
        schedule: Mutex::new(Vec::new()),
    });

    let router = Router::builder()
        .shared_controller(thermostat)?
        .handler_timeout(Duration::from_secs(2))
        .reaper_interval(Duration::from_secs(10))
        .build()?;
    let _reaper = router.spawn_session_reaper();

    // Direct calls through the router.
    let r = router
        .invoke("setsetpoint_v1", Bytes::from_static(br#"{"Celsius": 21.5}"#), "application/json")
        .await;
    println!("SetSetpoint -> {} {}", r.status, String::from_utf8_lossy(r.payload()));

    let r = router
        .invoke("SetSetpoint_v1", Bytes::from_static(br#"{"celsius": 45}"#), "application/json")
        .await;
    println!("SetSetpoint(45) -> {} {}", r.status, String::from_utf8_lossy(r.payload()));

    let r = router.invoke("reboot", Bytes::new(), "application/json").await;
    println!("reboot -> {}", r.status);

    // A schedule of ~10k slots is several hundred KB of JSON.
    let client = ChunkedClient::new(LoopbackTransport::new(router.clone()));
    let schedule: Vec<Slot> = (0..10_080)
        .map(|minute| Slot {
            minute_of_week: minute,
            celsius: 17.0 + (minute % 1440) as f32 / 360.0,
        })
        .collect();

    let stored: usize = client.call_json("uploadschedule_v1", &schedule).await?;
    println!("UploadSchedule -> stored {} slots", stored);

    let downloaded: Vec<Slot> = client.call_json("downloadschedule_v1", &()).await?;
    println!(
        "DownloadSchedule -> {} slots, {} sessions left open",
        downloaded.len(),
        router.active_sessions()
    );

    Ok(())
}
