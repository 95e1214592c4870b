//! Integration tests for methodwire.
//!
//! These drive a fully built router through its public entry points only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use methodwire::chunk::fragment;
use methodwire::client::ChunkedClient;
use methodwire::handler::{
    BoxError, Controller, Failure, FailureFilter, FilteredFailure, MethodTable, Param, CHUNK_METHOD,
};
use methodwire::protocol::{ChunkEnvelope, DEFAULT_MAX_MESSAGE_SIZE};
use methodwire::transport::LoopbackTransport;
use methodwire::{ContentType, MethodwireError, Router, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Controllers
// ============================================================================

#[derive(Default)]
struct Thermostat {
    writes: AtomicUsize,
    received: Mutex<Vec<usize>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Schedule {
    zone: String,
    slots: Vec<u16>,
}

impl Controller for Thermostat {
    fn version(&self) -> Option<&str> {
        Some("2")
    }

    fn methods(table: &mut MethodTable<Self>) {
        table.method_no_args("GetTemperatureAsync", |_t: Arc<Thermostat>| async move {
            Ok::<_, BoxError>(21.5)
        });
        table.method_with_params(
            "SetPoint",
            [
                Param::new("zone"),
                Param::new("celsius").default_value(json!(20.0)),
                Param::new("boost"),
            ],
            |t: Arc<Thermostat>, (zone, celsius, boost): (String, f64, bool)| async move {
                t.writes.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(json!({ "zone": zone, "celsius": celsius, "boost": boost }))
            },
        );
        table.method("Upload", |t: Arc<Thermostat>, schedule: Schedule| async move {
            t.received.lock().unwrap().push(schedule.slots.len());
            Ok::<_, BoxError>(schedule)
        });
        table.method("Padding", |_t: Arc<Thermostat>, n: usize| async move {
            Ok::<_, BoxError>("p".repeat(n))
        });
        table.method_no_args("Stall", |_t: Arc<Thermostat>| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, BoxError>(())
        });
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ByName {
    name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ById {
    id: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("no profile {0}")]
struct NoProfile(u32);

struct ProfilesByName;

impl Controller for ProfilesByName {
    fn methods(table: &mut MethodTable<Self>) {
        table.method("Select", |_p: Arc<ProfilesByName>, sel: ByName| async move {
            Ok::<_, BoxError>(format!("name:{}", sel.name))
        });
    }
}

struct ProfilesById;

impl Controller for ProfilesById {
    fn failure_filter(&self) -> Option<Arc<dyn FailureFilter>> {
        Some(Arc::new(|failure: &Failure| match failure.downcast_ref::<NoProfile>() {
            Some(e) => FilteredFailure::new(StatusCode::new(404), json!({ "missing": e.0 })),
            None => FilteredFailure::bad_request(failure),
        }))
    }

    fn methods(table: &mut MethodTable<Self>) {
        table.method("SelectAsync", |_p: Arc<ProfilesById>, sel: ById| async move {
            if sel.id > 10 {
                return Err(NoProfile(sel.id));
            }
            Ok(format!("id:{}", sel.id))
        });
    }
}

fn router_with(thermostat: Arc<Thermostat>) -> Router {
    init_tracing();
    Router::builder()
        .shared_controller(thermostat)
        .unwrap()
        .controller(ProfilesByName)
        .unwrap()
        .controller(ProfilesById)
        .unwrap()
        .handler_timeout(Duration::from_millis(50))
        .build()
        .unwrap()
}

fn router() -> Router {
    router_with(Arc::new(Thermostat::default()))
}

async fn call(router: &Router, method: &str, payload: &'static [u8]) -> methodwire::Response {
    router
        .invoke(method, Bytes::from_static(payload), "application/json")
        .await
}

// ============================================================================
// Lookup and typed invocation
// ============================================================================

#[tokio::test]
async fn test_lookup_after_register_any_casing() {
    let router = router();

    for name in ["gettemperature_v2", "GETTEMPERATURE_V2", "  GetTemperature_v2\t"] {
        let r = call(&router, name, b"").await;
        assert_eq!(r.status, StatusCode::OK, "method {:?}", name);
        assert_eq!(r.payload(), b"21.5");
    }

    // The unversioned name is not registered.
    assert_eq!(call(&router, "gettemperature", b"").await.status, StatusCode::NOT_SUPPORTED);
}

#[tokio::test]
async fn test_named_params_by_name_with_defaults() {
    let router = router();

    let r = call(&router, "setpoint_v2", br#"{"ZONE":"loft","Boost":true}"#).await;
    assert_eq!(r.status, StatusCode::OK);

    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body, json!({ "zone": "loft", "celsius": 20.0, "boost": true }));
}

#[tokio::test]
async fn test_named_params_empty_payload_uses_defaults() {
    let r = call(&router(), "setpoint_v2", b"").await;
    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body, json!({ "zone": "", "celsius": 20.0, "boost": false }));
}

#[tokio::test]
async fn test_pure_handler_idempotent() {
    let router = router();
    let payload = br#"{"zone":"hall","slots":[1,2,3]}"#;

    let first = call(&router, "upload_v2", payload).await;
    let second = call(&router, "upload_v2", payload).await;

    assert_eq!(first, second);
    let schedule: Schedule = serde_json::from_slice(first.payload()).unwrap();
    assert_eq!(schedule.slots, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_msgpack_payloads() {
    let router = router();
    let schedule = Schedule {
        zone: "cellar".into(),
        slots: vec![7, 8],
    };
    let payload = ContentType::MsgPack.encode(&schedule).unwrap();

    let r = router
        .invoke("Upload_V2", Bytes::from(payload), "application/msgpack; charset=binary")
        .await;

    assert_eq!(r.status, StatusCode::OK);
    let echoed: Schedule = ContentType::MsgPack.decode(r.payload()).unwrap();
    assert_eq!(echoed, schedule);
}

#[tokio::test]
async fn test_handler_timeout_is_filtered() {
    let r = call(&router(), "stall_v2", b"").await;

    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body["error"], "cancelled");
}

// ============================================================================
// Size ceiling
// ============================================================================

#[tokio::test]
async fn test_result_exactly_at_ceiling() {
    let router = router();
    // Quotes add two bytes.
    let n = DEFAULT_MAX_MESSAGE_SIZE - 2;

    let r = router
        .invoke("padding_v2", Bytes::from(n.to_string()), "application/json")
        .await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.payload_len(), DEFAULT_MAX_MESSAGE_SIZE);

    let r = router
        .invoke("padding_v2", Bytes::from((n + 1).to_string()), "application/json")
        .await;
    assert_eq!(r.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(r.payload.is_none());
}

#[tokio::test]
async fn test_request_above_ceiling_rejected() {
    let router = router();
    let payload = Bytes::from(vec![b' '; DEFAULT_MAX_MESSAGE_SIZE + 1]);

    let r = router.invoke("upload_v2", payload, "application/json").await;
    assert_eq!(r.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(r.payload.is_none());
}

// ============================================================================
// Overloads
// ============================================================================

#[tokio::test]
async fn test_overload_fallthrough() {
    let router = router();

    let r = call(&router, "select", br#"{"name":"eco"}"#).await;
    assert_eq!(r.payload(), br#""name:eco""#);

    let r = call(&router, "select", br#"{"id":3}"#).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.payload(), br#""id:3""#);
}

#[tokio::test]
async fn test_overload_surfaces_last_failure() {
    let router = router();

    let r = call(&router, "select", br#"{"id":42}"#).await;
    assert_eq!(r.status.as_u16(), 404);
    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body, json!({ "missing": 42 }));

    // Neither candidate accepts this; the second candidate's decode failure wins.
    let r = call(&router, "select", br#"{"colour":"red"}"#).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body["error"], "decode");
}

// ============================================================================
// Unknown methods and registration
// ============================================================================

#[tokio::test]
async fn test_unknown_method_has_no_side_effects() {
    let thermostat = Arc::new(Thermostat::default());
    let router = router_with(thermostat.clone());

    let r = call(&router, "doesnotexist", br#"{"zone":"x"}"#).await;

    assert_eq!(r.status, StatusCode::NOT_SUPPORTED);
    assert!(r.payload.is_none());
    assert_eq!(thermostat.writes.load(Ordering::SeqCst), 0);
    assert_eq!(router.active_sessions(), 0);
}

#[test]
fn test_reserved_method_cannot_be_registered() {
    struct Sneaky;

    impl Controller for Sneaky {
        fn methods(table: &mut MethodTable<Self>) {
            table.method_no_args("$chunkAsync", |_s: Arc<Sneaky>| async move {
                Ok::<_, BoxError>(())
            });
        }
    }

    let err = Router::builder().controller(Sneaky).err().unwrap();
    assert!(matches!(err, MethodwireError::ReservedMethod(_)));
}

#[test]
fn test_registry_lists_keys() {
    let router = router();
    let keys: Vec<_> = router.registry().method_keys().map(|k| k.as_str()).collect();

    assert_eq!(keys[0], CHUNK_METHOD);
    assert!(keys.contains(&"setpoint_v2"));
    assert!(keys.contains(&"select"));
    assert_eq!(router.registry().lookup("SELECT").unwrap().candidates(), 2);
}

// ============================================================================
// Chunk transport
// ============================================================================

fn envelopes(handle: u64, method: &str, payload: &[u8], max: usize) -> Vec<Bytes> {
    fragment(handle, method, ContentType::Json, &Bytes::copy_from_slice(payload), max)
        .unwrap()
        .iter()
        .map(|e| e.encode().unwrap())
        .collect()
}

fn upload_payload(slots: usize) -> Vec<u8> {
    let schedule = Schedule {
        zone: "greenhouse".into(),
        slots: (0..slots).map(|i| (i % 1000) as u16).collect(),
    };
    serde_json::to_vec(&schedule).unwrap()
}

#[tokio::test]
async fn test_chunked_request_reenters_dispatch() {
    let thermostat = Arc::new(Thermostat::default());
    let router = router_with(thermostat.clone());
    let payload = upload_payload(100);
    let chunks = envelopes(11, "Upload_v2", &payload, 128);
    assert!(chunks.len() > 3);

    let (last, init) = chunks.split_last().unwrap();
    for chunk in init {
        let r = router.invoke(CHUNK_METHOD, chunk.clone(), "").await;
        assert_eq!(r.status, StatusCode::ACCEPTED);
        assert!(r.payload.is_none());
    }
    assert_eq!(thermostat.received.lock().unwrap().len(), 0);

    let r = router.invoke(CHUNK_METHOD, last.clone(), "").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(*thermostat.received.lock().unwrap(), vec![100]);

    let reply = ChunkEnvelope::decode(r.payload()).unwrap();
    assert_eq!(reply.handle, 11);
    assert!(reply.is_last());
    assert_eq!(reply.method, "Upload_v2");
    assert_eq!(reply.fragment, Bytes::from(payload));
}

#[tokio::test]
async fn test_out_of_order_chunk_only_aborts_its_handle() {
    let thermostat = Arc::new(Thermostat::default());
    let router = router_with(thermostat.clone());
    let payload = upload_payload(50);
    let a = envelopes(1, "upload_v2", &payload, 96);
    let b = envelopes(2, "upload_v2", &payload, 96);

    router.invoke(CHUNK_METHOD, a[0].clone(), "").await;
    router.invoke(CHUNK_METHOD, b[0].clone(), "").await;

    // Skip a[1].
    let r = router.invoke(CHUNK_METHOD, a[2].clone(), "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(r.payload()).unwrap();
    assert_eq!(body["error"], "protocol");

    for chunk in &b[1..] {
        router.invoke(CHUNK_METHOD, chunk.clone(), "").await;
    }
    assert_eq!(*thermostat.received.lock().unwrap(), vec![50]);
    assert_eq!(router.active_sessions(), 0);
}

#[tokio::test]
async fn test_chunk_for_unknown_handle() {
    let router = router();
    let chunk = ChunkEnvelope::new(77, 4, true, "upload_v2", ContentType::Json, Bytes::new());

    let r = router.invoke(CHUNK_METHOD, chunk.encode().unwrap(), "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chunked_call_to_unknown_method() {
    let router = router();
    let chunk = envelopes(5, "doesnotexist", b"{}", 1024).remove(0);

    let r = router.invoke(CHUNK_METHOD, chunk, "").await;
    assert_eq!(r.status, StatusCode::NOT_SUPPORTED);
    assert!(r.payload.is_none());
}

#[tokio::test]
async fn test_client_round_trip_above_ceiling() {
    let thermostat = Arc::new(Thermostat::default());
    let router = router_with(thermostat.clone());
    let client = ChunkedClient::new(LoopbackTransport::new(router.clone()));

    let schedule = Schedule {
        zone: "warehouse".into(),
        slots: (0..60_000).map(|i| (i % 60_000) as u16).collect(),
    };
    let echoed: Schedule = client.call_json("upload_v2", &schedule).await.unwrap();

    assert_eq!(echoed, schedule);
    assert_eq!(*thermostat.received.lock().unwrap(), vec![60_000]);
    assert_eq!(router.active_sessions(), 0);
}

#[tokio::test]
async fn test_client_reports_status() {
    let client = ChunkedClient::new(LoopbackTransport::new(router()));

    let err = client.call("nothing", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, MethodwireError::Status { status: 501, payload: None }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chunked_clients() {
    let thermostat = Arc::new(Thermostat::default());
    let router = router_with(thermostat.clone());
    let client = Arc::new(
        ChunkedClient::new(LoopbackTransport::new(router.clone())).with_max_message_size(512),
    );

    let tasks: Vec<_> = (1..=8usize)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                let schedule = Schedule {
                    zone: format!("zone-{n}"),
                    slots: vec![n as u16; n * 100],
                };
                let payload = Bytes::from(serde_json::to_vec(&schedule).unwrap());
                let reply = client.call_chunked("upload_v2", payload).await.unwrap();
                let echoed: Schedule = serde_json::from_slice(&reply).unwrap();
                assert_eq!(echoed, schedule);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    let mut received = thermostat.received.lock().unwrap().clone();
    received.sort_unstable();
    assert_eq!(received, (1..=8).map(|n| n * 100).collect::<Vec<_>>());
    assert_eq!(router.active_sessions(), 0);
}
