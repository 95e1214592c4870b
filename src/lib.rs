//! # methodwire
//!
//! Method router for transports that can only make one kind of call:
//! invoke a named method with a byte payload and get back a status and a
//! byte payload, under a hard size ceiling (127 KiB by default).
//!
//! ## Architecture
//!
//! - **Registry**: controllers list their handlers; names become
//!   case-insensitive, versioned method keys
//! - **Typed invokers**: decode the payload (JSON or MessagePack) into the
//!   handler's parameters and encode its result
//! - **Overload groups**: several handlers under one key, tried in order
//! - **Chunk transport**: the reserved `$chunk` method carries messages
//!   larger than one call, in both directions
//! - **Router**: normalizes names, enforces the ceiling and folds every
//!   outcome into a [`Response`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use methodwire::handler::{BoxError, Controller, MethodTable, Param};
//! use methodwire::{Router, StatusCode};
//!
//! struct Lights;
//!
//! impl Controller for Lights {
//!     fn version(&self) -> Option<&str> {
//!         Some("1")
//!     }
//!
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method_with_params(
//!             "DimAsync",
//!             [Param::new("room"), Param::new("level")],
//!             |_l: Arc<Lights>, (room, level): (String, u8)| async move {
//!                 Ok::<_, BoxError>(format!("{room} at {level}%"))
//!             },
//!         );
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> methodwire::Result<()> {
//! let router = Router::builder().controller(Lights)?.build()?;
//!
//! let response = router
//!     .invoke("dim_v1", Bytes::from_static(br#"{"Room":"hall","level":40}"#), "application/json")
//!     .await;
//! assert_eq!(response.status, StatusCode::OK);
//! assert_eq!(response.payload(), br#""hall at 40%""#);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod transport;

pub use codec::ContentType;
pub use config::RouterConfig;
pub use error::{MethodwireError, Result};
pub use protocol::{Response, StatusCode};
pub use router::{Router, RouterBuilder};
