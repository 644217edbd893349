//! # voltage_datacoll
//!
//! Telemetry acquisition gateway for industrial substations speaking
//! IEC 60870-5-104 toward remote terminal units.
//!
//! Each configured device runs an independent session task that owns the
//! TCP connection and the full protocol state machine: APCI/ASDU framing,
//! sequence-number discipline, k/w flow control, the T0..T3 timers, the
//! outstanding-command queue and the periodic interrogation scheduler.
//! Decoded measurements are resolved through the term/item configuration
//! and published into a shared keyed store with pub/sub notification;
//! operator `call`/`ctrl` requests travel the opposite way over the same
//! store.
//!
//! ## Pieces
//!
//! - [`types`] / [`codec`] / [`parser`] - the wire protocol
//! - [`session`] - the per-device session engine
//! - [`dispatch`] - decoded-point routing and publishing
//! - [`store`] - the keyed store collaborator (Redis or in-memory)
//! - [`supervisor`] - spawns/cancels sessions on configuration changes
//! - [`api`] - REST control surface bridging into the pub/sub channels
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voltage_datacoll::store::{RedisStore, Store};
//! use voltage_datacoll::supervisor::Supervisor;
//!
//! #[tokio::main]
//! async fn main() -> voltage_datacoll::Result<()> {
//!     let store: Arc<dyn Store> = Arc::new(RedisStore::connect("redis://127.0.0.1").await?);
//!     Supervisor::new(store).run().await
//! }
//! ```

pub mod api;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod types;

pub use codec::{Frame, Iec104Codec};
pub use error::{DatacollError, Result};
pub use parser::{parse_asdu, ParsedAsdu};
pub use supervisor::Supervisor;
