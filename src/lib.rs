//! # Fieldpatch - Industrial telemetry to REST patch pipeline
//!
//! Collects device register updates from a factory line, stages them per
//! production step and pushes the result to a remote REST endpoint.
//!
//! ## Key Features
//!
//! - **Non-blocking ingress**: updates are batched by size and time, and
//!   batches are dropped rather than stalling the producer
//! - **Trigger-driven cases**: each configured trigger device selects a case
//!   that decides when a snapshot is complete
//! - **Session buckets**: snapshots accumulate per channel until the case
//!   flushes them as one document
//! - **Device write-back**: successful sends can be acknowledged on the PLC
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldpatch::{parse_triggers, CaseKind, Message, PayloadStore};
//!
//! let triggers = parse_triggers("D100, hold, d200, weight");
//! assert_eq!(triggers.len(), 2);
//! assert_eq!(triggers[0].device_key, "d100");
//! assert_eq!(triggers[1].case_kind, CaseKind::Weight);
//!
//! let store = PayloadStore::new();
//! store.apply(&[Message::new("D100", 1.0)]);
//! assert_eq!(store.get_f64("d100"), Some(1.0));
//! ```
//!
//! ## Modules
//!
//! - [`ingress`]: size/time batching with drop-on-full backpressure
//! - [`store`]: most-recent-value cache
//! - [`trigger`]: trigger configuration parsing
//! - [`engine`] and [`cases`]: per-batch case execution
//! - [`weight`]: per-channel weight workers
//! - [`session`]: accumulation state
//! - [`dispatch`]: bucket merge, null guard, sink delivery, write-back
//! - [`metrics`]: engine counters

// Modules
pub mod cases;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod message;
pub mod metrics;
pub mod session;
pub mod store;
pub mod transform;
pub mod trigger;
pub mod weight;

// Re-exports for convenient access
pub use config::{CaseSettings, EngineConfig, KeyTable, SinkMode, WriteBackConfig};
pub use device::DeviceAddress;
pub use dispatch::{DeviceWriter, Dispatcher, FlushOutcome, Sink, SinkResponse};
pub use engine::Engine;
pub use error::{
    AddressError, ConfigError, DeviceError, IngressError, PatchError, Result, SinkError,
};
pub use ingress::{BatchReceiver, Drain, FlushResult, IngressBuffer, IngressConfig};
pub use message::{Document, Message, Truthy, Value};
pub use metrics::{EngineSnapshot, EngineStats};
pub use session::{Session, SessionHandle, SessionStore};
pub use store::PayloadStore;
pub use trigger::{parse_triggers, CaseKind, TriggerKey};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
