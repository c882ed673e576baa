//! Correlation and batch reassembly for one long-lived fetcher worker.
//!
//! The worker speaks newline-delimited JSON over stdin/stdout and reports
//! some failures only as free text on stderr. [`Bridge`] multiplexes
//! concurrent commands over it and resolves each exactly once.

pub mod bridge;
pub mod config;
pub mod error;

// Re-export the engine surface used by hosts and tests
pub use bridge::{
    Ack, AttributionPolicy, Bridge, ErrorClassifier, FetchResult, Followee, LoginOutcome,
    RequestId, WorkerState,
};
pub use config::{BridgeSettings, load_settings};
pub use error::{BridgeError, BridgeResult};
