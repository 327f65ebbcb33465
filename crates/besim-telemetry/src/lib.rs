//! Best-effort, append-only telemetry persistence: temperatures, web
//! traces, and unknown-traffic capture.

pub mod sidecar;

pub use sidecar::{Sidecar, TelemetryError, SCHEMA_VERSION};
