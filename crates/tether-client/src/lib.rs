//! A streaming HTTP request that heals itself: reconnects on close, error
//! and stalled data, optionally gated by a liveness probe.

mod keepalive;
mod scheduler;

pub mod controller;
pub mod http;
pub mod mock;
pub mod stats;

pub use controller::{Chunk, DataStream, Lifecycle, PersistentStream, PersistentStreamBuilder};
pub use http::{HttpProbe, HttpTransport};
pub use stats::ConnectionStats;

pub use tether_core::{
    probe_fn, BodyStream, ConfigError, ConnectionEvent, LivenessProbe, Policy, ProbeError,
    RequestOptions, Response, ResponseMeta, StreamId, Transport, TransportError,
};
pub use tether_telemetry::{debugging_enabled, enable_debugging};
