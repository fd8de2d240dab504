//! Shared types of the tether workspace: the transport and probe traits the
//! controller drives, request and policy configuration, lifecycle events and
//! the error taxonomy.

pub mod errors;
pub mod events;
pub mod ids;
pub mod policy;
pub mod probe;
pub mod request;
pub mod settings;
pub mod transport;

pub use errors::{ConfigError, ProbeError, TransportError};
pub use events::ConnectionEvent;
pub use ids::StreamId;
pub use policy::Policy;
pub use probe::{probe_fn, FnProbe, LivenessProbe};
pub use request::RequestOptions;
pub use transport::{BodyStream, Response, ResponseMeta, Transport};
