//! Connector runtime support: circuit breaker, backoff, liveness monitor,
//! the external-id registry, and read-after-write coalescing. None of these
//! talk to an actual wire protocol — concrete connectors (OPC UA, MQTT,
//! WebSocket, HTTP) are out of scope; this is the shared plumbing they'd
//! build on.

pub mod backoff;
pub mod circuit_breaker;
pub mod connector_registry;
pub mod monitor;
pub mod read_after_write;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::CircuitBreaker;
pub use connector_registry::ConnectorRegistry;
pub use monitor::{Connection, Monitor};
pub use read_after_write::ReadAfterWriteScheduler;
