//! Change tracking: records, publication, and derived-property dependency
//! discovery.

pub mod dependency;
pub mod record;
pub(crate) mod scope;
pub mod stream;

pub use record::{ChangeOrigin, ChangeRecord};
pub use stream::{ChangeStream, QueueSubscription};
