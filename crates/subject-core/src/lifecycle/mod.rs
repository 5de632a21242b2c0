//! Attach/detach dispatch and the lifecycle capabilities built on it.

pub mod derived_init;
pub mod dispatch;
pub mod hosted_service;

pub use derived_init::DerivedPropertyInitializer;
pub use dispatch::{LifecycleEvent, LifecycleHandler};
pub use hosted_service::{HostedService, HostedServiceHandler};
