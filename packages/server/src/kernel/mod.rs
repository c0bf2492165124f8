//! Process-wide infrastructure: the background-service host the worker pool
//! and scanner run under.

pub mod service_host;

pub use service_host::{Service, ServiceHost};
