// Recurring-Task Generation Coordinator
//
// The hard engineering core of a to-do service's recurring task system:
// recurrence expansion, a durable lease-claimed job queue, cooperative
// cancellation, exclusive-run leases, and optimistic-concurrency CRUD.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::Config;
