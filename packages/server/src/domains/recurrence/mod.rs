//! Recurring-task generation: recurrence expansion, durable job queue,
//! cancellation, exclusive-run leases, and the sync+async initial
//! generation pattern.

pub mod coordinator;
pub mod events;
pub mod expander;
pub mod job;
pub mod models;
pub mod scanner;
pub mod store;
pub mod worker;

pub use coordinator::{CancelOutcome, Coordinator, RetryConfig};
pub use job::{DeadLetterErrorType, DeadLetterJob, DeadLetterResolution, GenerationJob, GenerationJobStatus};
pub use models::{ExceptionType, RecurrenceConfig, RecurrencePattern, RecurringTemplate, RecurringTemplateException};
