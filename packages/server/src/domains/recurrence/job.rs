//! Generation job and dead-letter row models.
//!
//! A `GenerationJob` is one unit of recurrence-expansion work: "expand template
//! T for the window [generate_from, generate_until)". Jobs move through a small
//! state machine (see `GenerationJobStatus`) enforced by the coordinator, never
//! by the rows themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{JobId, TemplateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationJobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Discarded,
    Cancelling,
    Cancelled,
}

impl GenerationJobStatus {
    /// Jobs a caller may ask to cancel without first claiming them.
    pub fn is_cancellable_without_claim(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Discarded | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub template_id: TemplateId,
    pub scheduled_for: DateTime<Utc>,
    pub status: GenerationJobStatus,
    pub generate_from: DateTime<Utc>,
    pub generate_until: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterErrorType {
    Permanent,
    Exhausted,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterResolution {
    Retried,
    Discarded,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: crate::common::DeadLetterId,
    pub original_job_id: JobId,
    pub template_id: TemplateId,
    pub generate_from: DateTime<Utc>,
    pub generate_until: DateTime<Utc>,
    pub error_type: DeadLetterErrorType,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub retry_count: i32,
    pub last_worker_id: String,
    pub failed_at: DateTime<Utc>,
    pub original_scheduled_for: DateTime<Utc>,
    pub original_created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub resolution: Option<DeadLetterResolution>,
    pub reviewer_note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_scheduled_are_cancellable_without_claim() {
        assert!(GenerationJobStatus::Pending.is_cancellable_without_claim());
        assert!(GenerationJobStatus::Scheduled.is_cancellable_without_claim());
        assert!(!GenerationJobStatus::Running.is_cancellable_without_claim());
    }

    #[test]
    fn terminal_statuses() {
        assert!(GenerationJobStatus::Completed.is_terminal());
        assert!(GenerationJobStatus::Discarded.is_terminal());
        assert!(GenerationJobStatus::Cancelled.is_terminal());
        assert!(!GenerationJobStatus::Cancelling.is_terminal());
        assert!(!GenerationJobStatus::Running.is_terminal());
    }
}
