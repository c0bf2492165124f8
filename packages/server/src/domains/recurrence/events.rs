//! Job lifecycle events, published internally for logging/observability.
//! Not a durable log — purely an in-process fan-out for the ambient
//! tracing/metrics layer to hook into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{JobId, TemplateId};

use super::job::DeadLetterErrorType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Scheduled {
        job_id: JobId,
        template_id: TemplateId,
        scheduled_for: DateTime<Utc>,
    },
    Ready {
        job_id: JobId,
    },
    Started {
        job_id: JobId,
        worker_id: String,
    },
    Succeeded {
        job_id: JobId,
        items_inserted: i64,
    },
    Failed {
        job_id: JobId,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    },
    DeadLettered {
        job_id: JobId,
        error_type: DeadLetterErrorType,
    },
    Cancelled {
        job_id: JobId,
    },
    LeaseRecovered {
        job_id: JobId,
        previous_worker_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_for_every_variant() {
        let events = vec![
            JobEvent::Scheduled {
                job_id: JobId::new(),
                template_id: TemplateId::new(),
                scheduled_for: Utc::now(),
            },
            JobEvent::Ready { job_id: JobId::new() },
            JobEvent::Started {
                job_id: JobId::new(),
                worker_id: "w1".into(),
            },
            JobEvent::Succeeded {
                job_id: JobId::new(),
                items_inserted: 3,
            },
            JobEvent::Failed {
                job_id: JobId::new(),
                retry_count: 2,
                next_attempt_at: Utc::now(),
            },
            JobEvent::DeadLettered {
                job_id: JobId::new(),
                error_type: DeadLetterErrorType::Exhausted,
            },
            JobEvent::Cancelled { job_id: JobId::new() },
            JobEvent::LeaseRecovered {
                job_id: JobId::new(),
                previous_worker_id: "w1".into(),
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: JobEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event, back);
        }
    }
}
