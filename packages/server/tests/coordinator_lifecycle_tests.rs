mod common;

use chrono::{Duration, Utc};
use common::TestHarness;
use coordinator_core::domains::recurrence::coordinator::RetryConfig;
use coordinator_core::domains::recurrence::models::{NewTemplate, RecurrenceConfig};
use coordinator_core::domains::todo::store as todo_store;
use test_context::test_context;

fn retry_config() -> RetryConfig {
    RetryConfig { max_retries: 3, base_backoff_ms: 10, max_backoff_secs: 1 }
}

// S4: a job with max_retries=3 fails four times and lands in the dead letter.
#[test_context(TestHarness)]
#[tokio::test]
async fn s4_exhaustion_moves_job_to_dead_letter(ctx: &TestHarness) {
    let list = todo_store::insert_list(&ctx.db_pool, "S4 list").await.unwrap();
    let template = ctx
        .coordinator
        .create_template(
            NewTemplate::builder()
                .list_id(list.id)
                .title("S4 template".into())
                .recurrence_config(RecurrenceConfig::Daily { interval: 1 })
                .build(),
        )
        .await
        .unwrap();

    let worker_id = "s4-worker";
    let mut job = ctx
        .coordinator
        .claim_next(worker_id, Duration::seconds(30))
        .await
        .unwrap();

    // The sync-window generation already claimed/consumed the initial job via
    // the async enqueue path; if none is runnable yet, enqueue one directly.
    if job.is_none() {
        ctx.coordinator
            .enqueue(template.id, Utc::now(), Utc::now(), Utc::now() + Duration::days(1))
            .await
            .unwrap();
        job = ctx.coordinator.claim_next(worker_id, Duration::seconds(30)).await.unwrap();
    }
    let job = job.expect("a job should be claimable");

    let mut will_retry = true;
    let mut attempts = 0;
    let mut current = job.clone();
    while will_retry && attempts < 10 {
        will_retry = ctx
            .coordinator
            .fail(&current, worker_id, "simulated transient failure", retry_config())
            .await
            .unwrap();
        attempts += 1;

        if will_retry {
            // base_backoff_ms=10 with max_backoff_secs=1 keeps every delay
            // well under this sleep, so the retried row is always runnable.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            current = ctx
                .coordinator
                .claim_next(worker_id, Duration::seconds(30))
                .await
                .unwrap()
                .expect("retried job should become claimable again");
        }
    }

    assert!(attempts <= 4, "job should exhaust retries within max_retries + 1 attempts");

    let dead_letters = ctx.coordinator.list_dead_letter(10).await.unwrap();
    assert!(dead_letters.iter().any(|dl| dl.original_job_id == job.id));
}

// S5: editing a content field of a generated item detaches it and records an
// `edited` exception.
#[test_context(TestHarness)]
#[tokio::test]
async fn s5_edit_detach(ctx: &TestHarness) {
    let list = todo_store::insert_list(&ctx.db_pool, "S5 list").await.unwrap();
    let template = ctx
        .coordinator
        .create_template(
            NewTemplate::builder()
                .list_id(list.id)
                .title("S5 template".into())
                .recurrence_config(RecurrenceConfig::Daily { interval: 1 })
                .sync_horizon_days(3)
                .build(),
        )
        .await
        .unwrap();

    let items: Vec<(uuid::Uuid,)> = sqlx::query_as(
        "SELECT id FROM todo_items WHERE recurring_template_id = $1 ORDER BY occurs_at LIMIT 1",
    )
    .bind(template.id)
    .fetch_all(&ctx.db_pool)
    .await
    .unwrap();
    let item_id = items.first().expect("sync window should have generated an item").0;
    let item_id = coordinator_core::common::TodoItemId::from(item_id);

    let item = todo_store::find_item(&ctx.db_pool, item_id).await.unwrap();
    assert_eq!(item.version, 1);

    let updated = todo_store::update_item(
        &ctx.db_pool,
        item_id,
        1,
        &["title"],
        &serde_json::json!({"title": "New title"}),
    )
    .await
    .unwrap();

    assert!(updated.recurring_template_id.is_none());
    assert_eq!(updated.version, 2);

    let exceptions = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM recurring_template_exceptions WHERE template_id = $1 AND exception_type = 'edited'",
    )
    .bind(template.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(exceptions, 1);
}

// Version conflict: updating with a stale expected version is rejected and
// leaves the stored row untouched.
#[test_context(TestHarness)]
#[tokio::test]
async fn version_conflict_on_stale_update(ctx: &TestHarness) {
    let list = todo_store::insert_list(&ctx.db_pool, "conflict list").await.unwrap();
    let template = ctx
        .coordinator
        .create_template(
            NewTemplate::builder()
                .list_id(list.id)
                .title("conflict template".into())
                .recurrence_config(RecurrenceConfig::Daily { interval: 1 })
                .build(),
        )
        .await
        .unwrap();

    let items: Vec<(uuid::Uuid,)> =
        sqlx::query_as("SELECT id FROM todo_items WHERE recurring_template_id = $1 LIMIT 1")
            .bind(template.id)
            .fetch_all(&ctx.db_pool)
            .await
            .unwrap();
    let item_id = coordinator_core::common::TodoItemId::from(items[0].0);

    let result = todo_store::update_item(
        &ctx.db_pool,
        item_id,
        99,
        &["title"],
        &serde_json::json!({"title": "won't apply"}),
    )
    .await;

    assert!(matches!(
        result,
        Err(coordinator_core::common::CoordinatorError::VersionConflict { .. })
    ));
}
