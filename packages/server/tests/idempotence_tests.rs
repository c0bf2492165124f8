mod common;

use common::TestHarness;
use coordinator_core::domains::recurrence::models::{NewTemplate, RecurrenceConfig};
use coordinator_core::domains::todo::store as todo_store;
use test_context::test_context;

// Running the sync+async initial generation pattern twice for the same
// template and window must not produce duplicate items: the partial unique
// index on (recurring_template_id, occurs_at) plus `ON CONFLICT DO NOTHING`
// make insertion idempotent.
#[test_context(TestHarness)]
#[tokio::test]
async fn expansion_is_idempotent_across_repeated_runs(ctx: &TestHarness) {
    let list = todo_store::insert_list(&ctx.db_pool, "idempotence list").await.unwrap();
    let template = ctx
        .coordinator
        .create_template(
            NewTemplate::builder()
                .list_id(list.id)
                .title("idempotence template".into())
                .recurrence_config(RecurrenceConfig::Daily { interval: 1 })
                .sync_horizon_days(7)
                .build(),
        )
        .await
        .unwrap();

    let count_after_create: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM todo_items WHERE recurring_template_id = $1",
    )
    .bind(template.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert!(count_after_create > 0, "initial sync window should have generated items");

    // Re-run the same generation window; no new rows should appear.
    ctx.coordinator
        .generate_initial(&template, template.created_at)
        .await
        .unwrap();

    let count_after_rerun: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM todo_items WHERE recurring_template_id = $1",
    )
    .bind(template.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();

    assert_eq!(count_after_create, count_after_rerun);
}

// Once an item has been detached from its template (`recurring_template_id`
// is NULL), further content edits must not try to detach it again or insert
// a second exception row.
#[test_context(TestHarness)]
#[tokio::test]
async fn editing_an_already_detached_item_does_not_re_detach(ctx: &TestHarness) {
    let list = todo_store::insert_list(&ctx.db_pool, "detach idempotence list").await.unwrap();
    let template = ctx
        .coordinator
        .create_template(
            NewTemplate::builder()
                .list_id(list.id)
                .title("detach idempotence template".into())
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
    let item_id = coordinator_core::common::TodoItemId::from(items.first().unwrap().0);

    let detached = todo_store::update_item(
        &ctx.db_pool,
        item_id,
        1,
        &["title"],
        &serde_json::json!({"title": "first edit"}),
    )
    .await
    .unwrap();
    assert!(detached.recurring_template_id.is_none());
    assert_eq!(detached.version, 2);

    let exceptions_after_first_edit = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM recurring_template_exceptions WHERE template_id = $1",
    )
    .bind(template.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(exceptions_after_first_edit, 1);

    // Edit it again: already detached, so this must not touch
    // recurring_template_exceptions a second time.
    let edited_again = todo_store::update_item(
        &ctx.db_pool,
        item_id,
        2,
        &["title"],
        &serde_json::json!({"title": "second edit"}),
    )
    .await
    .unwrap();
    assert!(edited_again.recurring_template_id.is_none());
    assert_eq!(edited_again.version, 3);
    assert_eq!(edited_again.title, "second edit");

    let exceptions_after_second_edit = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM recurring_template_exceptions WHERE template_id = $1",
    )
    .bind(template.id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(exceptions_after_second_edit, 1);
}
