//! Integration tests for the execution orchestrator.

mod test_utils;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use billing_sync::audit::{AuditContext, AuditLog, USER_SOURCE, with_audit_context};
use billing_sync::connectors::Connector;
use billing_sync::models::SyncRun;
use billing_sync::models::sync_run::SyncRunStatus;
use billing_sync::orchestrator::ErrorType;
use billing_sync::repositories::{ExchangeRateRepository, NewExchangeRate};
use sea_orm::{EntityTrait, PaginatorTrait};
use test_utils::{StubBehavior, StubConnector, fixing_date, harness};
use uuid::Uuid;

#[tokio::test]
async fn unknown_connector_is_not_found_and_creates_no_run() {
    let h = harness(vec![]).await.expect("harness");

    let result = h.orchestrator.execute("does_not_exist").await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::NotFound));
    assert_eq!(result.sync_run_id, None);
    assert_eq!(SyncRun::find().count(&h.db).await.unwrap(), 0);
}

#[tokio::test]
async fn disabled_connector_is_not_enabled_and_never_synced() {
    let stub = Arc::new(StubConnector::succeeding("stub"));
    let h = harness(vec![stub.clone()]).await.expect("harness");

    let result = h.orchestrator.execute("stub").await;
    assert_eq!(result.error_type, Some(ErrorType::NotEnabled));

    h.store.enable("stub").await.unwrap();
    h.store.disable("stub").await.unwrap();
    let result = h.orchestrator.execute("stub").await;
    assert_eq!(result.error_type, Some(ErrorType::NotEnabled));

    assert_eq!(stub.call_count(), 0);
    assert_eq!(SyncRun::find().count(&h.db).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_required_credentials_is_not_configured() {
    let stub = Arc::new(StubConnector::succeeding("secured").with_required_credentials());
    let h = harness(vec![stub.clone()]).await.expect("harness");
    h.store.enable("secured").await.unwrap();

    let result = h.orchestrator.execute("secured").await;
    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::NotConfigured));
    assert_eq!(SyncRun::find().count(&h.db).await.unwrap(), 0);

    h.store
        .merge_credentials(
            "secured",
            BTreeMap::from([("api_key".to_string(), "k-123".to_string())]),
        )
        .await
        .unwrap();
    let result = h.orchestrator.execute("secured").await;
    assert!(result.success);
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test]
async fn connector_without_required_credentials_runs_unconfigured() {
    let stub = Arc::new(StubConnector::succeeding("open"));
    let h = harness(vec![stub.clone()]).await.expect("harness");
    h.store.enable("open").await.unwrap();
    assert!(!h.store.is_configured("open").await.unwrap());

    let result = h.orchestrator.execute("open").await;

    assert!(result.success);
    assert_eq!(result.error_type, None);
    assert_eq!(stub.call_count(), 1);
}

#[tokio::test]
async fn successful_sync_completes_run_with_counts() {
    let stub = Arc::new(StubConnector::succeeding("stub"));
    let h = harness(vec![stub]).await.expect("harness");
    h.store.enable("stub").await.unwrap();

    let result = h.orchestrator.execute("STUB").await;

    assert!(result.success);
    assert_eq!(result.connector_name, "stub");
    assert_eq!(result.data, Some(serde_json::json!({ "stub": true })));
    let run_id = result.sync_run_id.expect("run recorded");

    let run = SyncRun::find_by_id(run_id)
        .one(&h.db)
        .await
        .unwrap()
        .expect("run exists");
    assert_eq!(run.status(), SyncRunStatus::Completed);
    assert_eq!(run.records_processed, 3);
    assert_eq!(run.records_created, 3);
    assert_eq!(run.records_updated, 0);
    assert!(run.completed_at.is_some());
    assert_eq!(run.error_message, None);
}

#[tokio::test]
async fn failing_sync_is_recorded_and_reported_without_error() {
    let stub = Arc::new(StubConnector::failing("flaky", "boom"));
    let h = harness(vec![stub]).await.expect("harness");
    h.store.enable("flaky").await.unwrap();

    let result = h.orchestrator.execute("flaky").await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::ExecutionError));
    assert_eq!(result.error.as_deref(), Some("boom"));
    let run_id = result.sync_run_id.expect("run recorded");

    let run = SyncRun::find_by_id(run_id)
        .one(&h.db)
        .await
        .unwrap()
        .expect("run exists");
    assert_eq!(run.status(), SyncRunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("boom"));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn panicking_sync_fails_the_run_without_unwinding() {
    let stub = Arc::new(StubConnector::new("panicky", StubBehavior::Panic));
    let h = harness(vec![stub]).await.expect("harness");
    h.store.enable("panicky").await.unwrap();

    let sentinel = AuditContext::new("sentinel", None);
    let result = with_audit_context(sentinel.clone(), async {
        let result = h.orchestrator.execute("panicky").await;
        assert_eq!(AuditContext::current(), sentinel);
        result
    })
    .await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::ExecutionError));
    let error = result.error.clone().expect("message");
    assert!(error.starts_with("connector panicked"), "unexpected error: {error}");

    let run = SyncRun::find_by_id(result.sync_run_id.expect("run recorded"))
        .one(&h.db)
        .await
        .unwrap()
        .expect("run exists");
    assert_eq!(run.status(), SyncRunStatus::Failed);
    assert_eq!(run.error_message, Some(error));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn bookkeeping_failure_after_start_fails_the_run_and_keeps_its_id() {
    let stub = Arc::new(StubConnector::new(
        "saboteur",
        StubBehavior::ExecuteSql(
            "CREATE TRIGGER reject_completion BEFORE UPDATE ON sync_runs \
             WHEN NEW.status = 'completed' \
             BEGIN SELECT RAISE(ABORT, 'completion rejected'); END"
                .to_string(),
        ),
    ));
    let h = harness(vec![stub]).await.expect("harness");
    h.store.enable("saboteur").await.unwrap();

    let result = h.orchestrator.execute("saboteur").await;

    assert_eq!(result.error_type, Some(ErrorType::ExecutionError));
    let error = result.error.clone().expect("message");
    assert!(error.contains("completion rejected"), "unexpected error: {error}");
    let run = SyncRun::find_by_id(result.sync_run_id.expect("run id reported"))
        .one(&h.db)
        .await
        .unwrap()
        .expect("run exists");
    assert_eq!(run.status(), SyncRunStatus::Failed);
    assert!(
        run.error_message
            .as_deref()
            .is_some_and(|message| message.contains("completion rejected"))
    );
}

#[tokio::test]
async fn audit_context_is_restored_after_success_and_failure() {
    let ok = Arc::new(StubConnector::succeeding("ok"));
    let bad = Arc::new(StubConnector::failing("bad", "boom"));
    let h = harness(vec![ok.clone(), bad.clone()]).await.expect("harness");
    h.store.enable("ok").await.unwrap();
    h.store.enable("bad").await.unwrap();

    let sentinel = AuditContext::new("sentinel", Some(Uuid::new_v4()));
    with_audit_context(sentinel.clone(), async {
        let result = h.orchestrator.execute("ok").await;
        assert!(result.success);
        assert_eq!(AuditContext::current(), sentinel);

        let result = h.orchestrator.execute("bad").await;
        assert!(!result.success);
        assert_eq!(AuditContext::current(), sentinel);
    })
    .await;

    assert_eq!(AuditContext::current(), AuditContext::user());

    let seen = ok.seen_contexts.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source(), "ok");
    assert!(seen[0].sync_run_id().is_some());
}

#[tokio::test]
async fn mutations_are_attributed_to_the_run_or_the_user() {
    let writer = Arc::new(StubConnector::new(
        "writer",
        StubBehavior::WriteRates(vec![25.0]),
    ));
    let h = harness(vec![writer]).await.expect("harness");
    h.store.enable("writer").await.unwrap();

    let result = h.orchestrator.execute("writer").await;
    assert!(result.success);
    let run_id = result.sync_run_id.expect("run recorded");

    let audit = AuditLog::new(h.db.clone());
    let run_entries = audit.entries_for_run(run_id).await.unwrap();
    assert_eq!(run_entries.len(), 1);
    assert_eq!(run_entries[0].source, "writer");
    assert_eq!(run_entries[0].action, "create");
    assert_eq!(run_entries[0].target_type, "ExchangeRate");

    let repository = ExchangeRateRepository::new(h.db.clone());
    repository
        .upsert(
            "manual",
            &NewExchangeRate {
                currency: "EUR".to_string(),
                rate_date: fixing_date(),
                amount: 1,
                rate: 24.9,
            },
        )
        .await
        .unwrap();

    let history = audit
        .history_for("ExchangeRate", &run_entries[0].target_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, "update");
    assert_eq!(history[1].source, USER_SOURCE);
    assert_eq!(history[1].sync_run_id, None);
}

#[tokio::test]
async fn writes_made_before_a_failure_keep_run_attribution() {
    let stub = Arc::new(StubConnector::new(
        "partial",
        StubBehavior::WriteThenFail("upstream went away".to_string()),
    ));
    let h = harness(vec![stub]).await.expect("harness");
    h.store.enable("partial").await.unwrap();

    let result = h.orchestrator.execute("partial").await;
    assert_eq!(result.error_type, Some(ErrorType::ExecutionError));
    let run_id = result.sync_run_id.expect("run recorded");

    let entries = AuditLog::new(h.db.clone())
        .entries_for_run(run_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, "partial");
}

#[tokio::test]
async fn rerunning_unchanged_data_creates_nothing() {
    let first = Arc::new(StubConnector::new(
        "rates",
        StubBehavior::WriteRates(vec![25.0]),
    ));
    let h = harness(vec![first]).await.expect("harness");
    h.store.enable("rates").await.unwrap();

    let first_run = h.orchestrator.execute("rates").await;
    let second_run = h.orchestrator.execute("rates").await;

    let runs = h.lifecycle.recorder();
    let first_row = runs
        .find(first_run.sync_run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let second_row = runs
        .find(second_run.sync_run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((first_row.records_created, first_row.records_updated), (1, 0));
    assert_eq!(
        (
            second_row.records_processed,
            second_row.records_created,
            second_row.records_updated
        ),
        (1, 0, 0)
    );
}

#[tokio::test]
async fn same_connector_executions_never_overlap() {
    let stub = Arc::new(StubConnector::new(
        "slow",
        StubBehavior::Sleep(Duration::from_millis(50)),
    ));
    let h = harness(vec![stub.clone()]).await.expect("harness");
    h.store.enable("slow").await.unwrap();

    let (a, b, c) = tokio::join!(
        h.orchestrator.execute("slow"),
        h.orchestrator.execute("slow"),
        h.orchestrator.execute("slow"),
    );

    assert!(a.success && b.success && c.success);
    assert_eq!(stub.call_count(), 3);
    assert_eq!(stub.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(SyncRun::find().count(&h.db).await.unwrap(), 3);
}

#[tokio::test]
async fn queued_execution_rechecks_enabled_state() {
    let stub = Arc::new(StubConnector::new(
        "slow",
        StubBehavior::Sleep(Duration::from_millis(200)),
    ));
    let h = harness(vec![stub.clone()]).await.expect("harness");
    h.store.enable("slow").await.unwrap();

    let (first, queued, _) = tokio::join!(
        h.orchestrator.execute("slow"),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.orchestrator.execute("slow").await
        },
        async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert_eq!(stub.active.load(Ordering::SeqCst), 1, "first sync still running");
            h.store.disable("slow").await.unwrap();
        },
    );

    assert!(first.success);
    assert_eq!(queued.error_type, Some(ErrorType::NotEnabled));
    assert_eq!(queued.sync_run_id, None);
    assert_eq!(stub.call_count(), 1);
    assert_eq!(SyncRun::find().count(&h.db).await.unwrap(), 1);
}

#[tokio::test]
async fn execute_all_runs_enabled_connectors_in_name_order() {
    let alpha = Arc::new(StubConnector::succeeding("alpha"));
    let beta = Arc::new(StubConnector::failing("beta", "boom"));
    let gamma = Arc::new(StubConnector::succeeding("gamma").with_required_credentials());
    let idle = Arc::new(StubConnector::succeeding("idle"));
    let connectors: Vec<Arc<dyn Connector>> =
        vec![gamma.clone(), beta.clone(), alpha.clone(), idle.clone()];
    let h = harness(connectors).await.expect("harness");

    for name in ["gamma", "beta", "alpha"] {
        h.store.enable(name).await.unwrap();
    }

    let summary = h.orchestrator.execute_all_with_summary().await;

    let names: Vec<&str> = summary
        .results
        .iter()
        .map(|r| r.connector_name.as_str())
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(idle.call_count(), 0);
    assert_eq!(gamma.call_count(), 0);
}

#[tokio::test]
async fn execute_all_reports_enabled_configuration_without_connector() {
    let h = harness(vec![]).await.expect("harness");
    h.store.enable("retired").await.unwrap();

    let results = h.orchestrator.execute_all().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error_type, Some(ErrorType::NotFound));
}
