//! S2: a task whose first attempts fail with a retryable driver error
//! eventually succeeds, and the event stream shows the retries.

mod engine_support;

use std::time::Duration;

use engine_support::{build_harness_with_config, seed_execution, task, workflow_definition, Scripted};
use browserflow::driver::{ActionResult, DriverError};
use browserflow::engine::EngineConfig;
use browserflow::model::{EventKind, ExecutionStatus, OnError};
use browserflow::store::Store;

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let harness = build_harness_with_config(EngineConfig {
        global_parallelism: 4,
        parallelism_per_execution: 4,
        retry_base_ms: 10,
        retry_cap_ms: 50,
        ..EngineConfig::default()
    })
    .await;

    harness
        .driver
        .script(
            "navigate:https://example.com/fetch",
            vec![
                Scripted::Err(DriverError::Navigation("dns hiccup".to_string())),
                Scripted::Err(DriverError::Navigation("dns hiccup again".to_string())),
                Scripted::Ok(ActionResult::text("url", "https://example.com/fetch")),
            ],
        )
        .await;

    let mut spec = task("fetch", &[]);
    spec.retry_count = Some(3);
    let definition = workflow_definition(vec![spec], OnError::Stop);
    let (workflow, execution) = seed_execution(&harness.store, definition).await;
    let execution_id = execution.id;

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();
    harness.engine.submit(workflow, execution);

    let mut retry_count = 0;
    loop {
        match tokio::time::timeout(Duration::from_secs(10), sub.next())
            .await
            .expect("subscription timed out")
        {
            Some(Ok(event)) => {
                if event.kind == EventKind::TaskRetrying {
                    retry_count += 1;
                }
                if event.kind.is_execution_terminal() {
                    break;
                }
            }
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => break,
        }
    }

    assert_eq!(retry_count, 2);
    let snapshot = harness.store.load_execution(execution_id).await.unwrap();
    assert_eq!(snapshot.execution.status, ExecutionStatus::Completed);

    let task_run = &snapshot.task_runs[0];
    assert_eq!(task_run.attempt, 3);
}
