//! S5: cancelling a running execution stops further dispatch; whatever
//! task was already in flight still finishes, but nothing after it is
//! dispatched, and the execution lands in `cancelled`.

mod engine_support;

use std::time::Duration;

use engine_support::{build_harness_with_config, seed_execution, task, workflow_definition};
use browserflow::engine::EngineConfig;
use browserflow::model::{EventKind, ExecutionStatus, TaskRunStatus};
use browserflow::model::OnError;
use browserflow::store::Store;

#[tokio::test]
async fn cancel_skips_everything_not_already_dispatched() {
    let harness = build_harness_with_config(EngineConfig {
        global_parallelism: 4,
        // One execution slot: the second root task cannot start until the
        // first finishes, which gives the test a reliable window to cancel.
        parallelism_per_execution: 1,
        ..EngineConfig::default()
    })
    .await;

    harness
        .driver
        .delay("navigate:https://example.com/first", Duration::from_millis(300))
        .await;

    let first = task("first", &[]);
    let second = task("second", &[]);
    let definition = workflow_definition(vec![first, second], OnError::Stop);
    let (workflow, execution) = seed_execution(&harness.store, definition).await;
    let execution_id = execution.id;

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();
    harness.engine.submit(workflow, execution);

    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("subscription timed out")
        {
            Some(Ok(event)) if event.kind == EventKind::TaskStarted => {
                harness.engine.cancel_execution(execution_id);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => panic!("execution ended before any task started"),
        }
    }

    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("subscription timed out")
        {
            Some(Ok(event)) if event.kind.is_execution_terminal() => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => break,
        }
    }

    let snapshot = harness.store.load_execution(execution_id).await.unwrap();
    assert_eq!(snapshot.execution.status, ExecutionStatus::Cancelled);

    let first_run = snapshot
        .task_runs
        .iter()
        .find(|t| t.task_name == "first")
        .unwrap();
    assert_eq!(first_run.status, TaskRunStatus::Completed);

    let second_run = snapshot
        .task_runs
        .iter()
        .find(|t| t.task_name == "second")
        .unwrap();
    assert_eq!(second_run.status, TaskRunStatus::Skipped);
}
