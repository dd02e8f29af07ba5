//! S3: with `on_error: stop`, a failing task halts dispatch and every
//! task that depends on it, directly or not, ends up `skipped`.

mod engine_support;

use std::time::Duration;

use engine_support::{build_harness, seed_execution, task, workflow_definition, Scripted};
use browserflow::driver::DriverError;
use browserflow::model::{EventKind, ExecutionStatus, OnError, TaskRunStatus};
use browserflow::store::Store;

#[tokio::test]
async fn failure_stops_dependents_and_skips_them() {
    let harness = build_harness().await;

    harness
        .driver
        .script(
            "navigate:https://example.com/root",
            vec![Scripted::Err(DriverError::InvalidAction(
                "bad selector".to_string(),
            ))],
        )
        .await;

    let mut root = task("root", &[]);
    root.retry_count = Some(0);
    let child = task("child", &["root"]);
    let definition = workflow_definition(vec![root, child], OnError::Stop);
    let (workflow, execution) = seed_execution(&harness.store, definition).await;
    let execution_id = execution.id;

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();
    harness.engine.submit(workflow, execution);

    let mut kinds = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("subscription timed out")
        {
            Some(Ok(event)) => {
                let terminal = event.kind.is_execution_terminal();
                kinds.push((event.kind, event.task_name.clone()));
                if terminal {
                    break;
                }
            }
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => break,
        }
    }

    assert!(kinds.contains(&(EventKind::TaskFailed, Some("root".to_string()))));
    assert!(kinds.contains(&(EventKind::TaskSkipped, Some("child".to_string()))));
    assert!(!kinds.iter().any(|(k, t)| *k == EventKind::TaskStarted && t.as_deref() == Some("child")));

    let snapshot = harness.store.load_execution(execution_id).await.unwrap();
    assert_eq!(snapshot.execution.status, ExecutionStatus::Failed);
    let child_run = snapshot
        .task_runs
        .iter()
        .find(|t| t.task_name == "child")
        .unwrap();
    assert_eq!(child_run.status, TaskRunStatus::Skipped);
}
