//! S4: with `on_error: continue`, a failing task does not stop
//! independent siblings from running to completion.

mod engine_support;

use std::time::Duration;

use engine_support::{build_harness, seed_execution, task, workflow_definition, Scripted};
use browserflow::driver::DriverError;
use browserflow::model::{EventKind, ExecutionStatus, OnError};
use browserflow::store::Store;

#[tokio::test]
async fn independent_sibling_completes_despite_a_failure() {
    let harness = build_harness().await;

    harness
        .driver
        .script(
            "navigate:https://example.com/failing",
            vec![Scripted::Err(DriverError::InvalidAction(
                "bad selector".to_string(),
            ))],
        )
        .await;

    let mut failing = task("failing", &[]);
    failing.retry_count = Some(0);
    let sibling = task("sibling", &[]);

    let definition = workflow_definition(vec![failing, sibling], OnError::Continue);
    let (workflow, execution) = seed_execution(&harness.store, definition).await;
    let execution_id = execution.id;

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();
    harness.engine.submit(workflow, execution);

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
    assert_eq!(snapshot.execution.status, ExecutionStatus::Failed);
    let sibling_run = snapshot
        .task_runs
        .iter()
        .find(|t| t.task_name == "sibling")
        .unwrap();
    assert_eq!(
        sibling_run.status,
        browserflow::model::TaskRunStatus::Completed
    );
    assert!(snapshot.execution.output.contains_key("sibling"));

    let terminal_events: Vec<_> = snapshot
        .events
        .iter()
        .filter(|e| e.kind == EventKind::ExecutionFailed)
        .collect();
    assert_eq!(terminal_events.len(), 1);
}
