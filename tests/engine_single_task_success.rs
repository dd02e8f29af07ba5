//! S1: a single-task workflow runs to completion and the execution
//! output carries the task's result.

mod engine_support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use engine_support::{build_harness, seed_workflow, task, workflow_definition};
use browserflow::model::{EventKind, ExecutionStatus, OnError};
use browserflow::scheduler::Scheduler;
use browserflow::store::Store;

#[tokio::test]
async fn single_task_workflow_completes() {
    let harness = build_harness().await;
    let definition = workflow_definition(vec![task("fetch", &[])], OnError::Stop);
    let workflow = seed_workflow(&harness.store, definition).await;

    let scheduler = Scheduler::new(
        Arc::clone(&harness.store) as Arc<dyn Store>,
        Arc::clone(&harness.bus),
        Arc::clone(&harness.engine),
    );
    let execution_id = scheduler
        .execute_workflow(workflow.id, BTreeMap::new(), "manual".to_string())
        .await
        .unwrap();

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();

    let mut kinds = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("subscription timed out")
        {
            Some(Ok(event)) => {
                let terminal = event.kind.is_execution_terminal();
                kinds.push(event.kind);
                if terminal {
                    break;
                }
            }
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => break,
        }
    }

    assert!(kinds.contains(&EventKind::ExecutionQueued));
    assert!(kinds.contains(&EventKind::ExecutionStarted));
    assert!(kinds.contains(&EventKind::TaskSucceeded));
    assert!(kinds.contains(&EventKind::ExecutionCompleted));

    let snapshot = harness.store.load_execution(execution_id).await.unwrap();
    assert_eq!(snapshot.execution.status, ExecutionStatus::Completed);
    assert!(snapshot.execution.output.contains_key("fetch"));
    assert_eq!(harness.driver.executed.load(std::sync::atomic::Ordering::SeqCst), 1);
}
