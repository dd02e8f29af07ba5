//! S6: a subscriber that attaches after an execution has already
//! finished sees the whole event history via replay, gap-free and in
//! order, then gets a clean end of stream.

mod engine_support;

use std::time::Duration;

use engine_support::{build_harness, seed_execution, task, workflow_definition};
use browserflow::model::{EventKind, OnError};
use browserflow::store::Store;

#[tokio::test]
async fn late_subscriber_replays_the_full_history_then_closes() {
    let harness = build_harness().await;
    let definition = workflow_definition(vec![task("fetch", &[])], OnError::Stop);
    let (workflow, execution) = seed_execution(&harness.store, definition).await;
    let execution_id = execution.id;

    // Run the execution to completion with nobody subscribed.
    harness.engine.submit(workflow, execution);
    loop {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snapshot = harness
            .store
            .load_execution(execution_id)
            .await
            .unwrap();
        if snapshot.execution.status.is_terminal() {
            break;
        }
    }

    let mut sub = harness.bus.subscribe(execution_id, None).await.unwrap();
    let mut seqs = Vec::new();
    let mut saw_terminal = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("replay timed out")
        {
            Some(Ok(event)) => {
                seqs.push(event.seq);
                if event.kind.is_execution_terminal() {
                    saw_terminal = true;
                    assert_eq!(event.kind, EventKind::ExecutionCompleted);
                }
            }
            Some(Err(e)) => panic!("subscription error: {e}"),
            None => break,
        }
    }

    assert!(saw_terminal);
    assert!(seqs.len() >= 3, "expected queued/started/succeeded/completed events, got {seqs:?}");
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted, "replay must preserve sequence order");
}
