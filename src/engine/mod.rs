//! Walks a workflow's task graph, dispatching ready tasks to `TaskRunner`s
//! under a concurrency budget, the way this codebase's crawl orchestrator
//! drives a `FuturesUnordered` await-any loop over in-flight page fetches —
//! generalized from a single flat queue to dependency-ordered dispatch.

mod backoff;
mod error;
mod registry;
mod task_runner;

pub use crate::cancellation::CancellationSignal;
pub use crate::config::{EngineConfig, OrphanPolicy};
pub use error::EngineError;
pub use registry::{Agent, AgentRegistry, BrowserAgent};
pub use task_runner::{TaskOutcome, TaskRunner, TaskRunnerConfig};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info_span, warn, Instrument};

use crate::clock::Clock;
use crate::event_bus::EventBus;
use crate::model::{
    Execution, ExecutionError, ExecutionEvent, ExecutionId, ExecutionStatus, EventKind, OnError,
    TaskGraph, TaskRun, TaskRunId, TaskSpec, Workflow,
};
use crate::store::{ExecutionTransitionFields, Store};

struct ExecutionControl {
    cancellation: CancellationSignal,
    timed_out: Arc<AtomicBool>,
}

/// Drives every in-flight execution. One instance is shared for the whole
/// service; `submit` spawns a supervisor task per execution bounded by
/// `global_parallelism`.
pub struct ExecutionEngine {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    task_runner: Arc<TaskRunner>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    global_slots: Arc<Semaphore>,
    controls: DashMap<ExecutionId, ExecutionControl>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let task_runner = Arc::new(TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            registry,
            Arc::clone(&clock),
            TaskRunnerConfig {
                default_timeout: Duration::from_secs(config.default_task_timeout_seconds),
                retry_base_ms: config.retry_base_ms,
                retry_cap_ms: config.retry_cap_ms,
            },
        ));
        Arc::new(Self {
            global_slots: Arc::new(Semaphore::new(config.global_parallelism.max(1))),
            store,
            bus,
            task_runner,
            clock,
            config,
            controls: DashMap::new(),
        })
    }

    /// Enqueue an already-persisted (status=queued) execution for dispatch.
    /// Returns immediately; the execution runs on a background task bounded
    /// by `global_parallelism`.
    pub fn submit(self: &Arc<Self>, workflow: Workflow, execution: Execution) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let permit = match engine.global_slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let execution_id = execution.id;
            let span = info_span!("execution", execution_id = %execution_id);
            if let Err(e) = engine.run_execution(workflow, execution).instrument(span).await {
                warn!(execution_id = %execution_id, error = %e, "execution ended with an engine error");
            }
            drop(permit);
        });
    }

    /// Request cancellation of a running execution. A no-op (returns
    /// `Ok`) if the execution is not currently tracked, since it may
    /// already have reached a terminal state.
    pub fn cancel_execution(&self, execution_id: ExecutionId) {
        if let Some(control) = self.controls.get(&execution_id) {
            control.cancellation.cancel();
        }
    }

    /// Whether `execution_id` is currently tracked and has been asked to
    /// cancel. The store's own `status` column stays `running` until the
    /// in-flight task runs drain and the engine writes the terminal
    /// `cancelled` transition — callers that want to surface an intermediate
    /// `cancelling` state to an external caller (`GetExecution`) check this
    /// instead of writing a speculative status the engine does not own.
    #[must_use]
    pub fn is_cancelling(&self, execution_id: ExecutionId) -> bool {
        self.controls
            .get(&execution_id)
            .is_some_and(|c| c.cancellation.is_cancelled())
    }

    /// Whether `execution_id` is currently dispatching (tracked by this
    /// engine instance and not yet terminal).
    #[must_use]
    pub fn is_tracked(&self, execution_id: ExecutionId) -> bool {
        self.controls.contains_key(&execution_id)
    }

    /// On startup, every execution left `running`/`cancelling` by a prior
    /// process is failed with `ErrOrphaned` and its non-terminal task runs
    /// are marked `skipped`, without re-dispatching anything — the default
    /// `orphan_policy`. `resume` is accepted as a config value but this
    /// implementation falls back to the same fail behavior: reattaching to
    /// a ready set from persisted task statuses without the pages that
    /// backed any in-flight run is not attempted here.
    pub async fn recover_orphans(self: &Arc<Self>) -> Result<usize, EngineError> {
        if matches!(self.config.orphan_policy, OrphanPolicy::Resume) {
            warn!("orphan_policy=resume is configured but not implemented; falling back to fail");
        }
        let orphaned = self.store.list_incomplete_executions().await?;
        for execution in &orphaned {
            let snapshot = self.store.load_execution(execution.id).await?;
            for task_run in snapshot.task_runs.iter().filter(|t| !t.status.is_terminal()) {
                if let Err(e) = self
                    .store
                    .transition_task_run(
                        task_run.id,
                        task_run.status,
                        crate::model::TaskRunStatus::Skipped,
                        crate::store::TaskRunTransitionFields {
                            completed_at: Some(self.clock.now()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    warn!(task_run_id = %task_run.id, error = %e, "failed to skip orphaned task run");
                }
            }

            let error = ExecutionError {
                kind: "orphaned".to_string(),
                message: "execution was left running by a prior process restart".to_string(),
                retryable: false,
            };
            self.transition_execution(
                execution.id,
                execution.status,
                ExecutionStatus::Failed,
                ExecutionTransitionFields {
                    completed_at: Some(self.clock.now()),
                    error: Some(error.clone()),
                    ..Default::default()
                },
            )
            .await;
            self.emit(ExecutionEvent::new(execution.id, EventKind::ExecutionFailed).with_error(error))
                .await;
        }
        Ok(orphaned.len())
    }

    async fn run_execution(self: &Arc<Self>, workflow: Workflow, execution: Execution) -> Result<(), EngineError> {
        let execution_id = execution.id;
        let graph = TaskGraph::build(&workflow.definition)?;
        let spec_by_name: BTreeMap<&str, &TaskSpec> = workflow
            .definition
            .tasks
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();

        let cancellation = CancellationSignal::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        self.controls.insert(
            execution_id,
            ExecutionControl {
                cancellation: cancellation.clone(),
                timed_out: Arc::clone(&timed_out),
            },
        );

        let effective_timeout = workflow
            .timeout_seconds
            .or(self.config.default_execution_timeout_seconds);
        if let Some(secs) = effective_timeout {
            let engine = Arc::clone(self);
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if engine.controls.contains_key(&execution_id) {
                    flag.store(true, Ordering::SeqCst);
                    engine.cancel_execution(execution_id);
                }
            });
        }

        let started_at = self.clock.now();
        self.transition_execution(
            execution_id,
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionTransitionFields {
                started_at: Some(started_at),
                ..Default::default()
            },
        )
        .await;
        self.emit(ExecutionEvent::new(execution_id, EventKind::ExecutionStarted)).await;

        let mut variables = workflow.definition.variables.clone();
        for (k, v) in &execution.inputs {
            variables.insert(k.clone(), v.clone());
        }

        let parallelism = self.config.parallelism_per_execution.max(1);
        let mut ready: VecDeque<String> = graph.roots().into_iter().collect();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut outputs: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut any_failed = false;
        let mut last_error: Option<ExecutionError> = None;
        let mut halted = false;

        // Populated at dispatch, drained as runners resolve. Lets a grace-period
        // timeout forcibly cancel whatever is still running instead of only
        // blocking new dispatch.
        let mut running: HashMap<String, (TaskRunId, AbortHandle)> = HashMap::new();
        let mut grace_deadline: Option<tokio::time::Instant> = None;

        type RunnerHandle = JoinHandle<(String, TaskOutcome)>;
        let mut in_flight: FuturesUnordered<RunnerHandle> = FuturesUnordered::new();

        loop {
            while !halted && !cancellation.is_cancelled() && in_flight.len() < parallelism {
                let Some(task_name) = ready.pop_front() else { break };
                if dispatched.contains(&task_name) {
                    continue;
                }
                dispatched.insert(task_name.clone());

                let Some(spec) = spec_by_name.get(task_name.as_str()).copied() else {
                    continue;
                };
                let retry_limit = spec
                    .retry_count
                    .or(workflow.max_retries_default)
                    .unwrap_or(self.config.default_retry_count);
                let timeout = Duration::from_secs(
                    spec.timeout_seconds
                        .or(workflow.timeout_seconds)
                        .unwrap_or(self.config.default_task_timeout_seconds),
                );

                let task_run = TaskRun::new(
                    execution_id,
                    spec.name.clone(),
                    spec.agent_type.clone(),
                    spec.action.clone(),
                    serde_json::Value::Null,
                    retry_limit,
                );
                let task_run_id = task_run.id;
                if let Err(e) = self.store.create_task_run(&task_run).await {
                    warn!(task = %spec.name, error = %e, "failed to persist task run");
                    continue;
                }
                self.emit(
                    ExecutionEvent::new(execution_id, EventKind::TaskQueued).with_task(spec.name.clone()),
                )
                .await;

                let runner = Arc::clone(&self.task_runner);
                let spec_owned = (*spec).clone();
                let variables_snapshot = variables.clone();
                let outputs_snapshot = outputs.clone();
                let cancel = cancellation.clone();
                let name_for_result = task_name.clone();

                let handle = tokio::spawn(async move {
                    let outcome = runner
                        .run(
                            execution_id,
                            task_run_id,
                            &spec_owned,
                            &variables_snapshot,
                            &outputs_snapshot,
                            retry_limit,
                            timeout,
                            &cancel,
                        )
                        .await;
                    (name_for_result, outcome)
                });
                running.insert(task_name.clone(), (task_run_id, handle.abort_handle()));
                in_flight.push(handle);
            }

            if in_flight.is_empty() {
                break;
            }

            if grace_deadline.is_none() && cancellation.is_cancelled() {
                grace_deadline = Some(
                    tokio::time::Instant::now()
                        + Duration::from_secs(self.config.cancellation_grace_seconds.max(1)),
                );
            }

            let next = match grace_deadline {
                Some(deadline) => {
                    tokio::select! {
                        result = in_flight.next() => Some(result),
                        () = tokio::time::sleep_until(deadline) => None,
                    }
                }
                None => Some(in_flight.next().await),
            };

            match next {
                Some(Some(Ok((task_name, outcome)))) => {
                    running.remove(&task_name);
                    match outcome {
                        TaskOutcome::Succeeded(value) => {
                            completed.insert(task_name.clone());
                            outputs.insert(task_name.clone(), value);
                            for dependent in graph.dependents_of(&task_name) {
                                if dispatched.contains(dependent) {
                                    continue;
                                }
                                if graph
                                    .dependencies_of(dependent)
                                    .iter()
                                    .all(|d| completed.contains(d))
                                {
                                    ready.push_back(dependent.clone());
                                }
                            }
                        }
                        TaskOutcome::Failed(err) => {
                            any_failed = true;
                            last_error = Some(err);
                            let effective_on_error = spec_by_name
                                .get(task_name.as_str())
                                .and_then(|s| s.on_error)
                                .unwrap_or(workflow.definition.on_error);
                            match effective_on_error {
                                OnError::Continue => {}
                                OnError::Stop | OnError::Retry => {
                                    halted = true;
                                    cancellation.cancel();
                                }
                            }
                        }
                        TaskOutcome::Cancelled => {}
                    }
                }
                Some(Some(Err(join_err))) => {
                    warn!(error = %join_err, "task runner task panicked");
                    any_failed = true;
                }
                Some(None) => break,
                None => {
                    // Cancellation grace period elapsed with runs still in
                    // flight: stop waiting on them and force them terminal.
                    for (_, (task_run_id, abort_handle)) in running.drain() {
                        abort_handle.abort();
                        self.force_cancel_task_run(task_run_id).await;
                    }
                    break;
                }
            }
        }

        for task_name in graph.task_names() {
            if completed.contains(task_name) || dispatched.contains(task_name) {
                continue;
            }
            if let Some(spec) = spec_by_name.get(task_name.as_str()).copied() {
                self.skip_task(execution_id, spec).await;
            }
        }

        let completed_at = self.clock.now();
        let duration_ms = (completed_at - started_at).num_milliseconds();

        // `halted`/`any_failed` are checked ahead of `cancellation.is_cancelled()`
        // deliberately: an `on_error: stop` halt also flips the shared
        // cancellation signal (to interrupt in-flight siblings), but that
        // execution is still a failure, not a user/timeout cancellation.
        let final_status = if timed_out.load(Ordering::SeqCst) {
            ExecutionStatus::Failed
        } else if any_failed {
            ExecutionStatus::Failed
        } else if cancellation.is_cancelled() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Completed
        };

        let final_error = if timed_out.load(Ordering::SeqCst) {
            Some(ExecutionError {
                kind: "execution_timeout".to_string(),
                message: "execution exceeded its configured timeout".to_string(),
                retryable: false,
            })
        } else if final_status == ExecutionStatus::Failed {
            last_error
        } else {
            None
        };

        self.transition_execution(
            execution_id,
            ExecutionStatus::Running,
            final_status,
            ExecutionTransitionFields {
                completed_at: Some(completed_at),
                duration_ms: Some(duration_ms),
                output: Some(outputs),
                error: final_error.clone(),
            },
        )
        .await;

        let terminal_kind = match final_status {
            ExecutionStatus::Completed => EventKind::ExecutionCompleted,
            ExecutionStatus::Failed => EventKind::ExecutionFailed,
            ExecutionStatus::Cancelled => EventKind::ExecutionCancelled,
            ExecutionStatus::Queued | ExecutionStatus::Running | ExecutionStatus::Cancelling => {
                EventKind::ExecutionFailed
            }
        };
        let mut event = ExecutionEvent::new(execution_id, terminal_kind);
        if let Some(error) = final_error {
            event = event.with_error(error);
        }
        self.emit(event).await;

        self.controls.remove(&execution_id);
        Ok(())
    }

    /// Forcibly transition a still-`running` task run to `cancelled` once the
    /// cancellation grace period has elapsed without it finishing on its own.
    async fn force_cancel_task_run(&self, task_run_id: TaskRunId) {
        if let Err(e) = self
            .store
            .transition_task_run(
                task_run_id,
                crate::model::TaskRunStatus::Running,
                crate::model::TaskRunStatus::Cancelled,
                crate::store::TaskRunTransitionFields {
                    completed_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(task_run_id = %task_run_id, error = %e, "failed to force-cancel task run past its cancellation grace period");
        }
    }

    async fn skip_task(&self, execution_id: ExecutionId, spec: &TaskSpec) {
        let task_run = TaskRun::new(
            execution_id,
            spec.name.clone(),
            spec.agent_type.clone(),
            spec.action.clone(),
            serde_json::Value::Null,
            spec.retry_count.unwrap_or(self.config.default_retry_count),
        );
        let id = task_run.id;
        if let Err(e) = self.store.create_task_run(&task_run).await {
            warn!(task = %spec.name, error = %e, "failed to persist skipped task run");
            return;
        }
        if let Err(e) = self
            .store
            .transition_task_run(
                id,
                crate::model::TaskRunStatus::Queued,
                crate::model::TaskRunStatus::Skipped,
                crate::store::TaskRunTransitionFields {
                    completed_at: Some(self.clock.now()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(task = %spec.name, error = %e, "failed to mark task run skipped");
        }
        self.emit(
            ExecutionEvent::new(execution_id, EventKind::TaskSkipped).with_task(spec.name.clone()),
        )
        .await;
    }

    async fn transition_execution(
        &self,
        id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        fields: ExecutionTransitionFields,
    ) {
        if let Err(e) = self.store.transition_execution(id, from, to, fields).await {
            warn!(execution_id = %id, error = %e, "execution transition conflict");
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish execution event");
        }
    }
}
