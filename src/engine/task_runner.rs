//! Runs exactly one `TaskRun` to a terminal state: resolve parameters,
//! dispatch to the registered agent, retry transient failures with backoff,
//! and record every transition through the `Store`/`EventBus`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cancellation::CancellationSignal;
use crate::clock::Clock;
use crate::driver::DriverError;
use crate::event_bus::EventBus;
use crate::model::{
    resolve, EventKind, ExecutionError, ExecutionEvent, ExecutionId, ResolveError,
    ResolverContext, TaskRunId, TaskRunStatus, TaskSpec,
};
use crate::store::{Store, TaskRunTransitionFields};

use super::backoff::compute_backoff;
use super::registry::AgentRegistry;

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(serde_json::Value),
    Failed(ExecutionError),
    Cancelled,
}

pub struct TaskRunnerConfig {
    pub default_timeout: Duration,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
}

pub struct TaskRunner {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
    clock: Arc<dyn Clock>,
    config: TaskRunnerConfig,
}

impl TaskRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        config: TaskRunnerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            clock,
            config,
        }
    }

    /// Run `spec` as `task_run_id` within `execution_id`, to a terminal
    /// outcome. `task_outputs` holds every already-completed task's output
    /// in this execution, for `${tasks.NAME.output.PATH}` resolution.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        execution_id: ExecutionId,
        task_run_id: TaskRunId,
        spec: &TaskSpec,
        variables: &BTreeMap<String, serde_json::Value>,
        task_outputs: &BTreeMap<String, serde_json::Value>,
        retry_limit: u32,
        timeout: Duration,
        cancellation: &CancellationSignal,
    ) -> TaskOutcome {
        let resolved = {
            let ctx = ResolverContext {
                variables,
                task_outputs,
            };
            resolve(&spec.parameters, &ctx)
        };

        let parameters = match resolved {
            Ok(value) => value,
            Err(ResolveError::Unresolved(path)) => {
                let error = ExecutionError {
                    kind: "unresolved_reference".to_string(),
                    message: format!("unresolved reference: {path}"),
                    retryable: false,
                };
                self.fail(
                    execution_id,
                    task_run_id,
                    TaskRunStatus::Queued,
                    &spec.name,
                    1,
                    error.clone(),
                )
                .await;
                return TaskOutcome::Failed(error);
            }
        };

        self.transition(
            task_run_id,
            TaskRunStatus::Queued,
            TaskRunStatus::Running,
            TaskRunTransitionFields {
                started_at: Some(self.clock.now()),
                ..Default::default()
            },
        )
        .await;
        self.emit(ExecutionEvent::new(execution_id, EventKind::TaskStarted).with_task(spec.name.clone()))
            .await;

        let Some(agent) = self.registry.get(&spec.agent_type) else {
            let error = ExecutionError {
                kind: "unknown_agent_type".to_string(),
                message: format!("no agent registered for type {:?}", spec.agent_type),
                retryable: false,
            };
            self.fail(
                execution_id,
                task_run_id,
                TaskRunStatus::Running,
                &spec.name,
                1,
                error.clone(),
            )
            .await;
            return TaskOutcome::Failed(error);
        };

        let mut attempt: u32 = 1;
        loop {
            if cancellation.is_cancelled() {
                self.transition(
                    task_run_id,
                    TaskRunStatus::Running,
                    TaskRunStatus::Cancelled,
                    TaskRunTransitionFields {
                        completed_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                )
                .await;
                return TaskOutcome::Cancelled;
            }

            let result = agent.execute(&spec.action, &parameters, timeout, cancellation).await;

            match result {
                Ok(action_result) => {
                    self.transition(
                        task_run_id,
                        TaskRunStatus::Running,
                        TaskRunStatus::Completed,
                        TaskRunTransitionFields {
                            completed_at: Some(self.clock.now()),
                            output: Some(action_result.0.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                    self.emit(
                        ExecutionEvent::new(execution_id, EventKind::TaskSucceeded)
                            .with_task(spec.name.clone())
                            .with_attempt(attempt)
                            .with_output_digest(&action_result.0),
                    )
                    .await;
                    return TaskOutcome::Succeeded(action_result.0);
                }
                Err(DriverError::Cancelled) => {
                    self.transition(
                        task_run_id,
                        TaskRunStatus::Running,
                        TaskRunStatus::Cancelled,
                        TaskRunTransitionFields {
                            completed_at: Some(self.clock.now()),
                            ..Default::default()
                        },
                    )
                    .await;
                    return TaskOutcome::Cancelled;
                }
                Err(driver_error) => {
                    let retryable = driver_error.is_retryable() && attempt <= retry_limit;
                    if retryable {
                        warn!(
                            task = %spec.name,
                            attempt,
                            error = %driver_error,
                            "task attempt failed, retrying"
                        );
                        self.emit(
                            ExecutionEvent::new(execution_id, EventKind::TaskRetrying)
                                .with_task(spec.name.clone())
                                .with_attempt(attempt),
                        )
                        .await;
                        self.transition(
                            task_run_id,
                            TaskRunStatus::Running,
                            TaskRunStatus::Running,
                            TaskRunTransitionFields {
                                attempt: Some(attempt + 1),
                                ..Default::default()
                            },
                        )
                        .await;
                        let delay =
                            compute_backoff(attempt, self.config.retry_base_ms, self.config.retry_cap_ms);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let error = ExecutionError {
                        kind: driver_error_kind(&driver_error).to_string(),
                        message: driver_error.to_string(),
                        retryable: false,
                    };
                    self.fail(
                        execution_id,
                        task_run_id,
                        TaskRunStatus::Running,
                        &spec.name,
                        attempt,
                        error.clone(),
                    )
                    .await;
                    return TaskOutcome::Failed(error);
                }
            }
        }
    }

    async fn fail(
        &self,
        execution_id: ExecutionId,
        task_run_id: TaskRunId,
        from: TaskRunStatus,
        task_name: &str,
        attempt: u32,
        error: ExecutionError,
    ) {
        self.transition(
            task_run_id,
            from,
            TaskRunStatus::Failed,
            TaskRunTransitionFields {
                completed_at: Some(self.clock.now()),
                error: Some(error.clone()),
                ..Default::default()
            },
        )
        .await;
        self.emit(
            ExecutionEvent::new(execution_id, EventKind::TaskFailed)
                .with_task(task_name.to_string())
                .with_attempt(attempt)
                .with_error(error),
        )
        .await;
    }

    async fn transition(
        &self,
        id: TaskRunId,
        from: TaskRunStatus,
        to: TaskRunStatus,
        fields: TaskRunTransitionFields,
    ) {
        if let Err(e) = self.store.transition_task_run(id, from, to, fields).await {
            warn!(task_run_id = %id, error = %e, "task run transition conflict");
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "failed to publish task event");
        }
    }
}

fn driver_error_kind(error: &DriverError) -> &'static str {
    match error {
        DriverError::InvalidAction(_) => "invalid_action",
        DriverError::SelectorTimeout(_) => "selector_timeout",
        DriverError::Navigation(_) => "navigation",
        DriverError::Script(_) => "script",
        DriverError::DriverCrashed(_) => "driver_crashed",
        DriverError::Cancelled => "cancelled",
        DriverError::Timeout => "timeout",
        DriverError::PoolUnavailable(_) => "pool_unavailable",
    }
}
