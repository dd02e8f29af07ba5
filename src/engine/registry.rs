//! Dynamic dispatch over agent types, replacing a hardcoded "browser"
//! special case with a capability registry keyed by `(agent_type, action)`
//! the way the rest of this codebase resolves dynamic dispatch through a
//! keyed map rather than a match statement on a string.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::cancellation::CancellationSignal;
use crate::driver::{Action, ActionResult, BrowserDriver, DriverError};
use crate::page_pool::PagePool;

/// One agent type's executor. `TaskRunner` never knows which concrete agent
/// backs a task; it only knows the `agent_type` string on the `TaskSpec`.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(
        &self,
        action: &str,
        parameters: &Value,
        deadline: Duration,
        cancellation: &CancellationSignal,
    ) -> Result<ActionResult, DriverError>;
}

/// The built-in, required `"browser"` agent: parses the action name and
/// parameters into a `driver::Action`, checks out a page from the pool for
/// the duration of the call, and always returns it.
pub struct BrowserAgent {
    pool: Arc<PagePool>,
}

impl BrowserAgent {
    #[must_use]
    pub fn new(pool: Arc<PagePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Agent for BrowserAgent {
    /// `deadline` is a single budget shared across both steps: a call that
    /// spends most of it waiting for a free page gets only what's left for
    /// the action itself, rather than a fresh full timeout for each step.
    async fn execute(
        &self,
        action: &str,
        parameters: &Value,
        deadline: Duration,
        cancellation: &CancellationSignal,
    ) -> Result<ActionResult, DriverError> {
        let action = Action::parse(action, parameters)?;
        let deadline_at = Instant::now() + deadline;
        let page = self.pool.acquire(deadline).await?;
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        self.pool
            .driver()
            .execute(page.handle(), &action, remaining, cancellation)
            .await
    }
}

/// Keyed registry of agent-type executors. `"browser"` is registered by the
/// caller that wires up the engine (see `ExecutionEngine::new`); additional
/// agent types register the same way, and neither the engine nor the task
/// runner ever compares an `agent_type` string directly.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent_type: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(agent_type.into(), agent);
    }

    #[must_use]
    pub fn get(&self, agent_type: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_type).cloned()
    }
}
