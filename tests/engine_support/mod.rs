//! Shared scaffolding for exercising the execution engine end to end
//! without a real Chrome process: a scripted `BrowserDriver`, plus the
//! wiring needed to stand up a store, event bus, page pool, agent
//! registry, and engine against it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use browserflow::cancellation::CancellationSignal;
use browserflow::clock::SystemClock;
use browserflow::driver::{Action, ActionResult, BrowserDriver, DriverError, PageHandle, ResetPolicy};
use browserflow::engine::{AgentRegistry, BrowserAgent, EngineConfig, ExecutionEngine};
use browserflow::event_bus::{EventBus, EventBusConfig};
use browserflow::model::{
    Execution, OnError, TaskSpec, Workflow, WorkflowDefinition,
};
use browserflow::page_pool::{PagePool, PagePoolConfig};
use browserflow::store::{SqliteStore, Store};
use tokio::sync::Mutex;

/// One scripted response for a single `execute` call.
pub enum Scripted {
    Ok(ActionResult),
    Err(DriverError),
}

/// A `BrowserDriver` whose `execute` calls are driven entirely by a
/// pre-loaded script, queue per action name. Falls back to an empty
/// success when a queue runs dry, so tests only need to script the
/// calls they care about asserting on.
pub struct MockBrowserDriver {
    scripts: Mutex<BTreeMap<String, VecDeque<Scripted>>>,
    delays: Mutex<BTreeMap<String, Duration>>,
    pub open_pages: AtomicU32,
    pub executed: AtomicU32,
}

impl MockBrowserDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(BTreeMap::new()),
            delays: Mutex::new(BTreeMap::new()),
            open_pages: AtomicU32::new(0),
            executed: AtomicU32::new(0),
        }
    }

    /// Queue `responses` to be returned, in order, for calls matching
    /// `key` (see `action_key` — distinguishes calls by the target URL or
    /// selector, not just the action name, so two tasks both navigating
    /// to different URLs can be scripted independently). Later calls past
    /// the queued responses get an empty success.
    pub async fn script(&self, key: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .await
            .insert(key.to_string(), VecDeque::from(responses));
    }

    /// Sleeps `dur` before resolving every call matching `key`, so a test
    /// has a window to act (e.g. cancel) while the call is in flight.
    pub async fn delay(&self, key: &str, dur: Duration) {
        self.delays.lock().await.insert(key.to_string(), dur);
    }
}

impl Default for MockBrowserDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn open_page(&self) -> Result<PageHandle, DriverError> {
        self.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(PageHandle {
            id: uuid::Uuid::new_v4(),
        })
    }

    async fn execute(
        &self,
        _page: &PageHandle,
        action: &Action,
        _deadline: Duration,
        cancellation: &CancellationSignal,
    ) -> Result<ActionResult, DriverError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let key = action_key(action);
        if let Some(dur) = self.delays.lock().await.get(&key).copied() {
            tokio::select! {
                () = tokio::time::sleep(dur) => {}
                () = cancellation.cancelled() => return Err(DriverError::Cancelled),
            }
        }
        let next = self
            .scripts
            .lock()
            .await
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Ok(result)) => Ok(result),
            Some(Scripted::Err(err)) => Err(err),
            None => Ok(ActionResult::empty()),
        }
    }

    async fn reset_page(&self, _page: &PageHandle, _policy: ResetPolicy) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close_page(&self, _page: PageHandle) -> Result<(), DriverError> {
        Ok(())
    }

    async fn shutdown(&self) {}
}

/// Distinguishes scripted calls by target, not just action kind, so two
/// concurrent tasks hitting different URLs/selectors can be scripted
/// independently.
fn action_key(action: &Action) -> String {
    match action {
        Action::Navigate { url, .. } => format!("navigate:{url}"),
        Action::Click { selector, .. } => format!("click:{selector}"),
        Action::Type { selector, .. } => format!("type:{selector}"),
        Action::GetText { selector } => format!("get_text:{selector}"),
        Action::Screenshot { .. } => "screenshot".to_string(),
        Action::GetContent => "get_content".to_string(),
        Action::Evaluate { script } => format!("evaluate:{script}"),
    }
}

/// A task spec with sane defaults, for tests that only care about a few
/// fields.
#[must_use]
pub fn task(name: &str, depends_on: &[&str]) -> TaskSpec {
    TaskSpec {
        name: name.to_string(),
        agent_type: "browser".to_string(),
        action: "navigate".to_string(),
        parameters: serde_json::json!({ "url": format!("https://example.com/{name}") }),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        timeout_seconds: Some(5),
        retry_count: Some(0),
        on_error: None,
    }
}

#[must_use]
pub fn workflow_definition(tasks: Vec<TaskSpec>, on_error: OnError) -> WorkflowDefinition {
    WorkflowDefinition {
        tasks,
        variables: BTreeMap::new(),
        on_error,
    }
}

/// Everything a scenario test needs: a live engine wired to an in-memory
/// SQLite database and a scripted driver, plus the bus to subscribe on.
pub struct Harness {
    pub engine: Arc<ExecutionEngine>,
    pub store: Arc<SqliteStore>,
    pub bus: Arc<EventBus>,
    pub driver: Arc<MockBrowserDriver>,
}

pub async fn build_harness() -> Harness {
    build_harness_with_config(EngineConfig {
        global_parallelism: 4,
        parallelism_per_execution: 4,
        ..EngineConfig::default()
    })
    .await
}

pub async fn build_harness_with_config(config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("engine_test.sqlite");
    // Leak the tempdir so it outlives the harness; these are short-lived
    // test processes and cleanup isn't worth the lifetime plumbing.
    std::mem::forget(dir);

    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .expect("open sqlite store"),
    );
    let bus = Arc::new(EventBus::new(
        Arc::clone(&store) as Arc<dyn Store>,
        EventBusConfig::default(),
    ));
    let driver = Arc::new(MockBrowserDriver::new());
    let page_pool = PagePool::new(
        Arc::clone(&driver) as Arc<dyn BrowserDriver>,
        PagePoolConfig::default(),
    );

    let mut registry = AgentRegistry::new();
    registry.register("browser", Arc::new(BrowserAgent::new(Arc::clone(&page_pool))));

    let engine = ExecutionEngine::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&bus),
        Arc::new(registry),
        Arc::new(SystemClock::default()),
        config,
    );

    Harness {
        engine,
        store,
        bus,
        driver,
    }
}

/// Persists a workflow only, for tests that drive execution creation
/// themselves through `Scheduler::execute_workflow`.
pub async fn seed_workflow(store: &Arc<SqliteStore>, definition: WorkflowDefinition) -> Workflow {
    let workflow = Workflow::new(
        "scenario".to_string(),
        "test-owner".to_string(),
        definition,
        None,
        None,
    );
    store
        .create_workflow(&workflow)
        .await
        .expect("create workflow");
    workflow
}

/// Persists a workflow and a queued execution for it, returning both.
pub async fn seed_execution(
    store: &Arc<SqliteStore>,
    definition: WorkflowDefinition,
) -> (Workflow, Execution) {
    let workflow = seed_workflow(store, definition).await;
    let execution = Execution::new(workflow.id, BTreeMap::new(), "manual".to_string());
    store
        .create_execution(&execution)
        .await
        .expect("create execution");
    (workflow, execution)
}
