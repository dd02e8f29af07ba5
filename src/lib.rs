//! A browser-automation workflow orchestrator: DAG-defined workflows whose
//! tasks drive headless browser agents, with durable execution state and a
//! live event stream over each run.
//!
//! The crate is organized in the order a request flows through it:
//! `model` defines the workflow/execution/event types and the DAG and
//! parameter-resolution algorithms; `store` persists them; `event_bus`
//! publishes their state transitions; `driver` and `page_pool` give
//! task execution a browser to act on; `engine` dispatches a workflow's
//! tasks against the driver under a concurrency budget; `scheduler` is the
//! transport-agnostic surface `api`'s axum routes call into.

pub mod api;
pub mod cancellation;
pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod event_bus;
pub mod model;
pub mod observer;
pub mod page_pool;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use tracing::info;

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::driver::spawn_chromium_driver;
use crate::engine::{AgentRegistry, BrowserAgent, ExecutionEngine};
use crate::event_bus::{EventBus, EventBusConfig};
use crate::observer::TracingObserver;
use crate::page_pool::{PagePool, PagePoolConfig};
use crate::scheduler::Scheduler;
use crate::store::{SqliteStore, Store};

/// Error type for service assembly: anything that can go wrong building the
/// store, browser driver, or HTTP listener before the service can run.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open the durable store: {0}")]
    Store(#[from] store::StoreError),
    #[error("failed to launch the browser driver: {0}")]
    Driver(#[from] driver::DriverError),
    #[error("failed to bind the HTTP listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to recover orphaned executions: {0}")]
    Recovery(#[from] engine::EngineError),
}

/// Everything `main` needs to serve requests: the axum router plus the
/// components a caller may want to hold onto (e.g. to call
/// `recover_orphans` separately, or shut the driver down on exit).
pub struct Service {
    pub router: axum::Router,
    pub engine: Arc<ExecutionEngine>,
    pub driver: driver::SharedDriver,
}

/// Assemble the full service from `config`: open the store, launch the
/// browser driver, wire the event bus, build the engine and scheduler, and
/// recover any executions orphaned by a prior process's restart.
pub async fn build_service(config: EngineConfig) -> Result<Service, StartupError> {
    let store: Arc<dyn Store> =
        Arc::new(SqliteStore::open(std::path::Path::new(&config.database_path)).await?);

    let bus = Arc::new(
        EventBus::new(Arc::clone(&store), EventBusConfig::default())
            .with_observer(Arc::new(TracingObserver)),
    );

    let driver = spawn_chromium_driver(config.headless).await?;
    let pool = PagePool::new(
        Arc::clone(&driver),
        PagePoolConfig {
            max_pages: config.page_pool_max,
            reset_policy: config.page_pool_reset_policy,
            ..Default::default()
        },
    );

    let mut registry = AgentRegistry::new();
    registry.register("browser", Arc::new(BrowserAgent::new(Arc::clone(&pool))));
    let registry = Arc::new(registry);

    let clock = Arc::new(SystemClock);
    let engine = ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        registry,
        clock,
        config.clone(),
    );

    let recovered = engine.recover_orphans().await?;
    if recovered > 0 {
        info!(recovered, "recovered orphaned executions from a prior restart");
    }

    let scheduler = Arc::new(Scheduler::new(store, bus, Arc::clone(&engine)));
    let router = api::router(scheduler);

    Ok(Service {
        router,
        engine,
        driver,
    })
}

/// Bind `config.bind_addr` and serve the assembled service until the
/// process is asked to shut down.
pub async fn start_server(config: EngineConfig) -> Result<(), StartupError> {
    let bind_addr = config.bind_addr.clone();
    let service = build_service(config).await?;
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(StartupError::Bind)?;
    info!(%bind_addr, "browserflow listening");
    axum::serve(listener, service.router)
        .await
        .map_err(StartupError::Bind)?;
    Ok(())
}
