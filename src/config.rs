//! Ambient service configuration: the engine's tuning knobs plus the
//! `browserflow-server` binary's bind address, database path, and browser
//! launch mode.
//!
//! Environment overrides follow a plain `_PATH`/`_TIMEOUT`-style
//! parse-with-default convention, layered under a `clap` CLI the way
//! several browser/crawl-automation crates expose the same settings both
//! ways: flags win when passed, the `BROWSERFLOW_*` environment variable is
//! the fallback, and the programmatic `Default` is the last resort.

use clap::Parser;

use crate::driver::ResetPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    Fail,
    Resume,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub global_parallelism: usize,
    pub parallelism_per_execution: usize,
    pub default_task_timeout_seconds: u64,
    pub default_execution_timeout_seconds: Option<u64>,
    pub default_retry_count: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    pub page_pool_max: usize,
    pub page_pool_reset_policy: ResetPolicy,
    pub event_subscriber_queue_depth: usize,
    pub cancellation_grace_seconds: u64,
    pub orphan_policy: OrphanPolicy,
    pub bind_addr: String,
    pub database_path: String,
    pub headless: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_parallelism: 16,
            parallelism_per_execution: 1,
            default_task_timeout_seconds: 30,
            default_execution_timeout_seconds: None,
            default_retry_count: 3,
            retry_base_ms: 1000,
            retry_cap_ms: 30_000,
            page_pool_max: 5,
            page_pool_reset_policy: ResetPolicy::Full,
            event_subscriber_queue_depth: 256,
            cancellation_grace_seconds: 5,
            orphan_policy: OrphanPolicy::Fail,
            bind_addr: "127.0.0.1:8787".to_string(),
            database_path: "./browserflow.sqlite".to_string(),
            headless: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            global_parallelism: env_parse("BROWSERFLOW_GLOBAL_PARALLELISM", defaults.global_parallelism),
            parallelism_per_execution: env_parse(
                "BROWSERFLOW_PARALLELISM_PER_EXECUTION",
                defaults.parallelism_per_execution,
            ),
            default_task_timeout_seconds: env_parse(
                "BROWSERFLOW_DEFAULT_TASK_TIMEOUT_SECONDS",
                defaults.default_task_timeout_seconds,
            ),
            default_execution_timeout_seconds: std::env::var("BROWSERFLOW_DEFAULT_EXECUTION_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok()),
            default_retry_count: env_parse("BROWSERFLOW_DEFAULT_RETRY_COUNT", defaults.default_retry_count),
            retry_base_ms: env_parse("BROWSERFLOW_RETRY_BASE_MS", defaults.retry_base_ms),
            retry_cap_ms: env_parse("BROWSERFLOW_RETRY_CAP_MS", defaults.retry_cap_ms),
            page_pool_max: env_parse("BROWSERFLOW_PAGE_POOL_MAX", defaults.page_pool_max),
            page_pool_reset_policy: match std::env::var("BROWSERFLOW_PAGE_POOL_RESET_POLICY").as_deref() {
                Ok("fast") => ResetPolicy::Fast,
                _ => ResetPolicy::Full,
            },
            event_subscriber_queue_depth: env_parse(
                "BROWSERFLOW_EVENT_SUBSCRIBER_QUEUE_DEPTH",
                defaults.event_subscriber_queue_depth,
            ),
            cancellation_grace_seconds: env_parse(
                "BROWSERFLOW_CANCELLATION_GRACE_SECONDS",
                defaults.cancellation_grace_seconds,
            ),
            orphan_policy: match std::env::var("BROWSERFLOW_ORPHAN_POLICY").as_deref() {
                Ok("resume") => OrphanPolicy::Resume,
                _ => OrphanPolicy::Fail,
            },
            bind_addr: std::env::var("BROWSERFLOW_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_path: std::env::var("BROWSERFLOW_DATABASE_PATH").unwrap_or(defaults.database_path),
            headless: env_parse("BROWSERFLOW_HEADLESS", defaults.headless),
        }
    }

    /// Overlay explicitly-passed CLI flags on top of the environment/default
    /// layer. `Cli::load` is the entry point `main` actually calls.
    #[must_use]
    fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(v) = cli.bind_addr.clone() {
            self.bind_addr = v;
        }
        if let Some(v) = cli.database_path.clone() {
            self.database_path = v;
        }
        if let Some(v) = cli.global_parallelism {
            self.global_parallelism = v;
        }
        if let Some(v) = cli.parallelism_per_execution {
            self.parallelism_per_execution = v;
        }
        if let Some(v) = cli.page_pool_max {
            self.page_pool_max = v;
        }
        if cli.headed {
            self.headless = false;
        }
        self
    }
}

/// `browserflow-server` command-line flags. Every flag falls back to its
/// `BROWSERFLOW_*` environment variable (via clap's `env` feature) and from
/// there to `EngineConfig::default()`.
#[derive(Debug, Parser)]
#[command(name = "browserflow-server", about = "Browser-automation workflow orchestrator")]
pub struct Cli {
    /// Address to bind the HTTP API to.
    #[arg(long, env = "BROWSERFLOW_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the SQLite database file.
    #[arg(long, env = "BROWSERFLOW_DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Maximum concurrently running executions.
    #[arg(long, env = "BROWSERFLOW_GLOBAL_PARALLELISM")]
    pub global_parallelism: Option<usize>,

    /// Maximum concurrently running tasks within one execution.
    #[arg(long, env = "BROWSERFLOW_PARALLELISM_PER_EXECUTION")]
    pub parallelism_per_execution: Option<usize>,

    /// Maximum live browser pages.
    #[arg(long, env = "BROWSERFLOW_PAGE_POOL_MAX")]
    pub page_pool_max: Option<usize>,

    /// Launch Chrome with a visible window instead of headless.
    #[arg(long)]
    pub headed: bool,
}

impl Cli {
    /// Parse `std::env::args`, then layer environment defaults underneath.
    #[must_use]
    pub fn load() -> EngineConfig {
        let cli = Self::parse();
        EngineConfig::from_env().apply_cli(&cli)
    }
}
