//! The `BrowserDriver` capability: opening pages, running actions against
//! them within a deadline, and tearing the browser down.

mod action;
mod error;
pub mod launch;
pub mod profile;

pub use action::{Action, ActionResult, WaitUntil};
pub use error::DriverError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::browser_protocol::storage::ClearDataForOriginParams;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cancellation::CancellationSignal;
use profile::BrowserProfile;

/// How thoroughly a pooled page is cleaned before being handed to the next
/// task. `Fast` only navigates away from whatever the previous task left on
/// screen; `Full` also clears cookies and storage, so two tasks never share
/// session state through a recycled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    Fast,
    Full,
}

/// A single open browser tab/page, opaque to callers beyond its identity.
/// Deliberately holds no driver-specific state: the `PagePool`, `AgentRegistry`,
/// and `TaskRunner` only ever pass this id back to the same `BrowserDriver`
/// that issued it, which keeps the capability swappable for a
/// `MockBrowserDriver` in tests without a real chromiumoxide page behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub id: Uuid,
}

/// Capability trait a task's `agent_type: "browser"` actions are dispatched
/// through. Implementations own whatever browser process(es) back the pages
/// they hand out.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_page(&self) -> Result<PageHandle, DriverError>;

    /// Races the action against both `deadline` and `cancellation`, whichever
    /// comes first.
    async fn execute(
        &self,
        page: &PageHandle,
        action: &Action,
        deadline: Duration,
        cancellation: &CancellationSignal,
    ) -> Result<ActionResult, DriverError>;

    /// Reset a page to a clean, reusable state. Called before a pooled page
    /// is handed to a new task; `policy` controls how thoroughly.
    async fn reset_page(&self, page: &PageHandle, policy: ResetPolicy) -> Result<(), DriverError>;

    async fn close_page(&self, page: PageHandle) -> Result<(), DriverError>;

    /// Idempotent: drop all in-flight operations and release the browser
    /// process. Safe to call more than once.
    async fn shutdown(&self);
}

/// `BrowserDriver` implementation backed by a single `chromiumoxide::Browser`
/// process. Actions against distinct pages run fully concurrently; CDP
/// serializes only at the transport layer.
pub struct ChromiumDriver {
    browser: Browser,
    handler: JoinHandle<()>,
    _profile: BrowserProfile,
    pages: DashMap<Uuid, Page>,
}

impl ChromiumDriver {
    pub async fn launch(headless: bool) -> Result<Self, DriverError> {
        let profile = profile::create_unique_profile("browserflow_chrome")
            .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
        let (browser, handler) = launch::launch_browser(headless, profile.path().to_path_buf())
            .await
            .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
        Ok(Self {
            browser,
            handler,
            _profile: profile,
            pages: DashMap::new(),
        })
    }

    fn page(&self, handle: &PageHandle) -> Result<dashmap::mapref::one::Ref<'_, Uuid, Page>, DriverError> {
        self.pages
            .get(&handle.id)
            .ok_or_else(|| DriverError::DriverCrashed("page handle no longer live".into()))
    }

    async fn run_action(page: &Page, action: &Action) -> Result<ActionResult, DriverError> {
        match action {
            Action::Navigate { url, .. } => {
                page.goto(url.as_str())
                    .await
                    .map_err(|e| DriverError::Navigation(e.to_string()))?;
                Ok(ActionResult::text("url", url.clone()))
            }
            Action::Click { selector, .. } => {
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| DriverError::SelectorTimeout(e.to_string()))?;
                element
                    .click()
                    .await
                    .map_err(|e| DriverError::SelectorTimeout(e.to_string()))?;
                Ok(ActionResult::empty())
            }
            Action::Type { selector, text } => {
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| DriverError::SelectorTimeout(e.to_string()))?;
                element
                    .type_str(text.as_str())
                    .await
                    .map_err(|e| DriverError::SelectorTimeout(e.to_string()))?;
                Ok(ActionResult::empty())
            }
            Action::GetText { selector } => {
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| DriverError::SelectorTimeout(e.to_string()))?;
                let text = element
                    .inner_text()
                    .await
                    .map_err(|e| DriverError::Script(e.to_string()))?
                    .unwrap_or_default();
                Ok(ActionResult::text("text", text))
            }
            Action::Screenshot { full_page, path } => {
                let params = CaptureScreenshotParams {
                    format: Some(CaptureScreenshotFormat::Png),
                    capture_beyond_viewport: Some(*full_page),
                    ..Default::default()
                };
                let data = page
                    .screenshot(params)
                    .await
                    .map_err(|e| DriverError::Script(e.to_string()))?;
                if let Some(path) = path {
                    tokio::fs::write(path, &data)
                        .await
                        .map_err(|e| DriverError::Script(e.to_string()))?;
                }
                Ok(ActionResult::text(
                    "bytes",
                    data.len().to_string(),
                ))
            }
            Action::GetContent => {
                let content = page
                    .content()
                    .await
                    .map_err(|e| DriverError::Script(e.to_string()))?;
                Ok(ActionResult::text("content", content))
            }
            Action::Evaluate { script } => {
                let result = page
                    .evaluate(script.as_str())
                    .await
                    .map_err(|e| DriverError::Script(e.to_string()))?;
                let value = result
                    .into_value()
                    .map_err(|e| DriverError::Script(e.to_string()))?;
                Ok(ActionResult(value))
            }
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open_page(&self) -> Result<PageHandle, DriverError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
        let id = Uuid::new_v4();
        self.pages.insert(id, page);
        Ok(PageHandle { id })
    }

    async fn execute(
        &self,
        page: &PageHandle,
        action: &Action,
        deadline: Duration,
        cancellation: &CancellationSignal,
    ) -> Result<ActionResult, DriverError> {
        let target = self.page(page)?.clone();
        tokio::select! {
            result = tokio::time::timeout(deadline, Self::run_action(&target, action)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Timeout),
                }
            }
            () = cancellation.cancelled() => Err(DriverError::Cancelled),
        }
    }

    async fn reset_page(&self, page: &PageHandle, policy: ResetPolicy) -> Result<(), DriverError> {
        let target = self.page(page)?.clone();
        target
            .goto("about:blank")
            .await
            .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;

        if policy == ResetPolicy::Full {
            let origin = target
                .url()
                .await
                .map_err(|e| DriverError::DriverCrashed(e.to_string()))?
                .unwrap_or_else(|| "about:blank".to_string());
            target
                .execute(ClearBrowserCookiesParams {})
                .await
                .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
            target
                .execute(ClearDataForOriginParams {
                    origin,
                    storage_types: "all".to_string(),
                })
                .await
                .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
        }

        Ok(())
    }

    async fn close_page(&self, page: PageHandle) -> Result<(), DriverError> {
        let Some((_, target)) = self.pages.remove(&page.id) else {
            return Ok(());
        };
        target
            .close()
            .await
            .map_err(|e| DriverError::DriverCrashed(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.handler.abort();
    }
}

/// Shares one `ChromiumDriver` across every call site through an `Arc`,
/// matching the capability-object shape the engine and the page pool expect.
pub type SharedDriver = Arc<dyn BrowserDriver>;

pub async fn spawn_chromium_driver(headless: bool) -> Result<SharedDriver, DriverError> {
    let driver = ChromiumDriver::launch(headless).await?;
    Ok(Arc::new(driver))
}
