//! A bounded pool of browser pages shared by every task run dispatched
//! against one `BrowserDriver`.
//!
//! Generalizes this codebase's whole-browser `BrowserPool` (a background
//! scaler/keepalive loop managing pooled `Browser` processes) down to
//! individual `Page`s owned by a single shared driver: no self-scaling, no
//! keepalive task, just a strict bounded `acquire`/`release` contract.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::{Mutex, Semaphore};

use crate::driver::{BrowserDriver, DriverError, PageHandle};

/// Re-exported from `driver`, which owns the policy since it's the one that
/// actually implements the reset behavior.
pub use crate::driver::ResetPolicy;

#[derive(Debug, Clone, Copy)]
pub struct PagePoolConfig {
    pub max_pages: usize,
    pub max_idle: usize,
    pub reset_policy: ResetPolicy,
}

impl Default for PagePoolConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            max_idle: 5,
            reset_policy: ResetPolicy::Full,
        }
    }
}

struct Inner {
    idle: Vec<PageHandle>,
    live_count: usize,
}

/// Bounded pool of pages. `live pages <= max_pages` holds at all times;
/// concurrent `acquire` calls never return the same page.
pub struct PagePool {
    driver: Arc<dyn BrowserDriver>,
    config: PagePoolConfig,
    inner: Mutex<Inner>,
    /// One permit per page slot (not per idle page) — bounds concurrent opens.
    slots: Semaphore,
}

impl PagePool {
    #[must_use]
    pub fn new(driver: Arc<dyn BrowserDriver>, config: PagePoolConfig) -> Arc<Self> {
        Arc::new(Self {
            driver,
            slots: Semaphore::new(config.max_pages),
            config,
            inner: Mutex::new(Inner {
                idle: Vec::new(),
                live_count: 0,
            }),
        })
    }

    /// Acquire a page, reusing an idle one when available, opening a new one
    /// while under `max_pages`, or waiting up to `deadline` for one to free up.
    pub async fn acquire(self: &Arc<Self>, deadline: Duration) -> Result<PooledPage, DriverError> {
        let permit = tokio::time::timeout(deadline, self.slots.acquire())
            .await
            .map_err(|_| DriverError::PoolUnavailable("timed out waiting for a page slot".into()))?
            .map_err(|_| DriverError::PoolUnavailable("page pool is closed".into()))?;
        permit.forget();

        let existing = {
            let mut inner = self.inner.lock().await;
            inner.idle.pop()
        };

        let page = match existing {
            Some(page) => page,
            None => {
                let page = self.driver.open_page().await.inspect_err(|_| {
                    self.slots.add_permits(1);
                })?;
                self.inner.lock().await.live_count += 1;
                page
            }
        };

        Ok(PooledPage {
            pool: Arc::clone(self),
            page: Some(page),
        })
    }

    /// Return a page to the pool after resetting it. A failed reset closes
    /// the page and frees its slot instead of returning it to the idle set.
    fn release(self: &Arc<Self>, page: PageHandle) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            match pool.driver.reset_page(&page, pool.config.reset_policy).await {
                Ok(()) => {
                    let mut inner = pool.inner.lock().await;
                    if inner.idle.len() >= pool.config.max_idle {
                        drop(inner);
                        pool.close_one(page).await;
                        return;
                    }
                    inner.idle.push(page);
                    pool.slots.add_permits(1);
                }
                Err(e) => {
                    warn!("page reset failed, closing page instead of recycling: {e}");
                    pool.close_one(page).await;
                }
            }
        });
    }

    async fn close_one(&self, page: PageHandle) {
        if let Err(e) = self.driver.close_page(page).await {
            warn!("failed to close page: {e}");
        }
        let mut inner = self.inner.lock().await;
        inner.live_count = inner.live_count.saturating_sub(1);
        drop(inner);
        self.slots.add_permits(1);
    }

    /// Close every idle page. Pages currently checked out are closed as they
    /// are released, since the pool no longer hands out new permits past
    /// this point in practice (callers stop acquiring once shutdown begins).
    pub async fn close_all(&self) {
        let idle = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.idle)
        };
        for page in idle {
            if let Err(e) = self.driver.close_page(page).await {
                warn!("failed to close page during shutdown: {e}");
            }
            let mut inner = self.inner.lock().await;
            inner.live_count = inner.live_count.saturating_sub(1);
        }
    }

    pub async fn live_count(&self) -> usize {
        self.inner.lock().await.live_count
    }

    /// The driver backing this pool's pages, for callers that need to run
    /// an action against an acquired page directly.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }
}

/// RAII guard returned by `acquire`. Dropping it returns the page to the pool.
pub struct PooledPage {
    pool: Arc<PagePool>,
    page: Option<PageHandle>,
}

impl PooledPage {
    #[must_use]
    pub fn handle(&self) -> &PageHandle {
        self.page.as_ref().expect("page taken only on drop")
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.pool.release(page);
        }
    }
}
