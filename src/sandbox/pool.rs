use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::Sandbox;

/// A numbered box whose isolate-side initialization happens on first use.
struct BoxHandle {
    id: u64,
    /// Filled by the first acquisition; the async mutex single-flights init.
    path: tokio::sync::Mutex<Option<PathBuf>>,
}

impl BoxHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            path: tokio::sync::Mutex::new(None),
        }
    }

    async fn ensure_init(&self, sandbox: &dyn Sandbox) -> Result<PathBuf> {
        let mut slot = self.path.lock().await;
        if let Some(path) = slot.as_ref() {
            return Ok(path.clone());
        }
        let path = sandbox.init(self.id).await?;
        *slot = Some(path.clone());
        Ok(path)
    }
}

/// Bounded handoff of reusable boxes with IDs `1..=size`. Acquisition blocks
/// until a box frees up or shutdown is signalled.
pub struct BoxPool {
    handles: Mutex<VecDeque<Arc<BoxHandle>>>,
    notify: Notify,
}

impl BoxPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let handles = (1..=size as u64).map(|id| Arc::new(BoxHandle::new(id))).collect();
        Self {
            handles: Mutex::new(handles),
            notify: Notify::new(),
        }
    }

    /// Takes a box out of the pool, lazily initializing it. The box goes
    /// back to the pool when the returned guard drops; an init failure
    /// returns it immediately and propagates the error.
    pub async fn acquire(
        &self,
        sandbox: &dyn Sandbox,
        token: &CancellationToken,
    ) -> Result<PooledBox<'_>> {
        let handle = loop {
            if let Some(handle) = self.handles.lock().unwrap().pop_front() {
                break handle;
            }
            tokio::select! {
                _ = token.cancelled() => return Err(anyhow!("shutdown while waiting for a box")),
                _ = self.notify.notified() => {}
            }
        };
        match handle.ensure_init(sandbox).await {
            Ok(path) => Ok(PooledBox {
                pool: self,
                handle: Some(handle),
                path,
            }),
            Err(e) => {
                self.release(handle);
                Err(e)
            }
        }
    }

    fn release(&self, handle: Arc<BoxHandle>) {
        self.handles.lock().unwrap().push_back(handle);
        self.notify.notify_one();
    }
}

/// Scoped box acquisition; dropping it returns the box to the pool.
pub struct PooledBox<'a> {
    pool: &'a BoxPool,
    handle: Option<Arc<BoxHandle>>,
    path: PathBuf,
}

impl PooledBox<'_> {
    pub fn id(&self) -> u64 {
        self.handle.as_ref().map(|h| h.id).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PooledBox<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}
