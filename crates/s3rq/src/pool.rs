//! Reusable request handle pool
//!
//! A bounded LIFO stack of handles guarded by one mutex. The most
//! recently released handle is reused first so its keep-alive connection
//! has the best chance of still being open. The critical section covers
//! only the push/pop; handle reset and teardown happen outside the lock.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::transport::CachedConn;

pub(crate) const POOL_CAPACITY: usize = 32;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A pooled request handle. Per-request state is rebuilt on every
/// perform; the handle itself only carries the reusable connection.
#[derive(Debug)]
pub(crate) struct Handle {
    pub id: u64,
    pub conn: Option<CachedConn>,
}

impl Handle {
    fn new() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            conn: None,
        }
    }

    /// Prepares a pooled handle for reuse: a dead cached connection is
    /// discarded, a live one is kept for keep-alive.
    fn reset(&mut self) {
        if self.conn.as_ref().is_some_and(CachedConn::is_closed) {
            self.conn = None;
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct HandlePool {
    stack: Mutex<Vec<Handle>>,
}

impl HandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the most recently released handle, or makes a fresh one.
    pub fn acquire(&self) -> Handle {
        let popped = {
            let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
            stack.pop()
        };
        match popped {
            Some(mut handle) => {
                handle.reset();
                debug!(handle = handle.id, "reusing pooled request handle");
                handle
            }
            None => {
                let handle = Handle::new();
                debug!(handle = handle.id, "allocated new request handle");
                handle
            }
        }
    }

    /// Returns a handle to the pool, or drops it when the pool is full.
    pub fn release(&self, handle: Handle) {
        let overflow = {
            let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
            if stack.len() < POOL_CAPACITY {
                stack.push(handle);
                None
            } else {
                Some(handle)
            }
        };
        drop(overflow);
    }

    #[cfg(test)]
    pub fn size(&self) -> usize {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
