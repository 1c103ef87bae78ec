//! [`LeaseMutex`]: one named lock bound to one holder identity.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shardlock_types::HolderId;
use tracing::{info, warn};

use crate::error::{MutexError, MutexResult};
use crate::record::LockRecord;
use crate::table::{lease_millis, validate_holder, MutexTable};

/// A named lease lock as seen by a single holder.
///
/// The primitives ([`lock`](Self::lock), [`release`](Self::release)) answer
/// with booleans. [`acquire`](Self::acquire) and [`scoped`](Self::scoped)
/// turn a refused lock into [`MutexError::NotAcquired`] and guarantee a
/// release attempt on every exit path.
#[derive(Debug)]
pub struct LeaseMutex {
    table: MutexTable,
    name: String,
    holder: HolderId,
    lease: Duration,
    locked: AtomicBool,
}

impl LeaseMutex {
    /// Bind `name` to `holder`. Invalid names, holders or leases fail here,
    /// before any store access.
    pub fn new(
        table: MutexTable,
        name: impl Into<String>,
        holder: HolderId,
        lease: Duration,
    ) -> MutexResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MutexError::InvalidName);
        }
        validate_holder(holder.as_str())?;
        lease_millis(lease)?;
        Ok(Self {
            table,
            name,
            holder,
            lease,
            locked: AtomicBool::new(false),
        })
    }

    /// Like [`new`](Self::new) with a random holder identity.
    pub fn with_random_holder(
        table: MutexTable,
        name: impl Into<String>,
        lease: Duration,
    ) -> MutexResult<Self> {
        Self::new(table, name, HolderId::random(), lease)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Whether this holder believes it holds the lock. The store is the
    /// authority; see [`raw_lock`](Self::raw_lock).
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// The lock row as currently stored.
    pub async fn raw_lock(&self) -> MutexResult<Option<LockRecord>> {
        self.table.get_lock(&self.name).await
    }

    /// Try once to take the lock. Never waits.
    ///
    /// Expired leases are pruned first; a failed prune is logged and ignored.
    pub async fn lock(&self) -> MutexResult<bool> {
        if let Err(e) = self.table.prune_expired(&self.name, self.holder.as_str()).await {
            warn!(lock = %self.name, error = %e, "prune before lock failed");
        }
        let locked = self
            .table
            .write_lock_item(&self.name, self.holder.as_str(), self.lease)
            .await?;
        self.locked.store(locked, Ordering::SeqCst);
        info!(lock = %self.name, holder = %self.holder, locked, "mutex lock");
        Ok(locked)
    }

    /// Give the lock back. `false` means another holder owns it now.
    pub async fn release(&self) -> MutexResult<bool> {
        let released = self
            .table
            .clear_lock_item(&self.name, self.holder.as_str())
            .await?;
        self.locked.store(!released, Ordering::SeqCst);
        info!(lock = %self.name, holder = %self.holder, locked = !released, "mutex release");
        Ok(released)
    }

    /// Take the lock or fail with [`MutexError::NotAcquired`].
    ///
    /// The returned guard should be released explicitly with
    /// [`LeaseGuard::release`]. A guard dropped without release (early
    /// return, panic, cancelled future) schedules the release on the current
    /// Tokio runtime; the lease bounds the damage if there is none.
    pub async fn acquire(&self) -> MutexResult<LeaseGuard<'_>> {
        if !self.lock().await? {
            return Err(MutexError::NotAcquired {
                name: self.name.clone(),
            });
        }
        Ok(LeaseGuard {
            mutex: self,
            released: false,
        })
    }

    /// Run `body` while holding the lock, releasing afterwards.
    ///
    /// The body's output is returned whether or not the release succeeded;
    /// a lost release only means the lease had already passed to someone
    /// else and is logged.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> MutexResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let output = body().await;
        if let Err(e) = guard.release().await {
            warn!(lock = %self.name, error = %e, "release after scoped section failed");
        }
        Ok(output)
    }
}

/// Proof of a held lease, returned by [`LeaseMutex::acquire`].
#[derive(Debug)]
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LeaseGuard<'a> {
    mutex: &'a LeaseMutex,
    released: bool,
}

impl LeaseGuard<'_> {
    pub fn mutex(&self) -> &LeaseMutex {
        self.mutex
    }

    /// Release now. Returns the answer of [`LeaseMutex::release`].
    pub async fn release(mut self) -> MutexResult<bool> {
        self.released = true;
        self.mutex.release().await
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mutex = self.mutex;
        mutex.locked.store(false, Ordering::SeqCst);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let table = mutex.table.clone();
                let name = mutex.name.clone();
                let holder = mutex.holder.clone();
                warn!(lock = %name, holder = %holder, "lease guard dropped; releasing in background");
                handle.spawn(async move {
                    if let Err(e) = table.clear_lock_item(&name, holder.as_str()).await {
                        warn!(lock = %name, error = %e, "background release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %mutex.name, "lease guard dropped outside a runtime; lock will expire");
            }
        }
    }
}
