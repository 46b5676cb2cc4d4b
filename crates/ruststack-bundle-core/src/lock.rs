//! Path locking.
//!
//! [`LockingProvider`] is the seam to the locking backend; [`MemoryLockingProvider`]
//! is the in-process implementation used by the server. A path holds either any
//! number of shared locks or exactly one exclusive lock.
//!
//! [`LockGuard`] ties a held lock to a scope: whatever type the guard holds when
//! it is dropped is released, so every exit path of a commit unlocks.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{trace, warn};

/// Lock flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Concurrent holders allowed; blocks exclusive holders.
    Shared,
    /// Single holder; blocks everything else.
    Exclusive,
}

/// Errors returned by a [`LockingProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Another holder prevents the requested lock.
    #[error("\"{path}\" is locked")]
    Locked {
        /// The contended path.
        path: String,
    },

    /// The caller tried to convert a lock it does not hold.
    #[error("\"{path}\" does not hold a {lock_type:?} lock")]
    NotHeld {
        /// The path.
        path: String,
        /// The lock type the caller claimed to hold.
        lock_type: LockType,
    },
}

/// Locking backend.
pub trait LockingProvider: Send + Sync + fmt::Debug {
    /// Acquire a lock on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Locked`] if the lock conflicts with current holders.
    fn acquire(&self, path: &str, lock_type: LockType) -> Result<(), LockError>;

    /// Convert the caller's lock on `path` into `target`.
    ///
    /// Converting to exclusive requires the caller to be the only shared holder.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Locked`] if other holders prevent the conversion and
    /// [`LockError::NotHeld`] if the caller holds no convertible lock.
    fn change_lock(&self, path: &str, target: LockType) -> Result<(), LockError>;

    /// Release one lock of `lock_type` on `path`.
    fn release(&self, path: &str, lock_type: LockType);

    /// Whether `path` currently holds a lock of `lock_type`.
    fn is_locked(&self, path: &str, lock_type: LockType) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Shared(u32),
    Exclusive,
}

/// In-process locking provider backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryLockingProvider {
    locks: DashMap<String, LockState>,
}

impl MemoryLockingProvider {
    /// Create a provider with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths with at least one lock.
    #[must_use]
    pub fn locked_paths(&self) -> usize {
        self.locks.len()
    }
}

impl LockingProvider for MemoryLockingProvider {
    fn acquire(&self, path: &str, lock_type: LockType) -> Result<(), LockError> {
        match (self.locks.entry(path.to_owned()), lock_type) {
            (Entry::Vacant(slot), LockType::Shared) => {
                slot.insert(LockState::Shared(1));
            }
            (Entry::Vacant(slot), LockType::Exclusive) => {
                slot.insert(LockState::Exclusive);
            }
            (Entry::Occupied(mut held), LockType::Shared) => match *held.get() {
                LockState::Shared(n) => {
                    held.insert(LockState::Shared(n + 1));
                }
                LockState::Exclusive => return Err(locked(path)),
            },
            (Entry::Occupied(_), LockType::Exclusive) => return Err(locked(path)),
        }
        trace!(path, ?lock_type, "acquired lock");
        Ok(())
    }

    fn change_lock(&self, path: &str, target: LockType) -> Result<(), LockError> {
        let Entry::Occupied(mut held) = self.locks.entry(path.to_owned()) else {
            return Err(LockError::NotHeld {
                path: path.to_owned(),
                lock_type: opposite(target),
            });
        };

        match (*held.get(), target) {
            (LockState::Shared(1), LockType::Exclusive) => {
                held.insert(LockState::Exclusive);
            }
            (LockState::Shared(_) | LockState::Exclusive, LockType::Exclusive) => {
                return Err(locked(path));
            }
            (LockState::Exclusive, LockType::Shared) => {
                held.insert(LockState::Shared(1));
            }
            (LockState::Shared(_), LockType::Shared) => {
                return Err(LockError::NotHeld {
                    path: path.to_owned(),
                    lock_type: LockType::Exclusive,
                });
            }
        }
        trace!(path, ?target, "changed lock");
        Ok(())
    }

    fn release(&self, path: &str, lock_type: LockType) {
        let Entry::Occupied(mut held) = self.locks.entry(path.to_owned()) else {
            warn!(path, ?lock_type, "release of unlocked path");
            return;
        };

        match (*held.get(), lock_type) {
            (LockState::Shared(n), LockType::Shared) if n > 1 => {
                held.insert(LockState::Shared(n - 1));
            }
            (LockState::Shared(_), LockType::Shared)
            | (LockState::Exclusive, LockType::Exclusive) => {
                held.remove();
            }
            (state, _) => {
                warn!(path, ?lock_type, ?state, "release does not match held lock");
                return;
            }
        }
        trace!(path, ?lock_type, "released lock");
    }

    fn is_locked(&self, path: &str, lock_type: LockType) -> bool {
        self.locks.get(path).is_some_and(|state| {
            matches!(
                (*state, lock_type),
                (LockState::Shared(_), LockType::Shared)
                    | (LockState::Exclusive, LockType::Exclusive)
            )
        })
    }
}

fn locked(path: &str) -> LockError {
    LockError::Locked {
        path: path.to_owned(),
    }
}

fn opposite(lock_type: LockType) -> LockType {
    match lock_type {
        LockType::Shared => LockType::Exclusive,
        LockType::Exclusive => LockType::Shared,
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// A held lock that is released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    provider: Arc<dyn LockingProvider>,
    path: String,
    lock_type: LockType,
}

impl LockGuard {
    /// Acquire `lock_type` on `path`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`LockError`].
    pub fn acquire(
        provider: Arc<dyn LockingProvider>,
        path: &str,
        lock_type: LockType,
    ) -> Result<Self, LockError> {
        provider.acquire(path, lock_type)?;
        Ok(Self {
            provider,
            path: path.to_owned(),
            lock_type,
        })
    }

    /// Convert the held lock to `target`. A no-op if already held as `target`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`LockError`]; the original lock stays held.
    pub fn change(&mut self, target: LockType) -> Result<(), LockError> {
        if self.lock_type != target {
            self.provider.change_lock(&self.path, target)?;
            self.lock_type = target;
        }
        Ok(())
    }

    /// The lock type currently held.
    #[must_use]
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// The locked path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.provider.release(&self.path, self.lock_type);
    }
}
