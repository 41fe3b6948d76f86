//! Per-user mutual exclusion.
//!
//! Multi-step flows for one user (grant, lifecycle transition, refund) run
//! under that user's lock so a renewal and a refund arriving together cannot
//! interleave. Locks are striped: distinct users may share a stripe, which
//! only costs some parallelism.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

use iap_guard_core::UserId;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// Striped async locks keyed by user id.
pub struct UserLocks {
    stripes: Vec<Mutex<()>>,
}

impl UserLocks {
    /// Create a lock table with `stripes` stripes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Acquire the lock for `user_id`. Not reentrant.
    pub async fn lock(&self, user_id: &UserId) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(user_id)].lock().await
    }

    fn stripe_for(&self, user_id: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        index
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
