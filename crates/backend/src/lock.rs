use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;

/// Mutual exclusion partitioned by string key.
///
/// Callers locking different keys never wait on each other. Callers locking
/// a key that is already held wait until the holder releases it; every
/// waiter is woken on release and they race for the key again.
#[derive(Debug, Clone, Default)]
pub struct KeyLock {
    held: Arc<DashMap<String, Arc<Notify>>>,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key`, waiting while another caller holds it.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        loop {
            let notify = match self.held.entry(key.to_owned()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(Notify::new()));
                    return self.guard(key);
                }
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            };

            // Register as a waiter before checking the key again, so a
            // release that lands in between still wakes this task.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let still_held = self
                .held
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &notify));
            if still_held {
                notified.await;
            }
        }
    }

    /// Take the lock for `key` only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        match self.held.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Notify::new()));
                Some(self.guard(key))
            }
            Entry::Occupied(_) => None,
        }
    }

    /// Returns true if some caller holds `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }

    fn guard(&self, key: &str) -> KeyGuard {
        KeyGuard {
            held: Arc::clone(&self.held),
            key: key.to_owned(),
        }
    }
}

/// A held key lock. The key is released when the guard is dropped.
#[derive(Debug)]
pub struct KeyGuard {
    held: Arc<DashMap<String, Arc<Notify>>>,
    key: String,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the key explicitly.
    pub fn unlock(self) {}
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if let Some((_, notify)) = self.held.remove(&self.key) {
            notify.notify_waiters();
        }
    }
}
