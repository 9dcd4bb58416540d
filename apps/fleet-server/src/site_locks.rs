use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-site serialisation for polls and status reports. Entries are
/// refcounted and dropped once no caller holds or waits on them.
#[derive(Default)]
pub(crate) struct SiteLocks {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    refs: AtomicUsize,
}

impl SiteLocks {
    pub(crate) async fn acquire(self: &Arc<Self>, site_id: &str) -> SiteGuard {
        let slot = {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = map
                .entry(site_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        lock: Arc::new(AsyncMutex::new(())),
                        refs: AtomicUsize::new(0),
                    })
                })
                .clone();
            slot.refs.fetch_add(1, Ordering::AcqRel);
            slot
        };
        // Counted from here on, so a caller dropped while waiting still
        // releases its reference.
        let slot = SlotRef {
            locks: Arc::clone(self),
            site_id: site_id.to_string(),
            slot,
        };
        let guard = Arc::clone(&slot.slot.lock).lock_owned().await;
        SiteGuard {
            _guard: guard,
            _slot: slot,
        }
    }

    fn release(&self, site_id: &str, slot: &Arc<Slot>) {
        let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slot.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(existing) = map.get(site_id) {
                if Arc::ptr_eq(existing, slot) {
                    map.remove(site_id);
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|m| m.len()).unwrap_or_default()
    }
}

struct SlotRef {
    locks: Arc<SiteLocks>,
    site_id: String,
    slot: Arc<Slot>,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        self.locks.release(&self.site_id, &self.slot);
    }
}

/// Held for the duration of one request. Fields drop in order: the lock
/// is released before the map reference.
pub(crate) struct SiteGuard {
    _guard: OwnedMutexGuard<()>,
    _slot: SlotRef,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_site_is_serialised() {
        let locks = Arc::new(SiteLocks::default());
        let first = locks.acquire("site-a").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire("site-a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // Other sites are not blocked.
        let other = tokio::time::timeout(Duration::from_millis(200), locks.acquire("site-b"))
            .await
            .expect("independent site");
        drop(other);

        drop(first);
        waiter.await.expect("waiter");
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_entry() {
        let locks = Arc::new(SiteLocks::default());
        let held = locks.acquire("site-a").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire("site-a")).await;
        assert!(waited.is_err(), "lock is held");
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.len(), 0);
        let again = tokio::time::timeout(Duration::from_millis(200), locks.acquire("site-a"))
            .await
            .expect("free after cancellation");
        drop(again);
        assert_eq!(locks.len(), 0);
    }
}
