//! Arena-style key→entry map with single-writer-per-key discipline.
//!
//! Each key owns one slot: an `Arc<tokio::sync::Mutex<T>>`. All reads and
//! writes of a key's entry happen under that key's async mutex, so writes
//! to one entry are serialized while distinct keys proceed fully in
//! parallel. The outer std `Mutex` guards only slot lookup/insertion and
//! is never held across an await point — there is no global lock that
//! could let one machine stall another.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Key→slot arena. `T` is the per-key entry state; a slot is created
/// with `T::default()` on first access.
pub(crate) struct Slots<K, T> {
    map: Mutex<HashMap<K, Arc<AsyncMutex<T>>>>,
}

impl<K: Eq + Hash + Clone, T: Default> Slots<K, T> {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `key`, created empty if this is the key's first access.
    pub(crate) fn slot(&self, key: &K) -> Arc<AsyncMutex<T>> {
        let mut map = self.map.lock().expect("slot map poisoned");
        Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(T::default()))),
        )
    }

    /// Slot for `key` only if it already exists. Push handlers use this
    /// so events for never-read keys stay no-ops.
    pub(crate) fn existing(&self, key: &K) -> Option<Arc<AsyncMutex<T>>> {
        self.map
            .lock()
            .expect("slot map poisoned")
            .get(key)
            .cloned()
    }

    /// All existing slots whose key matches `pred`, for machine-wide
    /// invalidation. The caller locks each returned slot individually.
    pub(crate) fn matching(&self, pred: impl Fn(&K) -> bool) -> Vec<(K, Arc<AsyncMutex<T>>)> {
        self.map
            .lock()
            .expect("slot map poisoned")
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_access_creates_default_entry() {
        let slots: Slots<String, Option<u32>> = Slots::new();
        let slot = slots.slot(&"a".to_string());
        assert_eq!(*slot.lock().await, None);
    }

    #[tokio::test]
    async fn same_key_returns_same_slot() {
        let slots: Slots<String, Option<u32>> = Slots::new();
        let key = "a".to_string();

        *slots.slot(&key).lock().await = Some(7);
        assert_eq!(*slots.slot(&key).lock().await, Some(7));
    }

    #[tokio::test]
    async fn existing_is_none_for_unknown_key() {
        let slots: Slots<String, Option<u32>> = Slots::new();
        assert!(slots.existing(&"nope".to_string()).is_none());
    }

    #[tokio::test]
    async fn matching_filters_by_key() {
        let slots: Slots<(String, String), Option<u32>> = Slots::new();
        slots.slot(&("m1".into(), "x".into()));
        slots.slot(&("m1".into(), "y".into()));
        slots.slot(&("m2".into(), "x".into()));

        let m1 = slots.matching(|(machine, _)| machine == "m1");
        assert_eq!(m1.len(), 2);
    }
}
