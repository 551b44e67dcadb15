use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::types::{DependencyKey, Instance};

/// Temporary substitutions, consulted before any cache
///
/// Each key has its own stack, the topmost entry wins. Entries are removed by id so that
/// guards dropped out of order never remove someone else's substitution.
#[derive(Default)]
pub(crate) struct OverrideStack {
    entries: RwLock<HashMap<DependencyKey, Vec<(u64, Instance)>>>,
    next_id: AtomicU64,
    active: AtomicUsize,
}
impl OverrideStack {
    pub fn push(&self, key: DependencyKey, instance: Instance) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_default().push((id, instance));
        self.active.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Override pushed for '{}'", key);
        id
    }

    pub fn pop(&self, key: &DependencyKey, id: u64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(stack) = entries.get_mut(key) else {
            return;
        };
        if let Some(position) = stack.iter().rposition(|(entry_id, _)| *entry_id == id) {
            stack.remove(position);
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("Override popped for '{}'", key);
        }
        if stack.is_empty() {
            entries.remove(key);
        }
    }

    pub fn top(&self, key: &DependencyKey) -> Option<Instance> {
        if self.is_empty() {
            return None;
        }
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .and_then(|stack| stack.last())
            .map(|(_, instance)| instance.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.active.load(Ordering::Acquire) == 0
    }
}

/// Keeps an override in effect until dropped
///
/// Returned by `Container::override_with`. Dropping the guard restores whatever the key resolved
/// to before, including an outer override of the same key.
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct OverrideGuard {
    pub(crate) stack: Arc<OverrideStack>,
    pub(crate) key: DependencyKey,
    pub(crate) id: u64,
}
impl OverrideGuard {
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }
}
impl Drop for OverrideGuard {
    fn drop(&mut self) {
        self.stack.pop(&self.key, self.id);
    }
}
