// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Generic thread-safe shared list for live-refreshable discovery results.
//!
//! [`Shared<T>`] wraps `Arc<RwLock<Arc<[T]>>>` for cheap snapshot reads and
//! atomic batch replacement.  The engine and the host API hold clones of the
//! same instance, so `reload_custom_commands` updates both without tearing
//! down the agent.

use std::sync::{Arc, RwLock};

pub struct Shared<T: Send + Sync + 'static>(Arc<RwLock<Arc<[T]>>>);

impl<T: Send + Sync + 'static> Shared<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(Arc::new(RwLock::new(items.into_boxed_slice().into())))
    }

    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Cheap snapshot; valid until the next [`set`][Self::set].
    #[must_use]
    pub fn get(&self) -> Arc<[T]> {
        self.0.read().expect("Shared lock poisoned").clone()
    }

    /// Atomically replace the contents.  Existing snapshots keep the old data.
    pub fn set(&self, items: Vec<T>) {
        let new: Arc<[T]> = items.into_boxed_slice().into();
        *self.0.write().expect("Shared lock poisoned") = new;
    }
}

impl<T: Send + Sync + 'static> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.0.read().map(|g| g.len()).unwrap_or(0);
        write!(f, "Shared({len} items)")
    }
}

impl<T: Send + Sync + 'static> Default for Shared<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_survive_replacement() {
        let shared = Shared::new(vec![1, 2]);
        let old = shared.get();
        shared.set(vec![3]);
        assert_eq!(&*old, &[1, 2]);
        assert_eq!(&*shared.get(), &[3]);
    }

    #[test]
    fn clones_see_updates() {
        let a = Shared::empty();
        let b = a.clone();
        a.set(vec!["x"]);
        assert_eq!(&*b.get(), &["x"]);
    }
}
