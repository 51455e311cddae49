//! RAII guard that always clears `persist_in_progress`, even if a table's
//! `persist()`/`maybe_compact()` call panics — Rust has no try/finally, so
//! `Drop` is the idiomatic stand-in for spec.md §4.6's "guaranteed-cleanup
//! region".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct PersistGuard {
    flag: Arc<AtomicBool>,
}

impl PersistGuard {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl Drop for PersistGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
