//! # Scheduler — the storage scheduler
//!
//! A periodic, single-flight persistence and compaction orchestrator. On
//! every tick it persists each table's storage map, replica map and
//! maintained indexes (via [`storage::Table::persist`]) and then asks the
//! table's engine to run at most one compaction pass
//! ([`storage::Table::maybe_compact`]), in a fixed sorted order so its lock
//! acquisition pattern matches whatever external HTTP handlers also touch
//! tables (spec.md §5's "acquires table locks in a fixed sorted order to
//! avoid deadlock").
//!
//! The scheduler never holds a reference to the node's internal table map
//! directly — it is handed a [`TableProvider`] at construction so `node` can
//! own the actual registry without creating a dependency cycle.

mod guard;

use config::SchedulerConfig;
use guard::PersistGuard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::Table;

/// Supplies the scheduler with the set of tables to persist/compact and
/// whether the node is currently willing to have them touched at all.
///
/// `node::Node` is the only real implementor; a fake is used in this
/// crate's own tests to exercise the single-flight discipline without
/// pulling in the whole node-startup sequence.
pub trait TableProvider: Send + Sync {
    /// `false` before recovery completes or while the node is otherwise not
    /// cluster-ready; a tick is skipped entirely while this is `false`,
    /// matching spec.md §4.6 step 1.
    fn is_ready(&self) -> bool;

    /// Every table currently open, in no particular order — the scheduler
    /// sorts by `(database, table)` itself before visiting them.
    fn tables(&self) -> Vec<Arc<Table>>;
}

/// How a single tick went, for health reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The node was not ready; nothing was touched.
    SkippedNotReady,
    /// Another tick was already running; this one was a no-op.
    SkippedAlreadyRunning,
    /// The tick ran to completion. `failures` is the number of tables whose
    /// persist or compaction step logged an error (and was skipped).
    Ran { tables: usize, failures: usize },
}

/// The periodic, single-flight storage scheduler.
pub struct Scheduler<P: TableProvider> {
    config: SchedulerConfig,
    provider: Arc<P>,
    persist_in_progress: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl<P: TableProvider + 'static> Scheduler<P> {
    #[must_use]
    pub fn new(config: SchedulerConfig, provider: Arc<P>) -> Self {
        Self {
            config,
            provider,
            persist_in_progress: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `true` while a persistence tick (this one or a concurrent caller's)
    /// is currently running.
    #[must_use]
    pub fn is_persisting(&self) -> bool {
        self.persist_in_progress.load(Ordering::Acquire)
    }

    /// Runs the single-flight persistence-and-compaction body described in
    /// spec.md §4.6. Safe to call from any number of threads concurrently —
    /// exactly one caller's body executes per overlapping window; the rest
    /// return [`TickOutcome::SkippedAlreadyRunning`] immediately.
    pub fn perform_persist_to_disk(&self) -> TickOutcome {
        if !self.provider.is_ready() {
            return TickOutcome::SkippedNotReady;
        }

        if self
            .persist_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickOutcome::SkippedAlreadyRunning;
        }
        // Cleared on every exit path, including a panicking table persist,
        // by `PersistGuard`'s `Drop` — the "guaranteed-cleanup region" named
        // in spec.md §4.6 step 5 (Rust has no try/finally, so this is the
        // idiomatic stand-in).
        let _guard = PersistGuard::new(Arc::clone(&self.persist_in_progress));

        let mut tables = self.provider.tables();
        tables.sort_by(|a, b| (a.database(), a.name()).cmp(&(b.database(), b.name())));

        let mut failures = 0usize;
        for table in &tables {
            if let Err(e) = table.persist() {
                tracing::error!(
                    database = table.database(),
                    table = table.name(),
                    error = %e,
                    "failed to persist table, skipping to next table"
                );
                failures += 1;
                continue;
            }
            if let Err(e) = table.maybe_compact() {
                tracing::error!(
                    database = table.database(),
                    table = table.name(),
                    error = %e,
                    "compaction pass failed"
                );
                failures += 1;
            }
        }

        TickOutcome::Ran {
            tables: tables.len(),
            failures,
        }
    }

    /// Spawns the dedicated single-threaded periodic loop described in
    /// spec.md §5 ("single-threaded periodic executor"). Returns a
    /// [`SchedulerHandle`] the owner uses to request a clean stop.
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        let scheduler = Arc::clone(self);
        let stop = Arc::clone(&self.stop);
        let interval = self.config.tick_interval;
        let join = std::thread::Builder::new()
            .name("riptide-scheduler".into())
            .spawn(move || {
                let poll = Duration::from_millis(50).min(interval);
                loop {
                    let mut waited = Duration::ZERO;
                    while waited < interval {
                        if stop.load(Ordering::Acquire) {
                            return;
                        }
                        std::thread::sleep(poll);
                        waited += poll;
                    }
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    match scheduler.perform_persist_to_disk() {
                        TickOutcome::Ran { tables, failures } if failures > 0 => {
                            tracing::warn!(tables, failures, "persistence tick completed with errors");
                        }
                        _ => {}
                    }
                }
            })
            .expect("failed to spawn scheduler thread");

        SchedulerHandle {
            stop: Arc::clone(&self.stop),
            join: Some(join),
        }
    }

    /// Called from the shutdown path: waits (bounded by
    /// `config.shutdown_wait`) for any in-flight tick to finish, then runs
    /// its own persistence pass synchronously regardless of whether the
    /// wait succeeded, per spec.md §4.6's shutdown participation.
    pub fn shutdown_persist(&self) -> TickOutcome {
        let deadline = Instant::now() + self.config.shutdown_wait;
        while self.is_persisting() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.perform_persist_to_disk()
    }
}

/// Handle returned by [`Scheduler::spawn`]; dropping it does not stop the
/// thread (use [`SchedulerHandle::stop`] explicitly) so the scheduler keeps
/// ticking for the lifetime of the node even if the handle itself is
/// dropped early by a caller that only wanted to fire-and-forget it.
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals the periodic thread to stop after its current sleep slice
    /// and blocks until it exits.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
