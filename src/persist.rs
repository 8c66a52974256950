// ABOUTME: Debounced cache store writer with a periodic flush backstop.
// ABOUTME: One task owns the write path, so at most one persist is in flight.

use crate::store::CacheStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// Quiet period after the last mutation before a snapshot is written.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);

/// Backstop flush period, so a long trickle of mutations (or a missed dirty
/// signal) still reaches disk.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Handle for scheduling persists of a shared [`CacheStore`].
///
/// Cloning shares the same background task. Dropping every clone flushes one
/// final snapshot and stops the task.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<()>,
}

impl StoreWriter {
    pub fn spawn(store: Arc<Mutex<CacheStore>>, path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(store, path, rx));
        Self { tx }
    }

    /// Arm (or re-arm) the debounced persist.
    pub fn mark_dirty(&self) {
        let _ = self.tx.send(());
    }
}

async fn write_loop(
    store: Arc<Mutex<CacheStore>>,
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    let mut flush = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Single armed deadline: dirty signals and flush ticks both re-arm it, so
    // bursts coalesce into one write fired after the quiet period.
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            dirty = rx.recv() => match dirty {
                Some(()) => deadline = Some(Instant::now() + DEBOUNCE_WINDOW),
                None => {
                    persist_snapshot(&store, &path);
                    break;
                }
            },
            _ = flush.tick() => {
                deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
            }
            _ = wait_for(deadline), if deadline.is_some() => {
                deadline = None;
                persist_snapshot(&store, &path);
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Clone the store under its lock and write the snapshot. Write failures are
/// logged and swallowed; the in-memory state stays dirty-equivalent and the
/// next tick retries.
fn persist_snapshot(store: &Arc<Mutex<CacheStore>>, path: &Path) {
    let snapshot = match store.lock() {
        Ok(guard) => guard.clone(),
        Err(e) => {
            tracing::error!(error = %e, "Cache store mutex poisoned, skipping persist");
            return;
        }
    };

    match snapshot.persist(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Cache store persisted"),
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Failed to persist cache store")
        }
    }
}
