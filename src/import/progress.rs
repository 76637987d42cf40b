//! Completed-fraction accounting for an import run.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;
use ulid::Ulid;

use super::Result;
use crate::task::TaskStore;

/// Fraction of `total` represented by `completed`. An empty run is trivially complete.
pub fn fraction(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (completed.min(total) as f64) / (total as f64)
}

/// Counts finished files and persists the fraction onto the task.
///
/// The counter is atomic so concurrent fetches never lose an increment; the store refuses writes
/// that would lower the stored value, so out-of-order persistence keeps progress monotonic.
pub struct ProgressTracker {
    store: TaskStore,
    task_id: Ulid,
    total: usize,
    completed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(store: TaskStore, task_id: Ulid, total: usize) -> Self {
        Self {
            store,
            task_id,
            total,
            completed: AtomicUsize::new(0),
        }
    }

    /// Count one more finished file and persist the new fraction
    pub async fn file_done(&self) -> Result<f64> {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = fraction(completed, self.total);
        self.store.set_progress(self.task_id, progress).await?;

        if completed == self.total || completed % 10 == 0 {
            info!(
                task = %self.task_id,
                progress = format_args!("{}/{}", completed, self.total),
                "Import progress"
            );
        }
        Ok(progress)
    }

    /// Persist 1.0 for a run with nothing to fetch
    pub async fn finish_empty(&self) -> Result<()> {
        self.store
            .set_progress(self.task_id, fraction(0, self.total))
            .await?;
        Ok(())
    }
}
