//! Background dispatch of import runs
//!
//! Enqueueing prepares the task, starts the run on the tokio runtime and returns right away with
//! a handle. The queue supervises the run: a fatal error moves the task to `Failed`.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

use super::{
    ImportCarrier, ImportOutcome, Result, cancel::CancellationMonitor,
    coordinator::ImportCoordinator,
};

/// Handle returned to the caller for cancelling and awaiting a run
#[derive(Debug)]
pub struct ImportHandle {
    pub task_id: Ulid,
    monitor: CancellationMonitor,
    join: JoinHandle<Result<ImportOutcome>>,
}

impl ImportHandle {
    pub fn cancel(&self) {
        self.monitor.request();
    }

    pub fn is_cancelled(&self) -> bool {
        self.monitor.is_requested()
    }

    /// Wait for the run to end. Must not be called again once it has returned.
    pub async fn wait(&mut self) -> Result<ImportOutcome> {
        (&mut self.join).await?
    }
}

#[derive(Clone)]
pub struct ImportQueue {
    coordinator: Arc<ImportCoordinator>,
    runs: Arc<Mutex<BTreeMap<Ulid, CancellationMonitor>>>,
}

impl ImportQueue {
    pub fn new(coordinator: ImportCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            runs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Prepare the task for `carrier` and start importing in the background.
    ///
    /// Fails without starting anything if the carrier is invalid, the task does not exist or
    /// the task already has a run in flight.
    pub async fn enqueue(&self, task_id: Ulid, carrier: ImportCarrier) -> Result<ImportHandle> {
        carrier.validate()?;
        self.coordinator
            .store()
            .begin_import(task_id, carrier.files.len())
            .await?;

        let monitor = CancellationMonitor::new();
        self.runs.lock()?.insert(task_id, monitor.clone());
        info!(task = %task_id, files = carrier.files.len(), "Import queued");

        let coordinator = self.coordinator.clone();
        let runs = self.runs.clone();
        let run_monitor = monitor.clone();
        let join = tokio::spawn(
            async move {
                let result = coordinator.run(task_id, carrier, &run_monitor).await;

                if let Err(err) = &result {
                    error!(error = %err, "Import failed");
                    if let Err(e) = coordinator.store().fail(task_id, &err.to_string()).await {
                        warn!(error = %e, "Could not mark task as failed");
                    }
                }

                match runs.lock() {
                    Ok(mut runs) => {
                        runs.remove(&task_id);
                    }
                    Err(e) => warn!(error = %e, "Import registry poisoned"),
                }
                result
            }
            .instrument(info_span!("import_task", task = %task_id)),
        );

        Ok(ImportHandle {
            task_id,
            monitor,
            join,
        })
    }

    /// Request cancellation of the run importing `task_id`
    pub fn cancel(&self, task_id: &Ulid) -> Result<bool> {
        let runs = self.runs.lock()?;
        match runs.get(task_id) {
            Some(monitor) => {
                info!(task = %task_id, "Cancelling import");
                monitor.request();
                Ok(true)
            }
            None => {
                warn!(task = %task_id, "Attempted to cancel an import that is not running");
                Ok(false)
            }
        }
    }

    /// Tasks with a run in flight
    pub fn active(&self) -> Result<Vec<Ulid>> {
        Ok(self.runs.lock()?.keys().copied().collect())
    }
}
