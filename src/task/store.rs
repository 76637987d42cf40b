//! SurrealDB-backed task records.
//!
//! Lifecycle fields are never written by read-modify-write of the whole record: each operation
//! is a single conditional `UPDATE`, so a transition only lands when the stored status allows it
//! and progress writes cannot clobber unrelated fields.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use surrealdb::{Surreal, engine::any::Any};
use tracing::{debug, info, instrument, trace, warn};
use ulid::Ulid;

use super::{ImportTask, PendingAction, TaskStatus};
use crate::import::{ImportError, Result};

const TASK_TABLE: &str = "import_task";
const IMAGE_TABLE: &str = "image_upload";

/// A downloaded file belonging to a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub task: Ulid,
    pub image: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TaskStore {
    db: Surreal<Any>,
    data_dir: PathBuf,
}

impl TaskStore {
    pub fn new(db: Surreal<Any>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn create_task(&self) -> Result<ImportTask> {
        let id = Ulid::new();
        let task = ImportTask::new(id, self.data_dir.join("tasks").join(id.to_string()));
        let created: Option<ImportTask> = self
            .db
            .create((TASK_TABLE, id.to_string()))
            .content(task.clone())
            .await?;
        info!(task = %id, "Created import task");
        Ok(created.unwrap_or(task))
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, id: Ulid) -> Result<Option<ImportTask>> {
        let task = self.db.select((TASK_TABLE, id.to_string())).await?;
        trace!(task = %id, found = task.is_some(), "Looked up task");
        Ok(task)
    }

    pub async fn require(&self, id: Ulid) -> Result<ImportTask> {
        self.get(id).await?.ok_or(ImportError::TaskNotFound(id))
    }

    /// Create the working directory tree of a task. Safe to call repeatedly.
    pub async fn create_directories(&self, task: &ImportTask) -> Result<()> {
        tokio::fs::create_dir_all(&task.working_dir).await?;
        debug!(task = %task.task_id, dir = ?task.working_dir, "Task directories ready");
        Ok(())
    }

    /// Prepare a task for a new run of `file_count` files.
    #[instrument(level = "debug", skip(self))]
    pub async fn begin_import(&self, id: Ulid, file_count: usize) -> Result<ImportTask> {
        let patch = json!({
            "status": TaskStatus::Importing,
            "pending_action": PendingAction::Import,
            "images_count": file_count,
            "upload_progress": 0.0,
            "partial": true,
            "processing_time": -1,
            "last_error": null,
        });
        let task = match self
            .transition(id, &TaskStatus::STARTABLE, TaskStatus::Importing, patch)
            .await
        {
            Err(ImportError::InvalidTransition { from, .. }) if from == TaskStatus::Importing => {
                return Err(ImportError::AlreadyImporting(id));
            }
            other => other?,
        };
        self.create_directories(&task).await?;
        self.append_console(id, &format!("Importing {file_count} images...")).await?;
        info!(task = %id, files = file_count, "Import started");
        Ok(task)
    }

    /// Write the completed fraction.
    ///
    /// Only lands while the task is importing and never lowers the stored value. Returns whether
    /// the write was applied.
    #[instrument(level = "trace", skip(self))]
    pub async fn set_progress(&self, id: Ulid, progress: f64) -> Result<bool> {
        let progress = progress.clamp(0.0, 1.0);
        let mut response = self
            .db
            .query(
                "UPDATE type::thing($tb, $id) SET upload_progress = $progress \
                 WHERE status = $status AND upload_progress <= $progress",
            )
            .bind(("tb", TASK_TABLE))
            .bind(("id", id.to_string()))
            .bind(("progress", progress))
            .bind(("status", TaskStatus::Importing))
            .await?;
        let updated: Vec<ImportTask> = response.take(0)?;
        if updated.is_empty() {
            debug!(task = %id, progress, "Progress update not applied");
        }
        Ok(!updated.is_empty())
    }

    /// `Importing → Complete`: ready for the next stage
    #[instrument(level = "debug", skip(self))]
    pub async fn complete(&self, id: Ulid) -> Result<ImportTask> {
        let patch = json!({
            "status": TaskStatus::Complete,
            "pending_action": null,
            "partial": false,
            "processing_time": 0,
        });
        let task = self
            .transition(id, &[TaskStatus::Importing], TaskStatus::Complete, patch)
            .await?;
        info!(task = %id, "Task complete");
        Ok(task)
    }

    /// `Importing → Cancelled`
    #[instrument(level = "debug", skip(self))]
    pub async fn cancel(&self, id: Ulid) -> Result<ImportTask> {
        let patch = json!({
            "status": TaskStatus::Cancelled,
            "pending_action": null,
        });
        let task = self
            .transition(id, &[TaskStatus::Importing], TaskStatus::Cancelled, patch)
            .await?;
        self.append_console(id, "Import cancelled").await?;
        info!(task = %id, "Task cancelled");
        Ok(task)
    }

    /// `Importing → Failed`, keeping whatever the run already imported
    #[instrument(level = "debug", skip(self))]
    pub async fn fail(&self, id: Ulid, reason: &str) -> Result<ImportTask> {
        let patch = json!({
            "status": TaskStatus::Failed,
            "pending_action": null,
            "last_error": reason,
        });
        let task = self
            .transition(id, &[TaskStatus::Importing], TaskStatus::Failed, patch)
            .await?;
        self.append_console(id, &format!("Import failed: {reason}")).await?;
        warn!(task = %id, reason, "Task failed");
        Ok(task)
    }

    pub async fn append_console(&self, id: Ulid, line: &str) -> Result<()> {
        self.db
            .query("UPDATE type::thing($tb, $id) SET console_output += $line")
            .bind(("tb", TASK_TABLE))
            .bind(("id", id.to_string()))
            .bind(("line", line.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn add_image(&self, id: Ulid, image: &Path) -> Result<ImageRecord> {
        let record = ImageRecord {
            task: id,
            image: image.to_path_buf(),
            created_at: Utc::now(),
        };
        let created: Option<ImageRecord> =
            self.db.create(IMAGE_TABLE).content(record.clone()).await?;
        Ok(created.unwrap_or(record))
    }

    pub async fn images(&self, id: Ulid) -> Result<Vec<ImageRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM type::table($tb) WHERE task = $task ORDER BY created_at")
            .bind(("tb", IMAGE_TABLE))
            .bind(("task", id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Apply `patch` if the stored status is one of `from`
    async fn transition(
        &self,
        id: Ulid,
        from: &[TaskStatus],
        to: TaskStatus,
        patch: serde_json::Value,
    ) -> Result<ImportTask> {
        let mut response = self
            .db
            .query("UPDATE type::thing($tb, $id) MERGE $patch WHERE status IN $from RETURN AFTER")
            .bind(("tb", TASK_TABLE))
            .bind(("id", id.to_string()))
            .bind(("patch", patch))
            .bind(("from", from.to_vec()))
            .await?;
        let updated: Vec<ImportTask> = response.take(0)?;

        match updated.into_iter().next() {
            Some(task) => {
                debug!(task = %id, status = %to, "Task transitioned");
                Ok(task)
            }
            None => {
                let current = self.require(id).await?;
                Err(ImportError::InvalidTransition {
                    task: id,
                    from: current.status,
                    to,
                })
            }
        }
    }
}
