//! Import tasks and their lifecycle.
//!
//! A task moves `PendingImport → Importing → {Complete, Failed, Cancelled}`. Every write goes
//! through [`TaskStore`], which only applies a transition when the stored status allows it.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

mod store;

pub use store::{ImageRecord, TaskStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, nothing imported yet
    #[default]
    PendingImport,
    /// A run is in flight; the only state in which progress may be written
    Importing,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// States a fresh run may start from
    pub const STARTABLE: [TaskStatus; 4] = [
        Self::PendingImport,
        Self::Complete,
        Self::Failed,
        Self::Cancelled,
    ];
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingImport => write!(f, "PendingImport"),
            Self::Importing => write!(f, "Importing"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Background operation currently holding the task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportTask {
    pub task_id: Ulid,
    pub status: TaskStatus,
    pub pending_action: Option<PendingAction>,
    /// Fraction of files completed, in `[0.0, 1.0]`
    pub upload_progress: f64,
    pub images_count: usize,
    /// Not yet fully materialized
    pub partial: bool,
    /// Milliseconds spent processing; `-1` until the task reaches the next stage
    pub processing_time: i64,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub console_output: Vec<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImportTask {
    pub fn new(task_id: Ulid, working_dir: PathBuf) -> Self {
        Self {
            task_id,
            status: TaskStatus::PendingImport,
            pending_action: None,
            upload_progress: 0.0,
            images_count: 0,
            partial: true,
            processing_time: -1,
            working_dir,
            console_output: Vec::new(),
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Destination of a downloaded file inside the working directory
    pub fn task_path(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    pub fn is_importing(&self) -> bool {
        self.status == TaskStatus::Importing
    }
}
