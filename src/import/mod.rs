//! Bulk dataset import pipeline.
//!
//! An import run takes an [`ImportCarrier`] (an optional registry token plus the ordered list of
//! files resolved from a DroneDB folder) and materializes every file inside the working
//! directory of an [`ImportTask`](crate::task::ImportTask):
//!
//! - [`fetcher`] streams one remote file to disk
//! - [`progress`] persists the completed fraction onto the task
//! - [`cancel`] answers "has this run been asked to stop?"
//! - [`coordinator`] drives the per-file loop and classifies failures
//! - [`queue`] dispatches runs in the background and supervises their outcome
//!

use std::{path::Component, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::task::TaskStatus;
use fetcher::FetchError;

pub mod cancel;
pub mod coordinator;
pub mod fetcher;
pub mod progress;
pub mod queue;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Task {0} not found")]
    TaskNotFound(Ulid),

    #[error("Task {0} already has an import in progress")]
    AlreadyImporting(Ulid),

    #[error("Task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: Ulid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid file name {0:?}: must be a plain file name")]
    InvalidFileName(String),

    #[error("Invalid URL for {name}: {url}")]
    InvalidUrl { name: String, url: String },

    /// A transfer failed on the network side. Fatal for the whole run.
    #[error("Node server error while fetching {file}: {source}")]
    NodeServer {
        file: String,
        #[source]
        source: FetchError,
    },

    /// The destination could not be written. Fatal for the whole run.
    #[error("Local storage error while writing {file}: {source}")]
    LocalStorage {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up the HTTP client: {0}")]
    HttpClient(#[source] FetchError),

    #[error("Import did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] surrealdb::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Import run did not finish: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Mutex error: {0}")]
    MutexError(String),
}

impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for ImportError {
    fn from(err: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        ImportError::MutexError(err.to_string())
    }
}

impl ImportError {
    /// Classify a fetch failure for `file`. Cancellation is not an error and never reaches here.
    pub fn from_fetch(file: &str, err: FetchError) -> Self {
        match err {
            FetchError::Io(source) => Self::LocalStorage {
                file: file.to_string(),
                source,
            },
            source => Self::NodeServer {
                file: file.to_string(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// One remote file: where to fetch it and what to call it locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub url: String,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Reject names that are not a single normal path component, and unparsable URLs.
    ///
    /// Names come from a remote registry, so anything that could resolve outside the task's
    /// working directory (`..`, separators, absolute paths) is refused.
    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal || self.name.contains(['/', '\\']) {
            return Err(ImportError::InvalidFileName(self.name.clone()));
        }

        match url::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            _ => Err(ImportError::InvalidUrl {
                name: self.name.clone(),
                url: self.url.clone(),
            }),
        }
    }
}

/// Token and file list handed over by the registry integration. Consumed by a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCarrier {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

impl ImportCarrier {
    pub fn new(token: Option<String>, files: Vec<FileDescriptor>) -> Self {
        Self { token, files }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate every descriptor before any work starts
    pub fn validate(&self) -> Result<()> {
        self.files.iter().try_for_each(FileDescriptor::validate)
    }

    /// Authorization header value, present only for a non-empty token
    pub fn authorization(&self, scheme: &str) -> Option<String> {
        self.token
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(|token| format!("{scheme} {token}"))
    }
}

/// How a run that did not hit a fatal error ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Every file was fetched and the task was finalized
    Completed { images: usize },
    /// The run was asked to stop; `images` files made it before it did
    Cancelled { images: usize },
}

impl ImportOutcome {
    pub fn images(&self) -> usize {
        match self {
            Self::Completed { images } | Self::Cancelled { images } => *images,
        }
    }
}
