//! Drives an import run from carrier to terminal task state.

use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures_util::{TryStreamExt, stream};
use tracing::{debug, error, info, instrument, warn};
use ulid::Ulid;

use super::{
    FileDescriptor, ImportCarrier, ImportError, ImportOutcome, Result,
    cancel::CancellationMonitor,
    fetcher::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT, FetchError, Fetcher},
    progress::ProgressTracker,
};
use crate::{
    config::ImportConfig,
    task::{ImportTask, TaskStatus, TaskStore},
};

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub fetch_timeout: Duration,
    pub chunk_size: usize,
    /// Files fetched at the same time. `1` keeps the strict one-after-another order.
    pub concurrency: usize,
    /// Budget for the whole run, unlimited when `None`
    pub import_timeout: Option<Duration>,
    pub auth_scheme: String,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 1,
            import_timeout: None,
            auth_scheme: "Token".to_string(),
        }
    }
}

impl From<&ImportConfig> for ImportSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            chunk_size: config.chunk_size,
            concurrency: config.concurrency(),
            import_timeout: config.import_timeout(),
            auth_scheme: config.auth_scheme.clone(),
        }
    }
}

/// Why the file loop stopped early
enum Halt {
    Cancelled,
    Fatal(ImportError),
}

impl From<ImportError> for Halt {
    fn from(err: ImportError) -> Self {
        Self::Fatal(err)
    }
}

/// Removes a destination file on drop unless it has been recorded as an image
struct PartialFile<'a> {
    path: &'a Path,
    keep: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Drop cannot await, and the run may be torn down mid-fetch
        match std::fs::remove_file(self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to remove partial download"),
        }
    }
}

pub struct ImportCoordinator {
    store: TaskStore,
    fetcher: Fetcher,
    settings: ImportSettings,
}

impl ImportCoordinator {
    pub fn new(store: TaskStore, settings: ImportSettings) -> Result<Self> {
        let fetcher = Fetcher::new(settings.fetch_timeout, settings.chunk_size)
            .map_err(ImportError::HttpClient)?;
        Ok(Self {
            store,
            fetcher,
            settings,
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Import every file of `carrier` into the task.
    ///
    /// The task must already be `Importing`. A successful run finalizes it as `Complete`, a
    /// cancelled one as `Cancelled`. A fatal error leaves the task in its last persisted state
    /// (images and progress written so far are kept) and is returned to the caller.
    #[instrument(name = "import", skip_all, fields(task = %task_id, files = carrier.files.len()))]
    pub async fn run(
        &self,
        task_id: Ulid,
        carrier: ImportCarrier,
        cancel: &CancellationMonitor,
    ) -> Result<ImportOutcome> {
        carrier.validate()?;

        let task = self.store.require(task_id).await?;
        if !task.is_importing() {
            return Err(ImportError::InvalidTransition {
                task: task_id,
                from: task.status,
                to: TaskStatus::Importing,
            });
        }
        self.store.create_directories(&task).await?;

        let authorization = carrier.authorization(&self.settings.auth_scheme);
        let files = carrier.files;
        info!("Will import {} files", files.len());

        let tracker = ProgressTracker::new(self.store.clone(), task_id, files.len());
        let images = AtomicUsize::new(0);
        let import = self.import_files(
            &task,
            &files,
            authorization.as_deref(),
            &tracker,
            &images,
            cancel,
        );

        let result = match self.settings.import_timeout {
            Some(limit) => tokio::time::timeout(limit, import)
                .await
                .unwrap_or(Err(Halt::Fatal(ImportError::DeadlineExceeded(limit)))),
            None => import.await,
        };
        let images = images.load(Ordering::SeqCst);

        match result {
            Ok(()) => {
                if files.is_empty() {
                    tracker.finish_empty().await?;
                }
                self.store.complete(task_id).await?;
                info!(images, "Import finished");
                Ok(ImportOutcome::Completed { images })
            }
            Err(Halt::Cancelled) => {
                self.store.cancel(task_id).await?;
                info!(images, "Import cancelled");
                Ok(ImportOutcome::Cancelled { images })
            }
            Err(Halt::Fatal(err)) => {
                error!(images, error = %err, "Import aborted");
                Err(err)
            }
        }
    }

    /// Run the files through at most `concurrency` fetches at a time, in carrier order.
    /// The first halt wins: nothing new is issued and in-flight fetches are dropped.
    async fn import_files(
        &self,
        task: &ImportTask,
        files: &[FileDescriptor],
        authorization: Option<&str>,
        tracker: &ProgressTracker,
        images: &AtomicUsize,
        cancel: &CancellationMonitor,
    ) -> std::result::Result<(), Halt> {
        stream::iter(files.iter().map(Ok))
            .try_for_each_concurrent(self.settings.concurrency.max(1), |file| {
                self.import_file(task, file, authorization, tracker, images, cancel)
            })
            .await
    }

    async fn import_file(
        &self,
        task: &ImportTask,
        file: &FileDescriptor,
        authorization: Option<&str>,
        tracker: &ProgressTracker,
        images: &AtomicUsize,
        cancel: &CancellationMonitor,
    ) -> std::result::Result<(), Halt> {
        if cancel.is_requested() {
            return Err(Halt::Cancelled);
        }

        let path = task.task_path(&file.name);
        debug!(file = %file.name, path = ?path, "Fetching file");
        // Also fires when this future is dropped by the run deadline or a failing sibling
        let partial = PartialFile::new(&path);

        if let Err(err) = self
            .fetcher
            .fetch(&file.url, &path, authorization, cancel)
            .await
        {
            return Err(match err {
                FetchError::Cancelled => Halt::Cancelled,
                err => Halt::Fatal(ImportError::from_fetch(&file.name, err)),
            });
        }

        self.store.add_image(task.task_id, &path).await?;
        partial.keep();
        images.fetch_add(1, Ordering::SeqCst);

        if cancel.is_requested() {
            return Err(Halt::Cancelled);
        }
        tracker.file_done().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        task::{PendingAction, TaskStatus},
    };
    use wiremock::{
        Mock, MockServer, Request, Respond, ResponseTemplate,
        matchers::{method, path},
    };

    struct Fixture {
        store: TaskStore,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            store: TaskStore::new(db::memory().await, dir.path()),
            _dir: dir,
        }
    }

    fn settings() -> ImportSettings {
        ImportSettings {
            fetch_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    async fn import_files(
        coordinator: &ImportCoordinator,
        task_id: Ulid,
        carrier: ImportCarrier,
    ) -> Result<ImportOutcome> {
        coordinator
            .run(task_id, carrier, &CancellationMonitor::new())
            .await
    }

    async fn started_task(store: &TaskStore, carrier: &ImportCarrier) -> Ulid {
        let id = store.create_task().await.unwrap().task_id;
        store.begin_import(id, carrier.files.len()).await.unwrap();
        id
    }

    async fn serve(server: &MockServer, name: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn carrier(server: &MockServer, names: &[&str], token: Option<&str>) -> ImportCarrier {
        ImportCarrier::new(
            token.map(String::from),
            names
                .iter()
                .map(|name| FileDescriptor::new(*name, format!("{}/{}", server.uri(), name)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_two_files_complete() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200).set_body_string("A")).await;
        serve(&server, "b.jpg", ResponseTemplate::new(200).set_body_string("B")).await;

        let carrier = carrier(&server, &["a.jpg", "b.jpg"], None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();

        let outcome = import_files(&coordinator, id, carrier).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Completed { images: 2 });

        let task = fx.store.require(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.upload_progress, 1.0);
        assert!(task.pending_action.is_none());
        assert!(!task.partial);
        assert_eq!(task.processing_time, 0);

        let images = fx.store.images(id).await.unwrap();
        let mut paths: Vec<_> = images.iter().map(|image| image.image.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec![task.task_path("a.jpg"), task.task_path("b.jpg")]);
        assert_eq!(tokio::fs::read_to_string(task.task_path("b.jpg")).await.unwrap(), "B");

        for request in server.received_requests().await.unwrap() {
            assert!(!request.headers.contains_key("authorization"));
        }
    }

    #[tokio::test]
    async fn test_token_sent_with_every_fetch() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200)).await;
        serve(&server, "b.jpg", ResponseTemplate::new(200)).await;

        let carrier = carrier(&server, &["a.jpg", "b.jpg"], Some("secret"));
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();
        coordinator
            .run(id, carrier, &CancellationMonitor::new())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests {
            let value = request.headers.get("authorization").unwrap();
            assert_eq!(value.to_str().unwrap(), "Token secret");
        }
    }

    #[tokio::test]
    async fn test_empty_carrier_completes_without_fetching() {
        let fx = fixture().await;
        let carrier = ImportCarrier::default();
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();

        let outcome = import_files(&coordinator, id, carrier).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Completed { images: 0 });

        let task = fx.store.require(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.upload_progress, 1.0);
        assert!(fx.store.images(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_on_second_file_is_fatal() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200).set_body_string("A")).await;
        serve(
            &server,
            "b.jpg",
            ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
        )
        .await;
        serve(&server, "c.jpg", ResponseTemplate::new(200)).await;

        let carrier = carrier(&server, &["a.jpg", "b.jpg", "c.jpg"], None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();

        let err = import_files(&coordinator, id, carrier).await.unwrap_err();
        match err {
            ImportError::NodeServer { file, source } => {
                assert_eq!(file, "b.jpg");
                assert!(matches!(source, FetchError::Timeout(_)));
            }
            other => panic!("expected a node server error, got {other:?}"),
        }

        let images = fx.store.images(id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].image.ends_with("a.jpg"));

        // c.jpg is never attempted
        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.url.path() != "/c.jpg"));

        let task = fx.store.require(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Importing);
        assert_eq!(task.pending_action, Some(PendingAction::Import));
        assert!((task.upload_progress - 1.0 / 3.0).abs() < 1e-9);
        assert!(!task.task_path("b.jpg").exists());
    }

    #[tokio::test]
    async fn test_unwritable_working_dir_is_local_storage_error() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200)).await;

        let carrier = carrier(&server, &["a.jpg"], None);
        let id = started_task(&fx.store, &carrier).await;
        let task = fx.store.require(id).await.unwrap();
        // Occupy the destination with a directory so it cannot be opened as a file
        tokio::fs::create_dir_all(task.task_path("a.jpg")).await.unwrap();

        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();
        let err = import_files(&coordinator, id, carrier).await.unwrap_err();
        assert!(matches!(err, ImportError::LocalStorage { .. }), "{err:?}");
        assert!(fx.store.images(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_task() {
        let fx = fixture().await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();
        let err = import_files(&coordinator, Ulid::new(), ImportCarrier::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_task_must_be_importing() {
        let fx = fixture().await;
        let id = fx.store.create_task().await.unwrap().task_id;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();
        let err = import_files(&coordinator, id, ImportCarrier::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::InvalidTransition {
                from: TaskStatus::PendingImport,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_traversal_name_rejected_before_any_fetch() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200)).await;

        let mut carrier = carrier(&server, &["a.jpg"], None);
        carrier
            .files
            .push(FileDescriptor::new("../escape.jpg", server.uri()));
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();

        let err = import_files(&coordinator, id, carrier).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidFileName(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
        assert!(fx.store.images(id).await.unwrap().is_empty());
    }

    /// Requests cancellation when the n-th request (1-indexed) reaches the server
    struct CancelOnRequest {
        monitor: CancellationMonitor,
        at: usize,
        seen: AtomicUsize,
    }

    impl Respond for CancelOnRequest {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.at {
                self.monitor.request();
            }
            ResponseTemplate::new(200).set_body_string("data")
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_run() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        let monitor = CancellationMonitor::new();
        let names = ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"];
        let k = 2;
        Mock::given(method("GET"))
            .respond_with(CancelOnRequest {
                monitor: monitor.clone(),
                at: k + 1,
                seen: AtomicUsize::new(0),
            })
            .mount(&server)
            .await;

        let carrier = carrier(&server, &names, None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();

        let outcome = coordinator.run(id, carrier, &monitor).await.unwrap();
        assert!(matches!(outcome, ImportOutcome::Cancelled { .. }));
        assert!(outcome.images() <= k + 1);
        assert!(outcome.images() >= k);

        assert!(server.received_requests().await.unwrap().len() <= k + 1);
        assert!(fx.store.images(id).await.unwrap().len() <= k + 1);

        let task = fx.store.require(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.pending_action.is_none());
        assert!(task.upload_progress <= (k as f64) / (names.len() as f64));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(&server, "a.jpg", ResponseTemplate::new(200)).await;

        let carrier = carrier(&server, &["a.jpg"], None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(fx.store.clone(), settings()).unwrap();
        let monitor = CancellationMonitor::new();
        monitor.request();

        let outcome = coordinator.run(id, carrier, &monitor).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Cancelled { images: 0 });
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_aborts_the_run() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        serve(
            &server,
            "a.jpg",
            ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
        )
        .await;

        let carrier = carrier(&server, &["a.jpg"], None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(
            fx.store.clone(),
            ImportSettings {
                fetch_timeout: Duration::from_secs(10),
                import_timeout: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        )
        .unwrap();

        let err = import_files(&coordinator, id, carrier).await.unwrap_err();
        assert!(matches!(err, ImportError::DeadlineExceeded(_)));
        assert_eq!(
            fx.store.require(id).await.unwrap().status,
            TaskStatus::Importing
        );
    }

    #[tokio::test]
    async fn test_concurrent_fetches_complete() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        let names: Vec<String> = (0..8).map(|i| format!("{i}.jpg")).collect();
        for name in &names {
            serve(
                &server,
                name,
                ResponseTemplate::new(200)
                    .set_body_string(name.clone())
                    .set_delay(Duration::from_millis(20)),
            )
            .await;
        }

        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let carrier = carrier(&server, &names, None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(
            fx.store.clone(),
            ImportSettings {
                concurrency: 3,
                ..settings()
            },
        )
        .unwrap();

        let outcome = import_files(&coordinator, id, carrier).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Completed { images: 8 });

        let task = fx.store.require(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.upload_progress, 1.0);
        assert_eq!(fx.store.images(id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_first_failure_wins() {
        let fx = fixture().await;
        let server = MockServer::start().await;
        let names: Vec<String> = (0..8).map(|i| format!("{i}.jpg")).collect();
        for name in &names {
            let response = if name == "2.jpg" {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200).set_delay(Duration::from_millis(50))
            };
            serve(&server, name, response).await;
        }

        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let carrier = carrier(&server, &names, None);
        let id = started_task(&fx.store, &carrier).await;
        let coordinator = ImportCoordinator::new(
            fx.store.clone(),
            ImportSettings {
                concurrency: 3,
                ..settings()
            },
        )
        .unwrap();

        let err = import_files(&coordinator, id, carrier).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::NodeServer {
                source: FetchError::Status(_),
                ..
            }
        ));

        // Nothing past the concurrency window was issued
        assert!(server.received_requests().await.unwrap().len() <= 3);
        let task = fx.store.require(id).await.unwrap();
        assert_ne!(task.status, TaskStatus::Complete);
        assert!(task.upload_progress < 1.0);
        assert!(fx.store.images(id).await.unwrap().len() < 8);
    }

    /// Serves 100 bytes of a declared 1000-byte body, then holds the connection open
    async fn stalling_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0u8; 2048];
                    let _ = socket.read(&mut request).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n")
                        .await;
                    let _ = socket.write_all(&[7u8; 100]).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        format!("http://{addr}")
    }

    /// Whether `path` showed up with content within a short window
    async fn saw_partial_file(path: &std::path::Path) -> bool {
        for _ in 0..40 {
            if tokio::fs::metadata(path).await.is_ok_and(|m| m.len() > 0) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_deadline_removes_partial_file() {
        let fx = fixture().await;
        let url = stalling_server().await;
        let carrier = ImportCarrier::new(
            None,
            vec![FileDescriptor::new("a.jpg", format!("{url}/a.jpg"))],
        );
        let id = started_task(&fx.store, &carrier).await;
        let task = fx.store.require(id).await.unwrap();
        let coordinator = ImportCoordinator::new(
            fx.store.clone(),
            ImportSettings {
                fetch_timeout: Duration::from_secs(10),
                import_timeout: Some(Duration::from_millis(500)),
                ..Default::default()
            },
        )
        .unwrap();

        let run = import_files(&coordinator, id, carrier);
        let partial_path = task.task_path("a.jpg");
        let (result, seen) = tokio::join!(run, saw_partial_file(&partial_path));
        assert!(seen);

        let err = result.unwrap_err();
        assert!(matches!(err, ImportError::DeadlineExceeded(_)), "{err:?}");
        assert!(!task.task_path("a.jpg").exists());
        assert!(fx.store.images(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_sibling_removes_partial_file() {
        let fx = fixture().await;
        let stalling = stalling_server().await;
        let server = MockServer::start().await;
        serve(
            &server,
            "b.jpg",
            ResponseTemplate::new(500).set_delay(Duration::from_millis(300)),
        )
        .await;

        let carrier = ImportCarrier::new(
            None,
            vec![
                FileDescriptor::new("a.jpg", format!("{stalling}/a.jpg")),
                FileDescriptor::new("b.jpg", format!("{}/b.jpg", server.uri())),
            ],
        );
        let id = started_task(&fx.store, &carrier).await;
        let task = fx.store.require(id).await.unwrap();
        let coordinator = ImportCoordinator::new(
            fx.store.clone(),
            ImportSettings {
                fetch_timeout: Duration::from_secs(10),
                concurrency: 2,
                ..Default::default()
            },
        )
        .unwrap();

        let run = import_files(&coordinator, id, carrier);
        let partial_path = task.task_path("a.jpg");
        let (result, seen) = tokio::join!(run, saw_partial_file(&partial_path));
        assert!(seen);

        let err = result.unwrap_err();
        assert!(matches!(err, ImportError::NodeServer { ref file, .. } if file == "b.jpg"), "{err:?}");
        assert!(!task.task_path("a.jpg").exists());
        assert!(fx.store.images(id).await.unwrap().is_empty());
    }
}
