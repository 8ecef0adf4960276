//! Per-request routing of uploaded files into a workspace.

use crate::error::{ErrorKind, Result};
use crate::policy::FilePolicy;
use crate::report::{Failure, FileOutcome, IngestReport, Route, Status};
use crate::stream::IngestEvent;
use crate::upload::UploadedFile;
use dropsite_archive::{ArchiveFormat, Extractor, Limits};
use dropsite_storage::{Workspace, WorkspaceStore};
use exn::ResultExt;
use futures::StreamExt;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Tuning for a [`Pipeline`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestOptions {
    pub limits: Limits,
    /// Suffixes (`.html`) and media types (`text/html`, `image/*`); see
    /// [`FilePolicy`]. Empty allows everything.
    pub allowed_file_types: Vec<String>,
    /// Files of one request processed at the same time.
    pub concurrency: usize,
}
impl Default for IngestOptions {
    fn default() -> Self {
        Self { limits: Limits::default(), allowed_file_types: Vec::new(), concurrency: 4 }
    }
}

/// Places or extracts uploaded files into existing workspaces.
///
/// Cheap to clone and shared by every request. All filesystem work runs on
/// the blocking thread pool.
#[derive(Clone)]
pub struct Pipeline {
    store: WorkspaceStore,
    extractor: Extractor,
    policy: Arc<FilePolicy>,
    pub(crate) concurrency: usize,
}

impl Pipeline {
    pub fn new(store: WorkspaceStore, options: IngestOptions) -> Self {
        let policy = Arc::new(FilePolicy::new(options.allowed_file_types));
        let mut extractor = Extractor::new(options.limits);
        if !policy.allows_everything() {
            let policy = Arc::clone(&policy);
            extractor = extractor.with_filter(move |path| policy.allows_path(path));
        }
        Self { store, extractor, policy, concurrency: options.concurrency.max(1) }
    }

    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    /// Generate an identifier for `username` and create its workspace.
    #[instrument(skip(self))]
    pub async fn create_project(&self, username: &str) -> Result<Workspace> {
        let (store, username) = (self.store.clone(), username.to_string());
        blocking(move || {
            store.provision(&dropsite_storage::IdentifierGenerator::default(), &username).map_err(ErrorKind::storage)
        })
        .await
    }

    /// Look up an existing workspace from an untrusted identifier.
    pub async fn resolve(&self, project_id: &str) -> Result<Workspace> {
        let (store, project_id) = (self.store.clone(), project_id.to_string());
        blocking(move || store.resolve_workspace(&project_id).map_err(ErrorKind::storage)).await
    }

    /// Ingest every file into the workspace for `project_id`.
    ///
    /// Fails as a whole only when the workspace can't be resolved; individual
    /// file failures are reported in the returned [`IngestReport`], in
    /// upload order.
    #[instrument(skip(self, files, cancel), fields(files = files.len()))]
    pub async fn ingest(
        &self,
        project_id: &str,
        files: Vec<UploadedFile>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut events = pin!(self.ingest_stream(project_id, files, cancel.clone()));
        while let Some(event) = events.next().await {
            if let IngestEvent::Processed(outcome) = event? {
                report.files.push(outcome);
            }
        }
        report.files.sort_by_key(|outcome| outcome.index);
        tracing::info!(succeeded = report.succeeded(), failed = report.failed(), "Upload ingested");
        Ok(report)
    }

    /// Route one file and report how it went. Never fails as a whole.
    pub(crate) async fn process(
        &self,
        workspace: Workspace,
        index: usize,
        file: UploadedFile,
        cancel: CancellationToken,
    ) -> FileOutcome {
        let name = file.original_name().to_string();
        let format = ArchiveFormat::from_path(&name);
        let route = match format {
            Ok(None) => Route::Placed,
            _ => Route::Extracted,
        };
        let (extractor, policy) = (self.extractor.clone(), Arc::clone(&self.policy));
        let result = blocking(move || {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            match format.map_err(ErrorKind::archive)? {
                Some(format) => {
                    let stats =
                        extractor.extract_upload(file.temp, format, &workspace, &cancel).map_err(ErrorKind::archive)?;
                    Ok(Status::Ok { path: None, stats: Some(stats) })
                },
                None if !policy.allows(file.original_name(), file.media_type()) => {
                    exn::bail!(ErrorKind::Rejected(file.original_name().to_string()))
                },
                None => {
                    let name = file.original_name().to_string();
                    let placed = workspace.place(file.temp, &name).map_err(ErrorKind::storage)?;
                    Ok(Status::Ok { path: Some(placed.to_string_lossy().replace('\\', "/")), stats: None })
                },
            }
        })
        .await;

        let status = match result {
            Ok(status) => {
                tracing::info!(file = %name.escape_debug(), ?route, "Ingested file");
                status
            },
            Err(err) => {
                match &*err {
                    ErrorKind::Cancelled => tracing::info!(file = %name.escape_debug(), "Ingest cancelled"),
                    _ => tracing::warn!(file = %name.escape_debug(), error = ?err, "Failed to ingest file"),
                }
                Status::Failed { error: Failure::from(&err) }
            },
        };
        FileOutcome { index, name, route, status }
    }
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T: Send + 'static>(work: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(join) => Err(join).or_raise(|| ErrorKind::Io),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    struct Fixture {
        _dir: TempDir,
        store: WorkspaceStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = WorkspaceStore::open(dir.path()).unwrap();
            Self { _dir: dir, store }
        }

        fn pipeline(&self, options: IngestOptions) -> Pipeline {
            Pipeline::new(self.store.clone(), options)
        }

        fn upload(&self, name: &str, contents: &[u8]) -> (UploadedFile, PathBuf) {
            let mut file = tempfile::NamedTempFile::new_in(self.store.staging_dir()).unwrap();
            file.write_all(contents).unwrap();
            let temp = file.into_temp_path();
            let path = temp.to_path_buf();
            (UploadedFile::new(temp, name, None), path)
        }
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn failure_kind(outcome: &FileOutcome) -> Option<&'static str> {
        match &outcome.status {
            Status::Failed { error } => Some(error.kind),
            Status::Ok { .. } => None,
        }
    }

    #[tokio::test]
    async fn test_place_and_extract() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(IngestOptions::default());
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (html, html_temp) = fixture.upload("index.html", b"<h1>hi</h1>");
        let (site, site_temp) =
            fixture.upload("site.zip", &zip_bytes(&[("css/style.css", b"body {}".as_slice())]));

        let report = pipeline
            .ingest(workspace.id().as_str(), vec![html, site], &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.files[0].name, "index.html");
        assert_eq!(report.files[0].route, Route::Placed);
        assert_eq!(report.files[1].route, Route::Extracted);
        assert_eq!(fs::read(workspace.root().join("index.html")).unwrap(), b"<h1>hi</h1>");
        assert_eq!(fs::read(workspace.root().join("css/style.css")).unwrap(), b"body {}");
        assert!(!html_temp.exists());
        assert!(!site_temp.exists());
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(IngestOptions::default());
        let (file, temp) = fixture.upload("index.html", b"hi");
        let err = pipeline.ingest("ghost-00000000", vec![file], &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(!temp.exists());
        assert_eq!(fs::read_dir(fixture.store.projects_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_per_file() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(IngestOptions::default());
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (evil, _) = fixture.upload("../escape.html", b"evil");
        let (broken, broken_temp) = fixture.upload("broken.zip", b"<html>not a zip</html>");
        let (fine, _) = fixture.upload("about.html", b"about");

        let report = pipeline
            .ingest(workspace.id().as_str(), vec![evil, broken, fine], &CancellationToken::new())
            .await
            .unwrap();

        let kinds: Vec<_> = report.files.iter().map(failure_kind).collect();
        assert_eq!(kinds, [Some("PathTraversal"), Some("InvalidArchive"), None]);
        assert!(!fixture.store.projects_dir().join("escape.html").exists());
        assert!(workspace.root().join("about.html").is_file());
        assert!(!broken_temp.exists());
    }

    #[tokio::test]
    async fn test_backslash_traversal_filename() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(IngestOptions::default());
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (evil, evil_temp) = fixture.upload("..\\..\\evil.html", b"evil");
        let (nested, _) = fixture.upload("css\\style.css", b"body {}");

        let report = pipeline
            .ingest(workspace.id().as_str(), vec![evil, nested], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(failure_kind(&report.files[0]), Some("PathTraversal"));
        assert!(!evil_temp.exists());
        assert!(!fixture.store.projects_dir().parent().unwrap().join("evil.html").exists());
        let names: Vec<_> = fs::read_dir(workspace.root()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, ["css"]);
        match &report.files[1].status {
            Status::Ok { path, .. } => assert_eq!(path.as_deref(), Some("css/style.css")),
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(workspace.root().join("css/style.css").is_file());
    }

    #[tokio::test]
    async fn test_allow_list_media_types() {
        let fixture = Fixture::new();
        let options = IngestOptions { allowed_file_types: vec!["image/*".to_string()], ..IngestOptions::default() };
        let pipeline = fixture.pipeline(options);
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (logo, _) = fixture.upload("logo", b"<svg/>");
        let logo = UploadedFile::new(logo.temp, "logo", Some("image/svg+xml".to_string()));
        let (page, _) = fixture.upload("index.html", b"hi");
        let page = UploadedFile::new(page.temp, "index.html", Some("text/html".to_string()));

        let report = pipeline
            .ingest(workspace.id().as_str(), vec![logo, page], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(failure_kind(&report.files[0]), None);
        assert_eq!(failure_kind(&report.files[1]), Some("Rejected"));
        assert!(workspace.root().join("logo").is_file());
        assert!(!workspace.root().join("index.html").exists());
    }

    #[tokio::test]
    async fn test_allow_list() {
        let fixture = Fixture::new();
        let options = IngestOptions { allowed_file_types: vec![".html".to_string()], ..IngestOptions::default() };
        let pipeline = fixture.pipeline(options);
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (script, script_temp) = fixture.upload("run.sh", b"rm -rf /");
        let entries = [("index.html", b"hi".as_slice()), ("tool.exe", b"MZ".as_slice())];
        let (site, _) = fixture.upload("site.zip", &zip_bytes(&entries));

        let report = pipeline
            .ingest(workspace.id().as_str(), vec![script, site], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(failure_kind(&report.files[0]), Some("Rejected"));
        assert!(!script_temp.exists());
        match &report.files[1].status {
            Status::Ok { stats: Some(stats), .. } => assert_eq!((stats.files, stats.skipped), (1, 1)),
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(workspace.root().join("index.html").is_file());
        assert!(!workspace.root().join("tool.exe").exists());
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(IngestOptions::default());
        let workspace = pipeline.create_project("alice").await.unwrap();
        let (file, temp) = fixture.upload("index.html", b"hi");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = pipeline.ingest(workspace.id().as_str(), vec![file], &cancel).await.unwrap();
        assert_eq!(failure_kind(&report.files[0]), Some("Cancelled"));
        assert!(!temp.exists());
        assert!(!workspace.root().join("index.html").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_files_keep_upload_order() {
        let fixture = Fixture::new();
        let options = IngestOptions { concurrency: 3, ..IngestOptions::default() };
        let pipeline = fixture.pipeline(options);
        let workspace = pipeline.create_project("alice").await.unwrap();
        let files: Vec<_> =
            (0..25).map(|i| fixture.upload(&format!("page-{i}.html"), format!("{i}").as_bytes()).0).collect();

        let report = pipeline.ingest(workspace.id().as_str(), files, &CancellationToken::new()).await.unwrap();

        assert!(report.is_complete());
        let names: Vec<_> = report.files.iter().map(|f| f.name.clone()).collect();
        let expected: Vec<_> = (0..25).map(|i| format!("page-{i}.html")).collect();
        assert_eq!(names, expected);
        assert_eq!(fs::read_to_string(workspace.root().join("page-7.html")).unwrap(), "7");
    }
}
