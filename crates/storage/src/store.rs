//! On-disk layout of every project workspace.
//!
//! ```text
//! {storage_root}/
//! ├── projects/{project_id}/...   one directory per project, served publicly
//! └── tmp/                        staging for in-flight uploads
//! ```

use crate::error::{ErrorKind, Result};
use crate::id::{IdentifierGenerator, ProjectId};
use crate::workspace::Workspace;
use exn::ResultExt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::instrument;

const PROJECTS_DIR: &str = "projects";
const STAGING_DIR: &str = "tmp";
/// How many fresh identifiers [`WorkspaceStore::provision`] tries before giving up.
const MAX_PROVISION_ATTEMPTS: usize = 8;

/// Sole authority for creating and locating project workspaces.
///
/// Holds its storage root explicitly (no ambient global directory), so tests
/// get isolation by pointing each store at its own temp directory. Every
/// method takes `&self` and is safe to call from many tasks at once.
///
/// # Examples
///
/// ```no_run
/// use dropsite_storage::{IdentifierGenerator, WorkspaceStore};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = WorkspaceStore::open("/srv/dropsite")?;
/// let workspace = store.provision(&IdentifierGenerator::default(), "alice")?;
/// let again = store.resolve_workspace(workspace.id().as_str())?;
/// assert_eq!(workspace.root(), again.root());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct WorkspaceStore {
    /// Canonical absolute path of `{storage_root}/projects`.
    projects: PathBuf,
    /// Canonical absolute path of `{storage_root}/tmp`.
    staging: PathBuf,
}

impl WorkspaceStore {
    /// Open (creating if needed) the storage root.
    ///
    /// Relative roots are resolved against the current directory. Runs once
    /// at startup, so the blocking calls here are fine; a failure here should
    /// stop the process before it accepts requests.
    #[instrument(skip_all)]
    pub fn open(storage_root: impl AsRef<Path>) -> Result<Self> {
        let storage_root = storage_root.as_ref();
        let root = std::path::absolute(storage_root).map_err(ErrorKind::Io)?;
        let projects = root.join(PROJECTS_DIR);
        let staging = root.join(STAGING_DIR);
        for dir in [&projects, &staging] {
            fs::create_dir_all(dir).map_err(|e| ErrorKind::from_io(e, dir))?;
        }
        let projects = projects.canonicalize().map_err(ErrorKind::Io)?;
        let staging = staging.canonicalize().map_err(ErrorKind::Io)?;
        tracing::info!(projects = %projects.display(), "Storage root ready");
        Ok(Self { projects, staging })
    }

    /// Directory that contains every workspace (what the public route serves).
    pub fn projects_dir(&self) -> &Path {
        &self.projects
    }

    /// Directory for request temp files. Same filesystem as the workspaces,
    /// so placing an upload is a rename rather than a copy.
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    fn workspace_path(&self, id: &ProjectId) -> PathBuf {
        self.projects.join(id.as_str())
    }

    /// Create the workspace directory for `id`.
    ///
    /// Uses a single, non-recursive `mkdir` under the existing `projects/`
    /// directory: the kernel lets exactly one concurrent caller win for a
    /// given identifier and everyone else gets
    /// [`AlreadyExists`](ErrorKind::AlreadyExists). Different identifiers
    /// never contend.
    #[instrument(skip(self), fields(project = %id))]
    pub fn create_workspace(&self, id: &ProjectId) -> Result<Workspace> {
        let path = self.workspace_path(id);
        match fs::create_dir(&path) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                exn::bail!(ErrorKind::AlreadyExists(id.to_string()))
            },
            Err(e) => exn::bail!(ErrorKind::from_io(e, id.as_str())),
        }
        let metadata = fs::metadata(&path).map_err(ErrorKind::Io)?;
        tracing::info!("Created workspace");
        Ok(Workspace::from_metadata(id.clone(), path, &metadata))
    }

    /// Locate an existing workspace from an untrusted identifier.
    ///
    /// The identifier is checked syntactically *before* any filesystem call:
    /// separators, `..` and friends are reported as
    /// [`NotFound`](ErrorKind::NotFound) without ever being joined onto a path.
    #[instrument(skip(self))]
    pub fn resolve_workspace(&self, id: &str) -> Result<Workspace> {
        let id = id.parse::<ProjectId>().or_raise(|| ErrorKind::NotFound(ProjectId::preview(id)))?;
        let path = self.workspace_path(&id);
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_dir() => m,
            Ok(_) => exn::bail!(ErrorKind::NotFound(id.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(id.to_string())),
            Err(e) => exn::bail!(ErrorKind::from_io(e, id.as_str())),
        };
        // A symlink swapped in for a project directory must not lead outside.
        let canonical = path.canonicalize().map_err(ErrorKind::Io)?;
        if canonical.parent() != Some(self.projects.as_path()) {
            tracing::warn!(project = %id, "Workspace resolves outside the projects directory");
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }
        Ok(Workspace::from_metadata(id, canonical, &metadata))
    }

    /// Generate an identifier for `username` and create its workspace,
    /// drawing a new identifier whenever the previous one is taken.
    #[instrument(skip(self, generator))]
    pub fn provision(&self, generator: &IdentifierGenerator, username: &str) -> Result<Workspace> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let id = generator.generate(username)?;
            match self.create_workspace(&id) {
                Err(e) if matches!(&*e, ErrorKind::AlreadyExists(_)) && attempt < MAX_PROVISION_ATTEMPTS => {
                    tracing::debug!(project = %id, attempt, "Identifier collision, retrying");
                },
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::FixedEntropy;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_open_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/storage");
        let store = WorkspaceStore::open(&root).unwrap();
        assert!(root.join("projects").is_dir());
        assert!(root.join("tmp").is_dir());
        assert!(store.projects_dir().ends_with("projects"));
    }

    #[test]
    fn test_open_fails_on_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();
        assert!(WorkspaceStore::open(&file).is_err());
    }

    #[test]
    fn test_create_then_resolve() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let created = store.provision(&IdentifierGenerator::default(), "alice").unwrap();
        let resolved = store.resolve_workspace(created.id().as_str()).unwrap();
        assert_eq!(created.id(), resolved.id());
        assert_eq!(created.root(), resolved.root());
        assert!(resolved.root().starts_with(temp_dir.path().canonicalize().unwrap()));
        assert!(resolved.root().is_dir());
    }

    #[test]
    fn test_create_twice_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let id: ProjectId = "alice-a1b2c3d4".parse().unwrap();
        store.create_workspace(&id).unwrap();
        let err = store.create_workspace(&id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[test]
    fn test_resolve_unknown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let err = store.resolve_workspace("nobody-00000000").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        // Resolving never creates anything.
        assert!(!store.projects_dir().join("nobody-00000000").exists());
    }

    #[rstest]
    #[case("..")]
    #[case("../tmp")]
    #[case("alice/../../etc")]
    #[case("a\\b")]
    #[case("/etc")]
    #[case("")]
    fn test_resolve_rejects_traversal(#[case] id: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        // `tmp` exists one level up; it must not be reachable.
        let err = store.resolve_workspace(id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_resolve_regular_file_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        fs::write(store.projects_dir().join("file-00000000"), b"").unwrap();
        let err = store.resolve_workspace("file-00000000").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_resolve_overlong_echoes_only_a_preview() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let id = "a".repeat(64 * 1024);
        let err = store.resolve_workspace(&id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let message = (*err).to_string();
        assert!(message.len() < 100, "{message}");
    }

    #[test]
    fn test_provision_retries_on_collision() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let entropy = Arc::new(FixedEntropy(AtomicU8::new(0)));
        struct Shared(Arc<FixedEntropy>);
        impl crate::id::EntropySource for Shared {
            fn fill(&self, buf: &mut [u8]) {
                self.0.fill(buf);
                // Every draw after this one yields something new.
                self.0.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        store.create_workspace(&"alice-00000000".parse().unwrap()).unwrap();
        let generator = IdentifierGenerator::new(Shared(entropy));
        let workspace = store.provision(&generator, "alice").unwrap();
        assert_eq!(workspace.id().as_str(), "alice-01010101");
    }

    #[test]
    fn test_provision_gives_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let generator = IdentifierGenerator::new(FixedEntropy::default());
        store.provision(&generator, "alice").unwrap();
        let err = store.provision(&generator, "alice").unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[test]
    fn test_concurrent_create_same_identifier() {
        const CALLERS: usize = 100;
        let temp_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(temp_dir.path()).unwrap();
        let id: ProjectId = "race-deadbeef".parse().unwrap();
        let barrier = Arc::new(Barrier::new(CALLERS));
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let (store, id, barrier) = (store.clone(), id.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    store.create_workspace(&id)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let collisions =
            results.iter().filter(|r| matches!(r, Err(e) if matches!(&**e, ErrorKind::AlreadyExists(_)))).count();
        assert_eq!(successes, 1);
        assert_eq!(collisions, CALLERS - 1);
    }
}
