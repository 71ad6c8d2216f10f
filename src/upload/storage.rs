//! Upload storage layout and path confinement.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Local};
use tracing::{debug, error, warn};

/// Subdirectory of the upload root that holds documents.
pub const DOCUMENTS_DIR: &str = "documents";

// == Upload Store ==
/// Files live under `<root>/documents/<year>/<month>/`. Every delete or
/// move is confined to the root.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Relative roots are resolved against the working directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self {
            root: normalize(&absolute),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dated directory new uploads go to, e.g. `documents/2025/01`.
    pub fn destination_dir(&self, now: DateTime<Local>) -> PathBuf {
        self.root
            .join(DOCUMENTS_DIR)
            .join(now.year().to_string())
            .join(format!("{:02}", now.month()))
    }

    /// Absolute form of `path` if it stays inside the root. Relative paths
    /// are taken relative to the root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize(&joined);
        resolved.starts_with(&self.root).then_some(resolved)
    }

    /// Path of a stored file relative to the root, `/`-separated.
    pub fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    // == Secure Delete ==
    /// Deletes a file inside the root. Returns `false` for paths outside the
    /// root, missing files and failed deletes.
    pub async fn secure_delete_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let Some(target) = self.resolve(path) else {
            error!(path = %path.display(), "refusing to delete outside the upload root");
            return false;
        };

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "upload deleted");
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                error!(path = %target.display(), error = %err, "failed to delete upload");
                false
            }
        }
    }

    // == Secure Move ==
    /// Moves a file when both ends are inside the root, creating the target
    /// directory as needed.
    pub async fn secure_move_file(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> bool {
        let (from, to) = (from.as_ref(), to.as_ref());
        let (Some(source), Some(target)) = (self.resolve(from), self.resolve(to)) else {
            error!(
                from = %from.display(),
                to = %to.display(),
                "refusing to move outside the upload root"
            );
            return false;
        };

        if let Some(parent) = target.parent() {
            if let Err(err) = create_secure_directory(parent).await {
                error!(path = %parent.display(), error = %err, "failed to create directory");
                return false;
            }
        }

        match tokio::fs::rename(&source, &target).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    from = %source.display(),
                    to = %target.display(),
                    error = %err,
                    "failed to move upload"
                );
                false
            }
        }
    }
}

/// Creates `dir` and its parents, owner rwx and group r-x on Unix.
pub async fn create_secure_directory(dir: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o750);
    builder.create(dir).await
}

/// Lexically resolves `.` and `..`. `..` never climbs above the root.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> (UploadStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_destination_dir_layout() {
        let (store, _dir) = store();
        let when = Local.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            store.destination_dir(when),
            store.root().join("documents").join("2025").join("01")
        );
    }

    #[test]
    fn test_resolve_confines_to_root() {
        let (store, _dir) = store();

        assert!(store.resolve("documents/2025/01/a.pdf").is_some());
        assert!(store.resolve(store.root().join("x")).is_some());
        assert!(store.resolve("/etc/passwd").is_none());
        assert!(store.resolve("../outside.txt").is_none());
        assert!(store.resolve("documents/../../outside.txt").is_none());
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_outside() {
        let (store, dir) = store();
        let sibling = dir.path().join("uploads-evil").join("a.pdf");
        assert!(store.resolve(sibling).is_none());
    }

    #[test]
    fn test_relative_path() {
        let (store, _dir) = store();
        let path = store.root().join("documents").join("2025").join("a.pdf");
        assert_eq!(store.relative(&path), "documents/2025/a.pdf");
    }

    #[tokio::test]
    async fn test_secure_delete_refuses_etc_passwd() {
        let (store, _dir) = store();
        assert!(!store.secure_delete_file("/etc/passwd").await);
    }

    #[tokio::test]
    async fn test_secure_delete_inside_root() {
        let (store, _dir) = store();
        let folder = store.root().join("documents");
        create_secure_directory(&folder).await.unwrap();
        tokio::fs::write(folder.join("a.pdf"), b"%PDF").await.unwrap();

        assert!(store.secure_delete_file("documents/a.pdf").await);
        assert!(!store.secure_delete_file("documents/a.pdf").await);
    }

    #[tokio::test]
    async fn test_secure_move() {
        let (store, dir) = store();
        let folder = store.root().join("documents");
        create_secure_directory(&folder).await.unwrap();
        tokio::fs::write(folder.join("a.pdf"), b"%PDF").await.unwrap();

        assert!(store.secure_move_file("documents/a.pdf", "archive/2025/a.pdf").await);
        assert!(store.root().join("archive/2025/a.pdf").exists());
        assert!(
            !store
                .secure_move_file("archive/2025/a.pdf", dir.path().join("stolen.pdf"))
                .await
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = store();
        let target = store.root().join("documents").join("2025");
        create_secure_directory(&target).await.unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o007, 0, "others must have no access");
        assert_eq!(mode & 0o700, 0o700);
    }
}
