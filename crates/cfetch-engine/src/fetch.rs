//! Container transport.
//!
//! The engine only needs "give me the bytes of this container". Real network
//! clients live outside this workspace; [`MirrorFetcher`] serves a local copy
//! of the blob service laid out as `<root>/<host>/<path>`.

use std::io;
use std::path::{Component, Path, PathBuf};

use cfetch_cas::ContainerId;

use crate::error::FetchError;

/// Source of raw (still encrypted) container payloads.
///
/// Called concurrently from every FETCH worker; each call blocks its thread.
pub trait ContainerFetcher: Send + Sync {
    fn fetch(&self, container: &ContainerId) -> Result<Vec<u8>, FetchError>;
}

impl<F> ContainerFetcher for F
where
    F: Fn(&ContainerId) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, container: &ContainerId) -> Result<Vec<u8>, FetchError> {
        self(container)
    }
}

/// Reads container payloads from a directory tree.
#[derive(Debug, Clone)]
pub struct MirrorFetcher {
    root: PathBuf,
}

impl MirrorFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of `container` under the mirror root.
    ///
    /// `None` if host or path would climb out of the root.
    pub fn path_for(&self, container: &ContainerId) -> Option<PathBuf> {
        let host = Path::new(&container.host);
        let rel = Path::new(container.path.trim_start_matches('/'));
        let normal = |p: &Path| p.components().all(|c| matches!(c, Component::Normal(_)));
        if container.host.is_empty() || !normal(host) || !normal(rel) {
            return None;
        }
        Some(self.root.join(host).join(rel))
    }
}

impl ContainerFetcher for MirrorFetcher {
    fn fetch(&self, container: &ContainerId) -> Result<Vec<u8>, FetchError> {
        let Some(path) = self.path_for(container) else {
            return Err(FetchError::Unauthorized(format!(
                "{} escapes the mirror root",
                container.label()
            )));
        };
        std::fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                FetchError::Unreachable(format!("{}: not found", path.display()))
            }
            io::ErrorKind::PermissionDenied => {
                FetchError::Unauthorized(format!("{}: permission denied", path.display()))
            }
            _ => FetchError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn container(host: &str, path: &str) -> ContainerId {
        ContainerId {
            host: host.into(),
            path: path.into(),
            method: "GET".into(),
            headers: vec![],
            chunks: vec![],
        }
    }

    #[test]
    fn test_mirror_reads_host_path() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("cdn/a")).unwrap();
        std::fs::write(temp.path().join("cdn/a/b"), b"payload").unwrap();

        let fetcher = MirrorFetcher::new(temp.path());
        assert_eq!(fetcher.fetch(&container("cdn", "/a/b")).unwrap(), b"payload");
    }

    #[test]
    fn test_mirror_missing_is_unreachable() {
        let temp = TempDir::new().unwrap();
        let fetcher = MirrorFetcher::new(temp.path());
        let err = fetcher.fetch(&container("cdn", "/nope")).unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_mirror_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let fetcher = MirrorFetcher::new(temp.path());
        assert!(fetcher.path_for(&container("cdn", "/../etc/passwd")).is_none());
        assert!(fetcher.path_for(&container("..", "/x")).is_none());
        assert!(matches!(
            fetcher.fetch(&container("cdn", "a/../../x")),
            Err(FetchError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_closure_fetcher() {
        let fetcher =
            |c: &ContainerId| -> Result<Vec<u8>, FetchError> { Ok(c.path.clone().into_bytes()) };
        assert_eq!(fetcher.fetch(&container("h", "/p")).unwrap(), b"/p");
    }
}
