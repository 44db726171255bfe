use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A child of a listed remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// The remote filesystem operations used by transfers and directory materialization.
///
/// Implementations must tolerate concurrent calls through a shared reference, since
/// recursive transfers fan out over one instance.
#[async_trait]
pub trait RemoteFilesystem: Send + Sync {
    /// Tests whether anything exists at `path`.
    async fn exists(&self, path: &str) -> io::Result<bool>;

    async fn create_dir(&self, path: &str) -> io::Result<()>;

    /// Lists the immediate children of `path`, excluding `.` and `..`.
    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>>;

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader>;

    /// Opens `path` write-only, creating it if missing and truncating it otherwise.
    async fn open_write_truncate(&self, path: &str) -> io::Result<RemoteWriter>;
}

/// Splits a remote path at its last separator. The directory half keeps its trailing `/`.
pub fn split_remote_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => path.split_at(index + 1),
        None => ("", path),
    }
}

pub fn join_remote_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        return name.into();
    }
    if directory.ends_with('/') {
        format!("{directory}{name}")
    } else {
        format!("{directory}/{name}")
    }
}

pub(crate) fn is_navigation_entry(name: &str) -> bool {
    name == "." || name == ".."
}
