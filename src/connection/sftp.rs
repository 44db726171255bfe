use std::io;

use async_trait::async_trait;
use russh_sftp::{client::SftpSession, protocol::OpenFlags};

use crate::filesystem::{is_navigation_entry, RemoteEntry, RemoteFilesystem, RemoteReader, RemoteWriter};

#[async_trait]
impl RemoteFilesystem for SftpSession {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        wrap_res(self.try_exists(path).await)
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        wrap_res(SftpSession::create_dir(self, path).await)
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        let entries = wrap_res(SftpSession::read_dir(self, path).await)?;
        Ok(entries
            .filter(|entry| !is_navigation_entry(&entry.file_name()))
            .map(|entry| RemoteEntry {
                name: entry.file_name(),
                is_dir: entry.file_type().is_dir(),
            })
            .collect())
    }

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader> {
        let file = wrap_res(self.open_with_flags(path, OpenFlags::READ).await)?;
        Ok(Box::new(Box::pin(file)))
    }

    async fn open_write_truncate(&self, path: &str) -> io::Result<RemoteWriter> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let file = wrap_res(self.open_with_flags(path, flags).await)?;
        Ok(Box::new(Box::pin(file)))
    }
}

fn wrap_res<T>(result: Result<T, russh_sftp::client::error::Error>) -> io::Result<T> {
    result.map_err(io::Error::other)
}
