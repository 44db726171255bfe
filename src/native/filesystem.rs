use std::io;

use async_trait::async_trait;
use tokio::fs::{create_dir, read_dir, symlink_metadata, File, OpenOptions};

use super::LocalRootFilesystem;
use crate::filesystem::{RemoteEntry, RemoteFilesystem, RemoteReader, RemoteWriter};

#[async_trait]
impl RemoteFilesystem for LocalRootFilesystem {
    async fn exists(&self, path: &str) -> io::Result<bool> {
        match symlink_metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        create_dir(self.resolve(path)).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<RemoteEntry>> {
        let mut read_dir = read_dir(self.resolve(path)).await?;

        let mut entries: Vec<RemoteEntry> = vec![];
        while let Some(entry) = read_dir.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => return Err(io::Error::other("could not convert os_str into str")),
            };
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(RemoteEntry { name, is_dir });
        }

        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> io::Result<RemoteReader> {
        let file = File::open(self.resolve(path)).await?;
        Ok(Box::new(file))
    }

    async fn open_write_truncate(&self, path: &str) -> io::Result<RemoteWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path))
            .await?;
        Ok(Box::new(file))
    }
}
