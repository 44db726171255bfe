use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tracing::{debug, warn};

use crate::{
    directory::{ensure_local_dir, ensure_remote_dir},
    error::{Error, Result, TransferFailure},
    filesystem::{join_remote_path, split_remote_path, RemoteFilesystem},
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// What a recursive transfer does when one of its children fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildErrorPolicy {
    /// Log the failure and keep going. The transfer as a whole still succeeds.
    #[default]
    BestEffort,
    /// Keep going, then report every failed child in [`Error::PartialTransfer`].
    Collect,
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub child_errors: ChildErrorPolicy,
    /// Upper bound on file copies in flight. `None` leaves the fan-out unbounded.
    pub max_concurrency: Option<usize>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            child_errors: ChildErrorPolicy::default(),
            max_concurrency: Some(DEFAULT_MAX_CONCURRENCY),
        }
    }
}

impl TransferOptions {
    pub fn child_errors(&mut self, policy: ChildErrorPolicy) -> &mut Self {
        self.child_errors = policy;
        self
    }

    pub fn max_concurrency(&mut self, limit: Option<usize>) -> &mut Self {
        self.max_concurrency = limit;
        self
    }
}

/// Copies a local file to `remote_path`, creating the remote directory chain first.
///
/// A `remote_path` ending in `/` only materializes the directory. A failed copy leaves
/// whatever was already written on the remote side.
pub async fn upload<F>(fs: &F, local_path: &Path, remote_path: &str) -> Result<()>
where
    F: RemoteFilesystem + ?Sized,
{
    let (directory, file_name) = split_remote_path(remote_path);
    ensure_remote_dir(fs, directory).await?;
    if file_name.is_empty() {
        return Ok(());
    }

    let mut source = File::open(local_path)
        .await
        .map_err(|err| Error::transfer(local_path.display().to_string(), err))?;
    let mut destination = fs
        .open_write_truncate(remote_path)
        .await
        .map_err(|err| Error::transfer(remote_path, err))?;

    let copied = copy_stream(&mut source, &mut destination, remote_path).await?;
    debug!(local = %local_path.display(), remote = %remote_path, bytes = copied, "uploaded file");
    Ok(())
}

/// Copies one remote file to `local_path`, creating or truncating it.
pub async fn download_file<F>(fs: &F, remote_path: &str, local_path: &Path) -> Result<()>
where
    F: RemoteFilesystem + ?Sized,
{
    let mut source = fs
        .open_read(remote_path)
        .await
        .map_err(|err| Error::transfer(remote_path, err))?;
    let mut destination = File::create(local_path)
        .await
        .map_err(|err| Error::transfer(local_path.display().to_string(), err))?;

    let copied = copy_stream(&mut source, &mut destination, remote_path).await?;
    debug!(remote = %remote_path, local = %local_path.display(), bytes = copied, "downloaded file");
    Ok(())
}

/// Mirrors the remote directory `remote_dir` into `local_dir`, one task per entry.
///
/// Failures of `local_dir` creation or of listing `remote_dir` itself are returned as
/// is. What happens with failing children is decided by [`TransferOptions::child_errors`].
pub async fn download(
    fs: Arc<dyn RemoteFilesystem>,
    remote_dir: &str,
    local_dir: &Path,
    options: &TransferOptions,
) -> Result<()> {
    let context = TransferContext::new(fs, options);
    let failures = download_tree(context, remote_dir.to_string(), local_dir.to_path_buf()).await?;
    settle(failures, options.child_errors, remote_dir)
}

/// Mirrors the local directory `local_dir` into `remote_dir`, one task per entry.
pub async fn upload_dir(
    fs: Arc<dyn RemoteFilesystem>,
    local_dir: &Path,
    remote_dir: &str,
    options: &TransferOptions,
) -> Result<()> {
    let context = TransferContext::new(fs, options);
    let failures = upload_tree(context, local_dir.to_path_buf(), remote_dir.to_string()).await?;
    settle(failures, options.child_errors, remote_dir)
}

struct TransferContext {
    fs: Arc<dyn RemoteFilesystem>,
    limiter: Option<Arc<Semaphore>>,
}

impl TransferContext {
    fn new(fs: Arc<dyn RemoteFilesystem>, options: &TransferOptions) -> Arc<TransferContext> {
        let limiter = options
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Arc::new(TransferContext { fs, limiter })
    }

    /// Taken around each file copy only, never across a directory recursion.
    async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        }
    }
}

fn download_tree(
    context: Arc<TransferContext>,
    remote_dir: String,
    local_dir: PathBuf,
) -> BoxFuture<'static, Result<Vec<TransferFailure>>> {
    async move {
        ensure_local_dir(&local_dir).await?;
        let entries = context
            .fs
            .read_dir(&remote_dir)
            .await
            .map_err(|err| Error::transfer(remote_dir.clone(), err))?;

        let mut children = JoinSet::new();
        for entry in entries {
            let context = context.clone();
            let remote_path = join_remote_path(&remote_dir, &entry.name);
            let local_path = local_dir.join(&entry.name);

            children.spawn(async move {
                let result = if entry.is_dir {
                    download_tree(context, remote_path.clone(), local_path).await
                } else {
                    let _permit = context.permit().await;
                    download_file(context.fs.as_ref(), &remote_path, &local_path)
                        .await
                        .map(|_| Vec::new())
                };
                result.unwrap_or_else(|err| vec![TransferFailure::new(remote_path, &err)])
            });
        }

        Ok(join_children(children, &remote_dir).await)
    }
    .boxed()
}

fn upload_tree(
    context: Arc<TransferContext>,
    local_dir: PathBuf,
    remote_dir: String,
) -> BoxFuture<'static, Result<Vec<TransferFailure>>> {
    async move {
        ensure_remote_dir(context.fs.as_ref(), &remote_dir).await?;
        let local_display = local_dir.display().to_string();
        let mut read_dir = tokio::fs::read_dir(&local_dir)
            .await
            .map_err(|err| Error::transfer(local_display.clone(), err))?;

        let mut children = JoinSet::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|err| Error::transfer(local_display.clone(), err))?
        {
            let context = context.clone();
            let name = entry.file_name().to_string_lossy().into_owned();
            let local_path = entry.path();
            let remote_path = join_remote_path(&remote_dir, &name);

            children.spawn(async move {
                let result = match entry.file_type().await {
                    Ok(file_type) if file_type.is_dir() => upload_tree(context, local_path, remote_path.clone()).await,
                    Ok(_) => {
                        let _permit = context.permit().await;
                        upload(context.fs.as_ref(), &local_path, &remote_path)
                            .await
                            .map(|_| Vec::new())
                    }
                    Err(err) => Err(Error::transfer(local_path.display().to_string(), err)),
                };
                result.unwrap_or_else(|err| vec![TransferFailure::new(remote_path, &err)])
            });
        }

        Ok(join_children(children, &remote_dir).await)
    }
    .boxed()
}

async fn join_children(mut children: JoinSet<Vec<TransferFailure>>, parent: &str) -> Vec<TransferFailure> {
    let mut failures = Vec::new();
    while let Some(joined) = children.join_next().await {
        match joined {
            Ok(child_failures) => failures.extend(child_failures),
            Err(join_error) => failures.push(TransferFailure {
                path: parent.to_string(),
                message: join_error.to_string(),
            }),
        }
    }
    failures
}

fn settle(failures: Vec<TransferFailure>, policy: ChildErrorPolicy, root: &str) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    match policy {
        ChildErrorPolicy::BestEffort => {
            for failure in &failures {
                warn!(root = %root, path = %failure.path, error = %failure.message, "skipped failed entry");
            }
            Ok(())
        }
        ChildErrorPolicy::Collect => Err(Error::PartialTransfer { failures }),
    }
}

async fn copy_stream<R, W>(source: &mut R, destination: &mut W, path: &str) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(source, destination)
        .await
        .map_err(|err| Error::transfer(path, err))?;
    destination
        .shutdown()
        .await
        .map_err(|err| Error::transfer(path, err))?;
    Ok(copied)
}
