use std::path::Path;

use tracing::debug;

use crate::{
    error::{Error, Result},
    filesystem::RemoteFilesystem,
};

/// Makes sure `path` and every missing ancestor exist on the remote side.
///
/// Prefixes are walked from the root separator. Existing prefixes are skipped and
/// missing ones are created. The first creation failure is returned and whatever was
/// created before it stays in place.
pub async fn ensure_remote_dir<F>(fs: &F, path: &str) -> Result<()>
where
    F: RemoteFilesystem + ?Sized,
{
    let mut prefix = String::new();
    if path.starts_with('/') {
        prefix.push('/');
    }

    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix.push_str(component);

        // a failed probe counts as missing, the create call reports the real problem
        if fs.exists(&prefix).await.unwrap_or(false) {
            continue;
        }

        debug!(path = %prefix, "creating remote directory");
        if let Err(err) = fs.create_dir(&prefix).await {
            // lost a race against a concurrent creator of the same prefix
            if fs.exists(&prefix).await.unwrap_or(false) {
                debug!(path = %prefix, "remote directory appeared concurrently");
                continue;
            }
            return Err(Error::directory(prefix, err));
        }
    }

    Ok(())
}

pub async fn ensure_local_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| Error::directory(path.display().to_string(), err))
}
