mod filesystem;

use std::path::{Component, Path, PathBuf};

/// Serves "remote" paths out of a local directory.
///
/// Remote paths are interpreted relative to `root`, so `/a/b` resolves to `root/a/b`.
/// Useful for mirroring between two local trees and for exercising transfers without
/// a server.
#[derive(Debug, Clone)]
pub struct LocalRootFilesystem {
    root: PathBuf,
}

impl LocalRootFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> LocalRootFilesystem {
        LocalRootFilesystem { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a remote path below the root. Parent components never climb above it.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    if resolved != self.root {
                        resolved.pop();
                    }
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_below_root() {
        let fs = LocalRootFilesystem::new("/srv/mirror");
        assert_eq!(fs.resolve("/a/b"), PathBuf::from("/srv/mirror/a/b"));
        assert_eq!(fs.resolve("a/./b"), PathBuf::from("/srv/mirror/a/b"));
        assert_eq!(fs.resolve("/../../etc"), PathBuf::from("/srv/mirror/etc"));
        assert_eq!(fs.resolve("/"), PathBuf::from("/srv/mirror"));
    }
}
