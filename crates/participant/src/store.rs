//! Local resources owned by a participant

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Storage holding the resources a participant contributes
pub trait ResourceStore: Send + Sync {
    /// Whether `resource` exists locally
    fn exists(&self, resource: &str) -> bool;

    /// Permanently delete `resource`
    ///
    /// The deletion is durable once this returns. Deleting a resource that
    /// does not exist succeeds.
    fn delete(&self, resource: &str) -> io::Result<()>;
}

/// Resources stored as plain files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a resource, if its name stays inside the directory
    fn path_of(&self, resource: &str) -> Option<PathBuf> {
        let plain = !resource.is_empty()
            && resource != "."
            && resource != ".."
            && !resource.contains(['/', '\\']);
        plain.then(|| self.root.join(resource))
    }
}

impl ResourceStore for DirectoryStore {
    fn exists(&self, resource: &str) -> bool {
        self.path_of(resource).is_some_and(|path| path.is_file())
    }

    fn delete(&self, resource: &str) -> io::Result<()> {
        let Some(path) = self.path_of(resource) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid resource name: {resource}"),
            ));
        };

        match fs::remove_file(&path) {
            Ok(()) => sync_dir(&self.root),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
