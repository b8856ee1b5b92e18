//! Publication of committed artifacts

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes committed payloads into a directory, one file per transaction
#[derive(Debug, Clone)]
pub struct Publisher {
    dir: PathBuf,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the artifact for `name` lives
    pub fn path_of(&self, name: &str) -> io::Result<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid artifact name: {name}"),
            ));
        }
        Ok(self.dir.join(name))
    }

    /// Atomically write `payload` as the artifact `name`
    ///
    /// Either the complete payload is visible under its name afterwards,
    /// or nothing is.
    pub fn publish(&self, name: &str, payload: &[u8]) -> io::Result<()> {
        let path = self.path_of(name)?;
        fs::create_dir_all(&self.dir)?;

        let tmp = self.dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(payload)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        sync_dir(&self.dir)
    }

    /// Remove the artifact `name`; a missing artifact is not an error
    pub fn retract(&self, name: &str) -> io::Result<()> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => sync_dir(&self.dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_published(&self, name: &str) -> bool {
        self.path_of(name).is_ok_and(|path| path.is_file())
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_publish_and_retract() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(dir.path().join("out"));

        publisher.publish("collage.jpg", b"pixels").unwrap();
        assert!(publisher.is_published("collage.jpg"));
        assert_eq!(
            fs::read(dir.path().join("out/collage.jpg")).unwrap(),
            b"pixels"
        );

        // No temporary files left behind
        let entries: Vec<_> = fs::read_dir(publisher.dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        publisher.retract("collage.jpg").unwrap();
        assert!(!publisher.is_published("collage.jpg"));
        publisher.retract("collage.jpg").unwrap();
    }

    #[test]
    fn test_rejects_names_outside_the_directory() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(dir.path());

        assert!(publisher.publish("../escape.jpg", b"x").is_err());
        assert!(publisher.publish("", b"x").is_err());
        assert!(!publisher.is_published(".."));
    }
}
