use std::fs::{self, File};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::MediaRecord;

/// A record's original file, available on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub len: u64,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("media record has no original size variant")]
    NoOriginal,

    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("file not readable: {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait FileResolver {
    fn resolve(&self, record: &MediaRecord) -> Result<LocalFile, ResolveError>;
}

/// Resolves original variants relative to a library root directory.
#[derive(Debug, Clone)]
pub struct LocalFsResolver {
    root: PathBuf,
}

impl LocalFsResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileResolver for LocalFsResolver {
    fn resolve(&self, record: &MediaRecord) -> Result<LocalFile, ResolveError> {
        let original = record.original().ok_or(ResolveError::NoOriginal)?;
        // join() keeps absolute variant paths as they are
        let path = self.root.join(&original.path);

        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::Missing(path));
            }
            Err(source) => return Err(ResolveError::Unreadable { path, source }),
        };
        if !metadata.is_file() {
            return Err(ResolveError::Missing(path));
        }
        if let Err(source) = File::open(&path) {
            return Err(ResolveError::Unreadable { path, source });
        }
        let modified = metadata
            .modified()
            .map_err(|source| ResolveError::Unreadable {
                path: path.clone(),
                source,
            })?;

        Ok(LocalFile {
            path,
            modified: DateTime::<Utc>::from(modified),
            len: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::tempdir;

    #[test]
    fn test_resolves_relative_original() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("original")).unwrap();
        let file = dir.path().join("original/a.jpg");
        fs::write(&file, b"jpeg").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_643_658_600, 0)).unwrap();

        let record = MediaRecord::new(1, "a", Utc::now()).with_original("original/a.jpg");
        let local = LocalFsResolver::new(dir.path()).resolve(&record).unwrap();

        assert_eq!(local.path, file);
        assert_eq!(local.len, 4);
        assert_eq!(local.modified.timestamp(), 1_643_658_600);
    }

    #[test]
    fn test_missing_file_and_variant() {
        let dir = tempdir().unwrap();
        let resolver = LocalFsResolver::new(dir.path());

        let no_variant = MediaRecord::new(1, "a", Utc::now());
        assert!(matches!(resolver.resolve(&no_variant), Err(ResolveError::NoOriginal)));

        let gone = MediaRecord::new(2, "b", Utc::now()).with_original("nope.jpg");
        assert!(matches!(resolver.resolve(&gone), Err(ResolveError::Missing(_))));

        let dir_record = MediaRecord::new(3, "c", Utc::now()).with_original(".");
        assert!(matches!(resolver.resolve(&dir_record), Err(ResolveError::Missing(_))));
    }
}
