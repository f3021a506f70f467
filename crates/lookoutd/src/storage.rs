//! Directory-backed storage for enrollment samples.
//!
//! Each enrollment session owns one directory named after the subject. A
//! directory that already exists is never reused, and sample files are
//! created with `create_new` so nothing is ever overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Attempts at finding an unused sample file name before giving up.
const MAX_SAMPLE_NAME_ATTEMPTS: u32 = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("location {0} already exists")]
    AlreadyExists(String),
    #[error("invalid location name {0:?}")]
    InvalidName(String),
    #[error("no free sample name in {0}")]
    NoFreeName(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One session's storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLocation {
    /// Directory name; also the label the subject is registered under.
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh location for `name`.
    ///
    /// Fails with [`StorageError::AlreadyExists`] when the location is taken,
    /// so callers can pick another name.
    pub async fn create_location(&self, name: &str) -> Result<SampleLocation, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_err(&self.root))?;

        let path = self.root.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "sample location created");
                Ok(SampleLocation {
                    label: name.to_string(),
                    path,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Persist one sample image under a new, unique file name.
    pub async fn save_sample(&self, location: &SampleLocation, image: &[u8]) -> Result<PathBuf, StorageError> {
        let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S%.3f");
        for n in 0..MAX_SAMPLE_NAME_ATTEMPTS {
            let path = location.path.join(format!("sample-{stamp}-{n}.png"));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(image).await.map_err(io_err(&path))?;
                    file.flush().await.map_err(io_err(&path))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        Err(StorageError::NoFreeName(location.path.clone()))
    }

    /// Sample files in a location, sorted by name.
    pub async fn list_samples(&self, location: &SampleLocation) -> Result<Vec<PathBuf>, StorageError> {
        let mut entries = tokio::fs::read_dir(&location.path)
            .await
            .map_err(io_err(&location.path))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&location.path))? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}
