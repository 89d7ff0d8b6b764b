//! Filesystem object store for cached media bytes.
//!
//! One file per cached object, named by the object cache. Writes land in a
//! uniquely named `.part` file first and are renamed into place, so a reader
//! never observes a partially written object and concurrent writers of
//! unrelated objects never touch the same path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::{fs, io::AsyncWriteExt};

use crate::Error;

const PARTIAL_SUFFIX: &str = ".part";

/// Directory-backed byte store.
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    next_partial: AtomicU64,
}

impl ObjectStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    ///
    /// Partial files left behind by an interrupted write are removed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut removed = 0usize;
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) => tracing::warn!(path = %entry.path().display(), error = %err, "failed to remove partial object"),
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "removed partial objects from interrupted writes");
        }

        Ok(Self { root, next_partial: AtomicU64::new(0) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a local name to its path inside the store.
    ///
    /// Names must be a single plain file name; anything that could escape the
    /// root or collide with partial files is rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, Error> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.ends_with(PARTIAL_SUFFIX)
            && !name.contains(['/', '\\', '\0'])
            && !name.contains("..");
        if !valid {
            return Err(Error::InvalidObjectName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Write `bytes` under `name`, replacing any previous object.
    ///
    /// Returns the number of bytes written.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<u64, Error> {
        let target = self.path_for(name)?;
        let seq = self.next_partial.fetch_add(1, Ordering::Relaxed);
        let partial = self.root.join(format!("{name}.{seq}{PARTIAL_SUFFIX}"));

        let result: std::io::Result<()> = async {
            let mut file = fs::File::create(&partial).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, &target).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&partial).await;
            return Err(err.into());
        }

        Ok(bytes.len() as u64)
    }

    /// True if an object file exists under `name`.
    pub async fn exists(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Length of the object file, or `None` if it doesn't exist.
    pub async fn file_len(&self, name: &str) -> Result<Option<u64>, Error> {
        let path = self.path_for(name)?;
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Open an object for reading, or `None` if it doesn't exist.
    pub async fn open_file(&self, name: &str) -> Result<Option<fs::File>, Error> {
        let path = self.path_for(name)?;
        match fs::File::open(path).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a whole object into memory, or `None` if it doesn't exist.
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.path_for(name)?;
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove an object.
    ///
    /// Returns the length of the removed file, or `None` if it was already
    /// gone. Missing files are not an error.
    pub async fn remove(&self, name: &str) -> Result<Option<u64>, Error> {
        let path = self.path_for(name)?;
        let len = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(Some(len)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Names of all complete objects currently on disk.
    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(PARTIAL_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
