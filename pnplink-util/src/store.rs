use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tracing::trace;

use super::fs::{run_async, safe_write_all};

/// A filesystem backed store
///
/// Holds the device documents (JSON) and the raw files the agent needs at
/// startup, such as the TLS certificates. It supports atomic writes but no
/// concurrency.
#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("path must not have any `..` segments")]
    InvalidPath,
}

impl Store {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    // Constructs a full path for a given relative path, rejecting anything
    // that would escape the store root
    fn with_root(&self, path: &Path) -> Result<PathBuf, StoreError> {
        let doc_path = path.strip_prefix("/").unwrap_or(path);

        for component in doc_path.components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StoreError::InvalidPath);
            }
        }
        Ok(self.root.join(doc_path))
    }

    /// Create or update the JSON document with the given key
    pub async fn write<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError> {
        let full_path = self.with_root(Path::new(key))?.with_extension("json");
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let buf = serde_json::to_vec(&value)?;
        trace!("writing {}", full_path.display());
        run_async(move || safe_write_all(full_path, buf)).await?;
        Ok(())
    }

    /// Read the JSON document with the given key
    ///
    /// Returns `None` if the document does not exist.
    pub async fn read<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StoreError> {
        let full_path = self.with_root(Path::new(key))?.with_extension("json");
        trace!("reading {}", full_path.display());

        match fs::read_to_string(&full_path).await {
            Ok(contents) => {
                let document = serde_json::from_str::<V>(&contents)?;
                Ok(Some(document))
            }
            Err(err) => match err.kind() {
                io::ErrorKind::NotFound => Ok(None),
                _ => Err(err.into()),
            },
        }
    }

    /// Read a raw file, e.g. a PEM encoded certificate
    ///
    /// Absolute paths are used as given, relative paths are resolved against
    /// the store root. Returns `None` if the file does not exist.
    pub async fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<Option<Vec<u8>>, StoreError> {
        let path = path.as_ref();
        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.with_root(path)?
        };
        trace!("reading {}", full_path.display());

        match fs::read(&full_path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
