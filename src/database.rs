use serde::{de::DeserializeOwned, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::RwLock, time};
use tracing::{debug, error};

const SAVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Codec(String),
    #[error("Save to {0} timed out")]
    Timeout(String),
}

#[derive(Debug)]
struct DatabaseInner<T> {
    data: T,
    path: PathBuf,
}

/// A bincode file mirrored in memory. Every `transaction` writes the whole
/// document back before the in-memory copy is replaced.
#[derive(Debug)]
pub struct Database<T> {
    inner: Arc<RwLock<DatabaseInner<T>>>,
}

impl<T> Clone for Database<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> Database<T> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create database directory: {}", e);
                DbError::Io(e)
            })?;
        }

        let data = match fs::read(&path).await {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to deserialize database {}: {}", path.display(), e);
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No database at {}, starting empty", path.display());
                T::default()
            }
            Err(e) => {
                error!("Failed to read database {}: {}", path.display(), e);
                T::default()
            }
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(DatabaseInner { data, path })),
        })
    }

    async fn persist(path: &Path, data: &T) -> Result<(), DbError> {
        let bytes = bincode::serialize(data).map_err(|e| DbError::Codec(e.to_string()))?;
        let tmp = path.with_extension("tmp");

        let write = async {
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, path).await
        };

        match time::timeout(SAVE_TIMEOUT, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Database save to {} timed out", path.display());
                Err(DbError::Timeout(path.display().to_string()))
            }
        }
    }

    pub async fn get_data(&self) -> T {
        self.inner.read().await.data.clone()
    }

    /// Applies `f` to a copy of the data and swaps it in once it is on disk.
    /// The write lock is held throughout so concurrent transactions cannot
    /// overwrite each other.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.write().await;
        let mut data = guard.data.clone();
        let result = f(&mut data);

        Self::persist(&guard.path, &data).await?;
        guard.data = data;

        Ok(result)
    }

    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().await;
        f(&guard.data)
    }
}
