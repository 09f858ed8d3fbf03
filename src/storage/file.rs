use super::Storage;
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// [`Storage`] keeping one JSON file per key.
///
/// Structure: `{root}/{key[0:2]}/{key}.json`. Keys may only contain ASCII
/// letters, digits, `-`, `_` and `.`.
#[derive(Debug, Clone)]
pub struct FileStorage<T> {
    root: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T> FileStorage<T> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _item: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PipelineError::Storage(format!(
                "Invalid storage key '{}'",
                key
            )));
        }
        let prefix: String = key.chars().take(2).collect();
        Ok(self
            .root
            .join(prefix)
            .join(format!("{}.{}", key, EXTENSION)))
    }

    /// All keys, sorted.
    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(io_error(&self.root, e)),
        };
        while let Some(dir) = dirs.next_entry().await.map_err(|e| io_error(&self.root, e))? {
            let dir_path = dir.path();
            let is_dir = dir
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let mut files = tokio::fs::read_dir(&dir_path)
                .await
                .map_err(|e| io_error(&dir_path, e))?;
            while let Some(file) = files.next_entry().await.map_err(|e| io_error(&dir_path, e))? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl<T> Storage<T> for FileStorage<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get_item(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let item = serde_json::from_slice(&data).map_err(|e| {
            PipelineError::Storage(format!("Corrupted item {}: {}", path.display(), e))
        })?;
        tracing::trace!(key, path = %path.display(), "Read storage item");
        Ok(Some(item))
    }

    async fn set_item(&self, key: &str, value: T) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(&value)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        tracing::debug!(key, path = %path.display(), "Stored item");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.root, e)),
        }
    }

    async fn key(&self, index: usize) -> Result<Option<String>> {
        Ok(self.keys().await?.into_iter().nth(index))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }
}
