use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::StorageError;

/// Flat directory of uploaded files, addressed by generated names.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c: char| c == '/' || c == '\\')
            && !name.contains("..");
        if !valid {
            return Err(StorageError::InvalidPath(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Writes through a temporary file and renames it into place.
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let full_path = self.resolve(name)?;
        debug!(stored_name = %name, size = data.len(), "writing file to local storage");
        self.ensure_root().await?;

        let temp_path = self.root.join(format!(".{name}.partial"));
        let mut file = fs::File::create(&temp_path).await?;
        if let Err(err) = write_all_synced(&mut file, data).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|err| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %err, "local storage rename failed");
            err
        })?;
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve(name)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the file; a file that is already gone counts as removed.
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(name)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let full_path = self.resolve(name)?;
        Ok(fs::try_exists(full_path).await?)
    }

    /// Lists stored file names, skipping in-flight temporary files.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

async fn write_all_synced(file: &mut fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.sync_all().await
}
