//! File-backed store.
//!
//! One file per key in a single data directory; `/` in keys becomes `.` in
//! file names. Writes go to a `~`-prefixed temporary file with a unique
//! suffix first and are renamed into place, so concurrent writers of one key
//! never share a temporary file.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tokio::fs;
use tracing::info;

use super::{Store, StoreError, validate_key};

const TEMP_PREFIX: char = '~';

/// Store rooted at a data directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a data directory and check it is writable.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let write_check = root.join(format!("{TEMP_PREFIX}write_check"));
        fs::write(&write_check, b"ok").await?;
        fs::remove_file(&write_check).await?;

        info!(path = %root.display(), "Opened file store");
        Ok(Self { root })
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(key: &str) -> String {
        key.replace('/', ".")
    }

    fn key_of(file_name: &str) -> String {
        file_name.replace('.', "/")
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            match fs::read(self.root.join(Self::file_name(&key))).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            let name = Self::file_name(&key);
            let temp = self.root.join(format!("{TEMP_PREFIX}{name}.{}", uuid::Uuid::new_v4().simple()));
            fs::write(&temp, &value).await?;
            fs::rename(&temp, self.root.join(name)).await?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            match fs::remove_file(self.root.join(Self::file_name(&key))).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }

    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<(String, Vec<u8>)>, StoreError>> {
        let prefix = Self::file_name(prefix);
        Box::pin(async move {
            let mut names = Vec::new();
            let mut dir = fs::read_dir(&self.root).await?;
            while let Some(entry) = dir.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if !name.starts_with(TEMP_PREFIX) && name.starts_with(&prefix) {
                    names.push(name);
                }
            }
            names.sort();

            let mut out = Vec::with_capacity(names.len());
            for name in names {
                let bytes = fs::read(self.root.join(&name)).await?;
                out.push((Self::key_of(&name), bytes));
            }
            Ok(out)
        })
    }
}
