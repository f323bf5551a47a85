//! Materializes chunk frames as staged files.
//!
//! Each invocation owns a [`Stager`]. Chunks are appended to
//! `<staging_dir>/<id>_<binary_name>` in the order they arrive; the ID prefix
//! keeps concurrent invocations apart, so no locking is needed.

use flasherd_core::{
    Error, Result,
    frame::ChunkFrame,
    types::{RequestId, staged_file_name, validate_binary_name},
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Path of the staged binary `name` for invocation `id`.
pub fn staged_path(staging_dir: &Path, id: RequestId, name: &str) -> PathBuf {
    staging_dir.join(staged_file_name(id, name))
}

/// Appends chunk frames for one invocation.
pub struct Stager {
    staging_dir: PathBuf,
    id: RequestId,
    limit: Option<u64>,
    bytes_staged: u64,
    open: HashMap<String, File>,
    staged: BTreeMap<String, PathBuf>,
}

impl Stager {
    pub fn new(staging_dir: impl Into<PathBuf>, id: RequestId, limit: Option<u64>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            id,
            limit,
            bytes_staged: 0,
            open: HashMap::new(),
            staged: BTreeMap::new(),
        }
    }

    /// Appends `chunk` to its staged file, creating the file on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for a binary name that is not a plain
    ///   file name.
    /// - [`Error::StagingLimit`] if the chunk would take the invocation past
    ///   its byte limit. Nothing is written in that case.
    /// - [`Error::Staging`] if the file cannot be opened or written.
    pub async fn append(&mut self, chunk: &ChunkFrame) -> Result<()> {
        let len = chunk.data.len() as u64;
        if let Some(limit) = self.limit {
            if self.bytes_staged.saturating_add(len) > limit {
                return Err(Error::StagingLimit { limit });
            }
        }

        let path = staged_path(&self.staging_dir, self.id, &chunk.binary_name);
        if !self.open.contains_key(&chunk.binary_name) {
            validate_binary_name(&chunk.binary_name)?;
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .await
                .map_err(|source| Error::Staging {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!("Staging {} at {}", chunk.binary_name, path.display());
            self.open.insert(chunk.binary_name.clone(), file);
            self.staged.insert(chunk.binary_name.clone(), path.clone());
        }

        // Entry was inserted above if it was missing.
        if let Some(file) = self.open.get_mut(&chunk.binary_name) {
            file.write_all(&chunk.data)
                .await
                .map_err(|source| Error::Staging { path, source })?;
        }
        self.bytes_staged += len;
        Ok(())
    }

    pub fn bytes_staged(&self) -> u64 {
        self.bytes_staged
    }

    /// Flushes and closes every staged file and returns the binaries staged
    /// by this invocation.
    ///
    /// Must complete before the command runs: `tokio::fs::File` writes in the
    /// background and a child could otherwise observe a truncated file.
    pub async fn finish(mut self) -> Result<BTreeMap<String, PathBuf>> {
        for (name, mut file) in self.open.drain() {
            let flushed = match file.flush().await {
                Ok(()) => file.sync_all().await,
                Err(e) => Err(e),
            };
            flushed.map_err(|source| Error::Staging {
                path: staged_path(&self.staging_dir, self.id, &name),
                source,
            })?;
        }
        Ok(self.staged)
    }
}
