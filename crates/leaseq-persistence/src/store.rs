use crate::{Checkpoint, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Configuration for the checkpoint store
#[derive(Debug, Clone)]
pub struct CheckpointStoreConfig {
    pub checkpoint_dir: PathBuf,
    pub checkpoint_file: String,
}

impl Default for CheckpointStoreConfig {
    fn default() -> Self {
        CheckpointStoreConfig {
            checkpoint_dir: PathBuf::from("./"),
            checkpoint_file: "checkpoint.json".to_string(),
        }
    }
}

/// Single-file checkpoint store.
///
/// `save` writes to a temporary file next to the checkpoint, syncs it, then
/// renames it over the old one, so readers only ever see the previous
/// checkpoint or the new one in full.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    path: PathBuf,
}

impl CheckpointStore {
    /// Open the store, creating the checkpoint directory if needed
    pub fn open(config: CheckpointStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.checkpoint_dir)?;

        let path = config.checkpoint_dir.join(&config.checkpoint_file);
        info!("Opened checkpoint store at {:?}", path);

        Ok(CheckpointStore {
            dir: config.checkpoint_dir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the checkpoint. A missing file is `Ok(None)`; anything else that
    /// goes wrong is an error the caller must not paper over.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No checkpoint at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let checkpoint = Checkpoint::from_bytes(&bytes)?;
        info!(
            "Loaded checkpoint from {:?} ({} queues, {} tasks, saved at {})",
            self.path,
            checkpoint.queues.len(),
            checkpoint.task_count(),
            checkpoint.saved_at
        );
        Ok(Some(checkpoint))
    }

    /// Atomically replace the checkpoint
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = checkpoint.to_bytes()?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        sync_dir(&self.dir)?;

        debug!(
            "Wrote checkpoint to {:?} ({} bytes, {} tasks)",
            self.path,
            bytes.len(),
            checkpoint.task_count()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
