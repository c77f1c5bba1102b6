//! The per-node scratch volume.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dispatch::{Workplace, WorkplaceError};
use tracing::debug;

use crate::config::WorkerConfig;

/// Scratch directory shared by the tasks of one worker.
///
/// Contents are wiped only when running inside a sandbox pod; on a developer
/// machine the directory may be somebody's checkout.
#[derive(Debug, Clone)]
pub struct ScratchVolume {
    dir: PathBuf,
    in_sandbox: bool,
}

impl ScratchVolume {
    pub fn new(dir: impl Into<PathBuf>, in_sandbox: bool) -> Self {
        Self {
            dir: dir.into(),
            in_sandbox,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.work_dir.clone(), config.in_sandbox)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Workplace for ScratchVolume {
    fn clean(&self) -> Result<(), WorkplaceError> {
        if !self.in_sandbox {
            debug!("Not running in a sandbox, leaving work directory alone");
            return Ok(());
        }
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "Work directory does not exist");
            return Ok(());
        }

        debug!(dir = %self.dir.display(), "Removing work directory contents");
        let entries = fs::read_dir(&self.dir).map_err(|e| workplace_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| workplace_error(&self.dir, e))?;
            let path = entry.path();
            // file_type() does not follow symlinks, so a link to a directory is unlinked.
            let file_type = entry.file_type().map_err(|e| workplace_error(&path, e))?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| workplace_error(&path, e))?;
        }
        Ok(())
    }
}

fn workplace_error(path: &Path, source: io::Error) -> WorkplaceError {
    WorkplaceError {
        path: path.display().to_string(),
        source,
    }
}
