use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

const SCRATCH_PREFIX: &str = "mkv-chapter-editor-";

/// Private scratch directory of one edit session. Removed on [`ScratchDir::close`] or drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
        log::debug!("Created scratch directory {}", dir.path().display());
        Ok(ScratchDir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        log::debug!("Removed scratch directory {}", path.display());
        Ok(())
    }
}
