//! Cross-platform application paths

use std::fs;
use std::path::PathBuf;

use crate::BatchError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// OS data dir, e.g. `~/.local/share/motifscape` on Linux.
    pub fn new() -> Result<Self, BatchError> {
        let base = dirs::data_dir().ok_or(BatchError::NoDataDir)?;
        Self::at(base.join("motifscape"))
    }

    pub fn at(data_dir: PathBuf) -> Result<Self, BatchError> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn report_file(&self) -> PathBuf {
        self.data_dir.join("last_report.json")
    }
}
