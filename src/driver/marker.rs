//! Sentinel files - persists the skipped version and the driver channel
//!
//! Two flat files in the data directory:
//! - skip file: holds the version string the user chose to skip
//! - studio file: presence alone selects the Studio channel

use super::types::DriverChannel;
use super::DriverResult;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Skip marker file name
const SKIP_FILENAME: &str = "skip.flag";

/// Studio channel marker file name
const STUDIO_FILENAME: &str = "studio.flag";

/// Reads and writes the sentinel files in one directory
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn skip_path(&self) -> PathBuf {
        self.dir.join(SKIP_FILENAME)
    }

    fn studio_path(&self) -> PathBuf {
        self.dir.join(STUDIO_FILENAME)
    }

    /// Version the user skipped, if any
    pub fn skipped_version(&self) -> Option<String> {
        let content = fs::read_to_string(self.skip_path()).ok()?;
        let version = content.lines().next()?.trim();
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }

    /// Remember `version` as skipped
    pub fn skip_version(&self, version: &str) -> DriverResult<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.skip_path(), version)?;
        info!("Skip marker written: version={}", version);
        Ok(())
    }

    /// Delete the skip marker
    pub fn clear_skip(&self) {
        let path = self.skip_path();
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete skip marker: {}", e);
            } else {
                info!("Skip marker deleted");
            }
        }
    }

    /// Channel selected by the presence of the studio marker
    pub fn channel(&self) -> DriverChannel {
        if self.studio_path().exists() {
            DriverChannel::Studio
        } else {
            DriverChannel::Standard
        }
    }

    /// Select a driver channel. Returns true if the selection changed.
    pub fn set_channel(&self, channel: DriverChannel) -> DriverResult<bool> {
        if self.channel() == channel {
            return Ok(false);
        }

        let path = self.studio_path();
        match channel {
            DriverChannel::Studio => {
                fs::create_dir_all(&self.dir)?;
                fs::File::create(&path)?;
                info!("Switched to studio driver");
            }
            DriverChannel::Standard => {
                fs::remove_file(&path)?;
                info!("Switched to game ready driver");
            }
        }
        Ok(true)
    }
}
