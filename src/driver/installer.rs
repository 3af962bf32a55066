//! Installer launcher - starts a downloaded NVIDIA driver installer

use super::downloader::existing_installer;
use super::{DriverError, DriverResult};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Launch the installer at `path`. The installer runs detached and elevates
/// itself, so this returns as soon as the process is spawned.
pub fn launch_installer(path: &Path) -> DriverResult<()> {
    if !path.is_file() {
        return Err(DriverError::InstallerMissing(path.display().to_string()));
    }

    info!("Launching driver installer: {}", path.display());

    match Command::new(path).spawn() {
        Ok(child) => {
            info!("Installer started (pid {})", child.id());
            Ok(())
        }
        Err(e) => {
            error!("Failed to launch installer: {}", e);
            Err(DriverError::Io(e))
        }
    }
}

/// Installer for `version` in `dir`, or `InstallerMissing`
pub fn find_installer(dir: &Path, version: &str) -> DriverResult<PathBuf> {
    existing_installer(dir, version).ok_or_else(|| {
        DriverError::InstallerMissing(
            dir.join(super::downloader::installer_filename(version))
                .display()
                .to_string(),
        )
    })
}
