//! Installer watcher - notices when an NVIDIA driver installation finishes
//!
//! The NVIDIA installer rewrites the DLLs under
//! `%ProgramW6432%\NVIDIA Corporation\Installer2\InstallerCore` as it runs.
//! A burst of changes there means the installed driver may have changed, so
//! watch mode re-probes and re-checks once the burst settles.

use super::{DriverError, DriverResult};
use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Installer directory below `%ProgramW6432%`
const INSTALLER_CORE_SUBDIR: &str = r"NVIDIA Corporation\Installer2\InstallerCore";

/// NVIDIA's installer directory, if it exists on this machine
pub fn installer_core_dir() -> Option<PathBuf> {
    let program_files = std::env::var_os("ProgramW6432")?;
    let dir = PathBuf::from(program_files).join(INSTALLER_CORE_SUBDIR);
    dir.is_dir().then_some(dir)
}

/// Only DLL changes count as installer activity
fn is_installer_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("dll"))
        .unwrap_or(false)
}

fn is_installer_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| is_installer_file(p))
}

/// Watches one directory for installer DLL changes
pub struct InstallerWatcher {
    _watcher: RecommendedWatcher,
    changes: UnboundedReceiver<()>,
    settle: Duration,
}

impl InstallerWatcher {
    /// Watch `dir`. A change is reported once no further change arrived for
    /// `settle`.
    pub fn new(dir: &Path, settle: Duration) -> DriverResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if is_installer_event(&event) => {
                    debug!("Installer file changed: {:?}", event.paths);
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("Installer watch error: {}", e),
            }
        })
        .map_err(|e| DriverError::Watcher(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| DriverError::Watcher(format!("Failed to watch {}: {}", dir.display(), e)))?;

        info!("Watching {} for driver installations", dir.display());
        Ok(Self {
            _watcher: watcher,
            changes: rx,
            settle,
        })
    }

    /// Wait for the next burst of installer changes to settle. Returns false
    /// once the watcher has stopped.
    pub async fn changed(&mut self) -> bool {
        if self.changes.recv().await.is_none() {
            return false;
        }

        loop {
            match tokio::time::timeout(self.settle, self.changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return false,
                Err(_) => return true,
            }
        }
    }
}
