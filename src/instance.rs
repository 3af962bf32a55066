//! Single-instance lock per data directory
//!
//! Only the process holding the lock may clean up abandoned downloads or
//! start new ones; a second process would otherwise delete the partial file
//! the first one is still writing.
//!
//! Windows uses a named mutex, other targets an `flock` on a lock file.

use crate::driver::downloader::cleanup_partial_downloads;
use log::{info, warn};
use std::path::Path;

/// Result of single-instance check
pub enum SingleInstanceResult {
    Acquired(SingleInstanceGuard),
    AlreadyRunning,
    CheckFailed,
}

impl SingleInstanceResult {
    pub fn is_acquired(&self) -> bool {
        matches!(self, SingleInstanceResult::Acquired(_))
    }
}

/// Remove abandoned partial downloads, but only while this process owns the
/// data directory. Returns how many were removed.
pub fn cleanup_if_owner(instance: &SingleInstanceResult, data_dir: &Path) -> usize {
    match instance {
        SingleInstanceResult::Acquired(_) => cleanup_partial_downloads(data_dir),
        SingleInstanceResult::AlreadyRunning => {
            info!("Another instance owns {}, leaving downloads alone", data_dir.display());
            0
        }
        SingleInstanceResult::CheckFailed => {
            warn!("Instance check failed, skipping download cleanup");
            0
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::SingleInstanceResult;
    use log::warn;
    use std::ffi::CString;
    use std::path::Path;
    use windows::core::PCSTR;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexA;

    /// RAII wrapper for the Windows mutex handle
    pub struct SingleInstanceGuard {
        handle: HANDLE,
    }

    impl Drop for SingleInstanceGuard {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }

    /// Mutex names can't contain backslashes outside the namespace prefix
    pub(super) fn mutex_name(data_dir: &Path) -> String {
        let dir: String = data_dir
            .to_string_lossy()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("Local\\DriverScout_{}", dir)
    }

    pub fn try_acquire_single_instance(data_dir: &Path) -> SingleInstanceResult {
        let mutex_name = match CString::new(mutex_name(data_dir)) {
            Ok(name) => name,
            Err(_) => return SingleInstanceResult::CheckFailed,
        };

        unsafe {
            match CreateMutexA(None, true, PCSTR(mutex_name.as_ptr() as *const u8)) {
                Ok(handle) => {
                    if GetLastError() == ERROR_ALREADY_EXISTS {
                        let _ = CloseHandle(handle);
                        SingleInstanceResult::AlreadyRunning
                    } else {
                        SingleInstanceResult::Acquired(SingleInstanceGuard { handle })
                    }
                }
                Err(e) => {
                    warn!("Failed to create single-instance mutex: {}", e);
                    SingleInstanceResult::CheckFailed
                }
            }
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::SingleInstanceResult;
    use log::warn;
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    const LOCK_FILENAME: &str = ".driverscout.lock";

    /// Holds the locked file; closing it releases the lock
    pub struct SingleInstanceGuard {
        _file: File,
    }

    pub fn try_acquire_single_instance(data_dir: &Path) -> SingleInstanceResult {
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(data_dir.join(LOCK_FILENAME))
        {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to open lock file, continuing anyway: {}", e);
                return SingleInstanceResult::CheckFailed;
            }
        };

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return SingleInstanceResult::Acquired(SingleInstanceGuard { _file: file });
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            SingleInstanceResult::AlreadyRunning
        } else {
            warn!("flock() failed: {}, continuing anyway", err);
            SingleInstanceResult::CheckFailed
        }
    }
}

pub use imp::{try_acquire_single_instance, SingleInstanceGuard};
