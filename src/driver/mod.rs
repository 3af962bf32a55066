//! NVIDIA driver update module
//!
//! Architecture:
//! - probe.rs: local driver version and GPU detection
//! - catalog.rs: NVIDIA lookup service, maps a GPU to its driver-results page
//! - scraper.rs: fetches the driver page and extracts version + download link
//! - decision.rs: version comparison and skip handling
//! - marker.rs: skip-version and studio-channel sentinel files
//! - downloader.rs: background installer download with progress events
//! - installer.rs: launches a downloaded installer
//! - checker.rs: one full check cycle and the periodic watch loop
//! - watcher.rs: notices finished driver installations in watch mode

pub mod catalog;
pub mod checker;
pub mod decision;
pub mod downloader;
pub mod installer;
pub mod marker;
pub mod probe;
pub mod scraper;
pub mod types;
pub mod watcher;

pub use catalog::{CatalogResolver, ResolvedPage};
pub use checker::{CheckReport, DriverChecker, InstallPlan};
pub use decision::{decide, parse_version, Decision, SkipControl};
pub use downloader::{DownloadEvent, DownloadJob, DownloadManager, DownloadStatus};
pub use marker::MarkerStore;
pub use probe::{DriverProbe, FakeProbe, SystemProbe};
pub use scraper::{HttpFetcher, PageFetcher, PageScraper, RegexExtractor, ScrapedRelease, VersionExtractor};
pub use types::{DriverChannel, GpuIdentity, LocalDriver, UpdateState};
pub use watcher::{installer_core_dir, InstallerWatcher};

/// Driver update errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Could not find {what} in page {url}")]
    ParseFailure { url: String, what: &'static str },

    #[error("Invalid API response from NVIDIA. Attempted API call: {request}")]
    InvalidCatalogResponse { request: String },

    #[error("Studio driver channel is not available for this GPU")]
    ChannelUnsupported,

    #[error("Unrecognized driver version: {0}")]
    VersionFormat(String),

    #[error("No supported NVIDIA GPU found")]
    NoSupportedGpu,

    #[error("GPU '{0}' was not found in the NVIDIA product catalog")]
    GpuNotInCatalog(String),

    #[error("A download for this installer is already running")]
    DownloadInProgress,

    #[error("Download incomplete: expected {expected} bytes, got {received}")]
    IncompleteDownload { expected: u64, received: u64 },

    #[error("Installer not found: {0}")]
    InstallerMissing(String),

    #[error("File watcher error: {0}")]
    Watcher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// Process exit code for an error that ends the program
    pub fn exit_code(&self) -> u8 {
        match self {
            DriverError::Network(_) | DriverError::HttpStatus { .. } => 11,
            DriverError::InvalidCatalogResponse { .. } => 10,
            DriverError::NoSupportedGpu => 255,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DriverError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => DriverError::Network(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(DriverError::Network("offline".into()).exit_code(), 11);
        assert_eq!(
            DriverError::InvalidCatalogResponse {
                request: "https://www.nvidia.com/Download/processDriver.aspx".into()
            }
            .exit_code(),
            10
        );
        assert_eq!(DriverError::NoSupportedGpu.exit_code(), 255);
        assert_eq!(DriverError::GpuNotInCatalog("GeForce 8800".into()).exit_code(), 1);
    }
}
