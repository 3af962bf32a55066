//! Update decision - compares local and online driver versions
//!
//! NVIDIA versions look like "536.23" but a value can arrive with a comma
//! separator ("536,23") depending on the locale that produced it. Parsing
//! retries once with the separator normalized before giving up.

use super::types::UpdateState;
use super::{DriverError, DriverResult};
use log::{debug, info};
use std::cmp::Ordering;

/// How the skip button should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipControl {
    pub visible: bool,
    pub enabled: bool,
}

/// Outcome of comparing the installed driver with the published one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub state: UpdateState,
    /// Offer to download the new installer
    pub show_download: bool,
    pub skip_control: SkipControl,
    /// Raise a toast for this update
    pub notify: bool,
    /// Stored skip marker no longer matches the online version
    pub clear_skip_marker: bool,
}

/// Parse a driver version as a decimal number
pub fn parse_version(version: &str) -> DriverResult<f64> {
    let trimmed = version.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return Ok(value);
    }

    debug!("Version '{}' did not parse, retrying with normalized separator", trimmed);
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| DriverError::VersionFormat(version.to_string()))
}

/// Numeric ordering of two driver versions
pub fn compare_versions(local: &str, online: &str) -> DriverResult<Ordering> {
    let local = parse_version(local)?;
    let online = parse_version(online)?;
    local
        .partial_cmp(&online)
        .ok_or_else(|| DriverError::VersionFormat(format!("{} / {}", local, online)))
}

/// Decide what to offer given both versions and the persisted skip marker
pub fn decide(local: &str, online: &str, skipped: Option<&str>) -> DriverResult<Decision> {
    let newer_online = compare_versions(local, online)? == Ordering::Less;
    let skip_matches = skipped.is_some_and(|s| same_version(s, online));
    let clear_skip_marker = skipped.is_some() && !skip_matches;

    let decision = if !newer_online {
        info!("Local version is up to date");
        Decision {
            state: UpdateState::UpToDate,
            show_download: false,
            skip_control: SkipControl {
                visible: false,
                enabled: false,
            },
            notify: false,
            clear_skip_marker,
        }
    } else if skip_matches {
        info!("Online version {} was skipped by the user", online);
        Decision {
            state: UpdateState::UpdateSkipped,
            show_download: false,
            skip_control: SkipControl {
                visible: true,
                enabled: false,
            },
            notify: false,
            clear_skip_marker: false,
        }
    } else {
        info!("Local version {} is older than online {}", local, online);
        Decision {
            state: UpdateState::UpdateAvailable,
            show_download: true,
            skip_control: SkipControl {
                visible: true,
                enabled: true,
            },
            notify: true,
            clear_skip_marker,
        }
    };

    Ok(decision)
}

/// Versions equal as strings or as numbers ("536,23" == "536.23")
fn same_version(a: &str, b: &str) -> bool {
    if a.trim() == b.trim() {
        return true;
    }
    matches!((parse_version(a), parse_version(b)), (Ok(x), Ok(y)) if x == y)
}
