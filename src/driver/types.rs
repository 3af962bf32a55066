//! Types shared by the driver update flow

use std::fmt;

/// Current state of an update check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Installed driver is the newest published one
    UpToDate,
    /// A newer driver is published
    UpdateAvailable,
    /// A newer driver is published but the user skipped that version
    UpdateSkipped,
}

impl UpdateState {
    /// Returns true if a newer driver exists, skipped or not
    pub fn has_update(&self) -> bool {
        matches!(self, UpdateState::UpdateAvailable | UpdateState::UpdateSkipped)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::UpToDate => write!(f, "up to date"),
            UpdateState::UpdateAvailable => write!(f, "update available"),
            UpdateState::UpdateSkipped => write!(f, "update skipped"),
        }
    }
}

/// NVIDIA driver line the user follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverChannel {
    /// Game Ready driver
    #[default]
    Standard,
    /// Studio driver
    Studio,
}

impl DriverChannel {
    /// Driver type id (`dtid`) used by NVIDIA's processDriver endpoint
    pub fn dtid(&self) -> u32 {
        match self {
            DriverChannel::Standard => 1,
            DriverChannel::Studio => 18,
        }
    }
}

impl fmt::Display for DriverChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverChannel::Standard => write!(f, "Game Ready"),
            DriverChannel::Studio => write!(f, "Studio"),
        }
    }
}

/// Locally installed driver as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDriver {
    /// Driver version in NVIDIA notation, e.g. "535.98"
    pub version: String,
    /// GPU display name, e.g. "NVIDIA GeForce RTX 3080"
    pub gpu_name: String,
    pub is_mobile: bool,
    /// DCH driver package (as opposed to a legacy "Standard" package)
    pub is_dch: bool,
}

impl LocalDriver {
    /// GPU name as it appears in NVIDIA's product catalog
    pub fn catalog_name(&self) -> String {
        catalog_name(&self.gpu_name)
    }

    pub fn driver_type(&self) -> &'static str {
        if self.is_dch {
            "DCH"
        } else {
            "Standard"
        }
    }
}

/// Strip vendor prefix and laptop suffix the catalog doesn't use
pub fn catalog_name(gpu_name: &str) -> String {
    let name = gpu_name.trim();
    let name = name.strip_prefix("NVIDIA ").unwrap_or(name);
    let name = name.strip_suffix(" Laptop GPU").unwrap_or(name);
    name.trim().to_string()
}

/// Catalog identifiers for one GPU, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuIdentity {
    /// Product series id
    pub psid: u32,
    /// Product id
    pub pfid: u32,
    /// Operating system id
    pub osid: u32,
    /// Language id
    pub lid: u32,
    /// Driver package type: 1 = DCH, 0 = Standard
    pub dtcid: u32,
}
