//! Settings persistence module
//!
//! Saves and loads app settings to/from disk, and builds the `AppContext`
//! handed to every component instead of process-wide globals.

use crate::driver::marker::MarkerStore;
use crate::driver::probe::{DriverProbe, FakeProbe, SystemProbe};
use crate::driver::{DriverError, DriverResult};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";
pub const APP_NAME: &str = "DriverScout";

/// Browser user agent; NVIDIA's download host rejects some non-browser agents
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0";

/// App settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    /// Hours between checks in watch mode
    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,
    /// NVIDIA catalog language id (1 = English US)
    #[serde(default = "default_language_id")]
    pub language_id: u32,
    /// Timeout for catalog and page requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Show a toast when an update is found or a download fails
    #[serde(default = "default_notifications")]
    pub notifications_enabled: bool,
    /// Directory for markers and installers (None = next to the executable)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// GPU reported by `--fake`
    #[serde(default = "default_fake_gpu")]
    pub fake_gpu_name: String,
    /// Driver version reported by `--fake`
    #[serde(default = "default_fake_version")]
    pub fake_driver_version: String,
}

fn default_check_interval() -> u64 {
    5
}

fn default_language_id() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_notifications() -> bool {
    true
}

fn default_fake_gpu() -> String {
    "NVIDIA GeForce RTX 3080".to_string()
}

fn default_fake_version() -> String {
    "466.11".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            check_interval_hours: default_check_interval(),
            language_id: default_language_id(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            notifications_enabled: default_notifications(),
            data_dir: None,
            fake_gpu_name: default_fake_gpu(),
            fake_driver_version: default_fake_version(),
        }
    }
}

/// Get the settings directory path
/// Windows: %APPDATA%\DriverScout\
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn get_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Directory for the log and crash files
/// Windows: %LOCALAPPDATA%\DriverScout\
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load settings from disk
pub fn load_settings() -> AppSettings {
    match get_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("Could not determine settings path, using defaults");
            AppSettings::default()
        }
    }
}

/// Load settings from `path`, falling back to defaults when missing or corrupt
pub fn load_settings_from(path: &Path) -> AppSettings {
    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return AppSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                AppSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            AppSettings::default()
        }
    }
}

/// Save settings to `path`
pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create settings directory: {}", e))?;
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    fs::write(path, json).map_err(|e| format!("Failed to write settings file: {}", e))?;
    info!("Saved settings to {:?}", path);
    Ok(())
}

/// Everything a component needs to know about its environment
#[derive(Debug, Clone)]
pub struct AppContext {
    pub settings: AppSettings,
    /// Directory holding markers and downloaded installers
    pub data_dir: PathBuf,
    /// Report a fixed GPU instead of probing the system
    pub fake: bool,
}

impl AppContext {
    /// Data directory precedence: explicit override, settings, executable
    /// directory, current directory
    pub fn new(settings: AppSettings, data_dir_override: Option<PathBuf>, fake: bool) -> Self {
        let data_dir = data_dir_override
            .or_else(|| settings.data_dir.clone())
            .or_else(exe_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            settings,
            data_dir,
            fake,
        }
    }

    pub fn markers(&self) -> MarkerStore {
        MarkerStore::new(&self.data_dir)
    }

    pub fn probe(&self) -> Box<dyn DriverProbe> {
        if self.fake {
            Box::new(FakeProbe::new(
                &self.settings.fake_gpu_name,
                &self.settings.fake_driver_version,
            ))
        } else {
            Box::new(SystemProbe)
        }
    }

    /// Client for installer downloads. There is no total timeout, the body of
    /// a driver installer takes minutes on slow links; connecting and each
    /// read are bounded so a stalled transfer fails instead of hanging.
    pub fn download_client(&self) -> DriverResult<reqwest::Client> {
        self.download_client_builder()
            .build()
            .map_err(|e| DriverError::Network(format!("Failed to create HTTP client: {}", e)))
    }

    pub fn download_client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(&self.settings.user_agent)
            .connect_timeout(self.request_timeout())
            .read_timeout(self.request_timeout())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.settings.check_interval_hours.max(1) * 3600)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.request_timeout_secs.max(1))
    }
}

fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.check_interval_hours, 5);
        assert_eq!(settings.language_id, 1);
        assert!(settings.notifications_enabled);
        assert!(settings.data_dir.is_none());
    }

    #[test]
    fn test_settings_partial_file_uses_defaults() {
        let json = r#"{"check_interval_hours": 12}"#;
        let loaded: AppSettings = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.check_interval_hours, 12);
        assert_eq!(loaded.request_timeout_secs, 30);
        assert_eq!(loaded.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_settings_roundtrip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = AppSettings::default();
        settings.language_id = 9;
        settings.data_dir = Some(PathBuf::from(r"D:\Drivers"));
        save_settings_to(&settings, &path).unwrap();

        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_corrupt_settings_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_settings_from(&path), AppSettings::default());
    }

    #[test]
    fn test_context_data_dir_precedence() {
        let mut settings = AppSettings::default();
        settings.data_dir = Some(PathBuf::from("from-settings"));

        let ctx = AppContext::new(settings.clone(), Some(PathBuf::from("from-cli")), false);
        assert_eq!(ctx.data_dir, PathBuf::from("from-cli"));

        let ctx = AppContext::new(settings, None, false);
        assert_eq!(ctx.data_dir, PathBuf::from("from-settings"));
    }

    #[test]
    fn test_context_durations() {
        let mut settings = AppSettings::default();
        settings.check_interval_hours = 0;
        let ctx = AppContext::new(settings, Some(PathBuf::from(".")), true);
        assert_eq!(ctx.check_interval(), Duration::from_secs(3600));
        assert_eq!(ctx.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_fake_context_probe() {
        let ctx = AppContext::new(AppSettings::default(), Some(PathBuf::from(".")), true);
        let driver = ctx.probe().probe().unwrap();
        assert_eq!(driver.version, "466.11");
    }
}
