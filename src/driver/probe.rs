//! Local driver probe
//!
//! Detects the installed NVIDIA driver using, in order:
//! 1. nvidia-smi (reports the version in NVIDIA notation directly)
//! 2. WMI Win32_VideoController via PowerShell (Windows driver version,
//!    converted to NVIDIA notation)

use super::types::LocalDriver;
use super::{DriverError, DriverResult};
use crate::utils::hidden_command;
use log::{debug, info, warn};

/// Source of the installed driver version and GPU name
pub trait DriverProbe: Send + Sync {
    /// Installed driver, or `NoSupportedGpu` when no NVIDIA GPU is present
    fn probe(&self) -> DriverResult<LocalDriver>;

    /// Windows build number, used to pick the catalog OS id
    fn windows_build(&self) -> Option<u32>;
}

/// Probe that queries the running system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl DriverProbe for SystemProbe {
    fn probe(&self) -> DriverResult<LocalDriver> {
        info!("Probing local NVIDIA driver...");

        let (gpu_name, version) = match query_nvidia_smi() {
            Some(found) => found,
            None => {
                debug!("nvidia-smi unavailable, falling back to WMI");
                query_wmi().ok_or(DriverError::NoSupportedGpu)?
            }
        };

        let is_mobile = is_mobile_name(&gpu_name) || has_battery();
        let is_dch = is_dch_driver();

        info!(
            "Detected {} with driver {} (mobile: {}, DCH: {})",
            gpu_name, version, is_mobile, is_dch
        );

        Ok(LocalDriver {
            version,
            gpu_name,
            is_mobile,
            is_dch,
        })
    }

    fn windows_build(&self) -> Option<u32> {
        let output = hidden_command("cmd").args(["/c", "ver"]).output().ok()?;
        parse_ver_build(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Probe returning fixed values, for machines without an NVIDIA GPU
#[derive(Debug, Clone)]
pub struct FakeProbe {
    pub driver: LocalDriver,
    pub windows_build: Option<u32>,
}

impl FakeProbe {
    pub fn new(gpu_name: &str, version: &str) -> Self {
        warn!("Faking GPU '{}' with driver {}", gpu_name, version);
        Self {
            driver: LocalDriver {
                version: version.to_string(),
                gpu_name: gpu_name.to_string(),
                is_mobile: is_mobile_name(gpu_name),
                is_dch: true,
            },
            windows_build: Some(19045),
        }
    }
}

impl DriverProbe for FakeProbe {
    fn probe(&self) -> DriverResult<LocalDriver> {
        Ok(self.driver.clone())
    }

    fn windows_build(&self) -> Option<u32> {
        self.windows_build
    }
}

/// Query name and driver version of the first GPU via nvidia-smi
fn query_nvidia_smi() -> Option<(String, String)> {
    let output = hidden_command("nvidia-smi")
        .args(["--query-gpu=name,driver_version", "--format=csv,noheader"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_smi_line(String::from_utf8_lossy(&output.stdout).lines().next()?)
}

/// Query the first NVIDIA adapter via WMI
fn query_wmi() -> Option<(String, String)> {
    let output = hidden_command("powershell")
        .args([
            "-NoProfile",
            "-Command",
            r#"Get-CimInstance Win32_VideoController | Where-Object { $_.Name -like '*NVIDIA*' } | Select-Object -First 1 | ForEach-Object { "$($_.Name)|$($_.DriverVersion)" }"#,
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let (name, raw_version) = stdout.lines().next()?.trim().split_once('|')?;
    if name.is_empty() {
        return None;
    }
    let version = wmi_to_nvidia_version(raw_version)?;
    Some((name.to_string(), version))
}

/// Laptop detection through the battery class
fn has_battery() -> bool {
    let output = hidden_command("powershell")
        .args([
            "-NoProfile",
            "-Command",
            "(Get-CimInstance Win32_Battery | Measure-Object).Count",
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse::<u32>()
            .map(|count| count > 0)
            .unwrap_or(false),
        _ => false,
    }
}

/// DCH packages register DCHUVen under the nvlddmkm service key
fn is_dch_driver() -> bool {
    hidden_command("reg")
        .args([
            "query",
            r"HKLM\SYSTEM\CurrentControlSet\Services\nvlddmkm",
            "/v",
            "DCHUVen",
        ])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Parse "NVIDIA GeForce RTX 3080, 536.23"
fn parse_smi_line(line: &str) -> Option<(String, String)> {
    let (name, version) = line.rsplit_once(',')?;
    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

/// Convert a Windows driver version ("31.0.15.3623") to NVIDIA notation ("536.23")
///
/// The NVIDIA version is the last five digits of the Windows version with a
/// dot after the third.
pub fn wmi_to_nvidia_version(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 5 {
        return None;
    }
    let tail = &digits[digits.len() - 5..];
    Some(format!("{}.{}", &tail[..3], &tail[3..]))
}

/// Name-based laptop detection
fn is_mobile_name(gpu_name: &str) -> bool {
    gpu_name.contains("Laptop") || gpu_name.contains("Max-Q")
}

/// Extract the build from "Microsoft Windows [Version 10.0.22631.3007]"
fn parse_ver_build(output: &str) -> Option<u32> {
    let start = output.find("Version ")? + "Version ".len();
    let version = output[start..].split(']').next()?;
    version.split('.').nth(2)?.trim().parse().ok()
}
