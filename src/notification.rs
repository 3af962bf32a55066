//! Windows toast notifications
//!
//! Uses Windows Runtime (WinRT) for native Windows 10/11 style notifications.
//! Other targets only log the message.

#[cfg(windows)]
use winrt_notification::{Duration, Sound, Toast};

/// Show a toast notification
///
/// # Arguments
/// * `title` - The notification title (e.g., "New driver available")
/// * `message` - The notification body (e.g., "Version 536.23 is ready to download")
#[cfg(windows)]
pub fn show_notification(title: &str, message: &str) {
    // No registered AUMID, PowerShell's works for unpackaged apps
    let result = Toast::new(Toast::POWERSHELL_APP_ID)
        .title(title)
        .text1(message)
        .sound(Some(Sound::Default))
        .duration(Duration::Short)
        .show();

    match result {
        Ok(_) => log::debug!("Notification shown: {} - {}", title, message),
        Err(e) => log::warn!("Failed to show notification: {}", e),
    }
}

#[cfg(not(windows))]
pub fn show_notification(title: &str, message: &str) {
    log::info!("[notification] {} - {}", title, message);
}

pub fn show_update_available(version: &str) {
    show_notification(
        "New driver available",
        &format!("NVIDIA driver {} is available for download", version),
    );
}

pub fn show_download_failed(version: &str, reason: &str) {
    show_notification(
        "Driver download failed",
        &format!("Could not download driver {}: {}", version, reason),
    );
}
