//! DriverScout Library
//!
//! This library module exposes the NVIDIA driver update check for use by
//! the command-line binary and the integration tests.

pub mod driver;
pub mod instance;
pub mod notification;
pub mod settings;
pub mod utils;

// Re-export commonly used items
pub use driver::{DriverError, DriverResult};
pub use settings::{AppContext, AppSettings};
pub use utils::hidden_command;
pub use utils::with_retry;
