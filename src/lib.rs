pub mod browser;
pub mod cli;
pub mod config;
pub mod port;
pub mod process_monitor;
pub mod python_env;
pub mod supervisor;

pub use config::LauncherConfig;
pub use supervisor::error::LauncherError;
