//! Utility modules

pub mod app_paths;
pub mod logging;
