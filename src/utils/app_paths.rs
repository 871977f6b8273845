use anyhow::{anyhow, Result};
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "dtools-export";

/// Platform directories used by the exporter. Each accessor creates the
/// directory if it does not exist yet.
pub struct AppPaths;

impl AppPaths {
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Cannot determine data directory"))?
            .join(APP_DIR);

        fs::create_dir_all(&data_dir)?;
        Ok(data_dir)
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Cannot determine cache directory"))?
            .join(APP_DIR);

        fs::create_dir_all(&cache_dir)?;
        Ok(cache_dir)
    }

    pub fn log_dir() -> Result<PathBuf> {
        let log_dir = Self::data_dir()?.join("logs");
        fs::create_dir_all(&log_dir)?;
        Ok(log_dir)
    }

    /// Daily call ledger
    pub fn usage_file() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("usage.json"))
    }

    /// Default location of the encoded credentials
    pub fn credentials_file() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("AUTHENTICATION"))
    }

    /// Default export directory: the user's documents folder, else the
    /// current directory
    pub fn export_dir() -> PathBuf {
        dirs::document_dir().unwrap_or_else(|| PathBuf::from("."))
    }
}
