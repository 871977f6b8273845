//! Configuration module
//!
//! Settings file handling and the field catalog that maps display names
//! to API field names.

pub mod config;

pub use config::{ApiConfig, CacheConfig, Config, ExportConfig, FieldMapping, PlannerConfig};
