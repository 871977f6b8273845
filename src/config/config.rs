use crate::api::http::HttpClientSettings;
use crate::api::usage::DEFAULT_DAILY_LIMIT;
use crate::freshness::FreshnessPolicy;
use crate::listing::{ListQuery, StageRouting};
use crate::planner::PlanOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub planner: PlannerConfig,
    pub export: ExportConfig,
    pub listing: ListingConfig,

    /// Field catalog offered to the user
    pub fields: Vec<FieldMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Encoded credentials file; defaults to `AUTHENTICATION` in the data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Calls the API allows per day
    pub daily_call_limit: u64,

    /// Minimum delay between two live calls
    pub throttle_ms: u64,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory; defaults to the platform cache dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Freshness policy used when the command line gives none
    pub freshness: FreshnessPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_concurrent_calls: usize,

    /// Let one export combine cached and live records
    pub allow_mixing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Endpoint used when the command line gives none
    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    pub file_prefix: String,

    /// Add provenance and fetched_at columns to the CSV
    pub include_provenance: bool,
}

/// Where `export --all` finds its records and which endpoint each one is
/// fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub endpoint: String,

    /// Response field holding the record array
    pub field: String,

    pub stages: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,

    pub page_size: u32,

    /// Records in this stage are fetched from `won_endpoint`, all others
    /// from `other_endpoint`
    pub won_stage: String,
    pub won_endpoint: String,
    pub other_endpoint: String,
}

/// Display name shown to the user and the API field it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub display: String,
    pub field: String,
}

impl FieldMapping {
    pub fn new(display: &str, field: &str) -> Self {
        Self {
            display: display.to_string(),
            field: field.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            planner: PlannerConfig::default(),
            export: ExportConfig::default(),
            listing: ListingConfig::default(),
            fields: default_catalog(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dtcloudapi.d-tools.cloud/api/v1".to_string(),
            credentials_file: None,
            daily_call_limit: DEFAULT_DAILY_LIMIT,
            throttle_ms: 750,
            timeout_secs: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            freshness: FreshnessPolicy::default(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            allow_mixing: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: "Projects/GetProject".to_string(),
            output_dir: None,
            file_prefix: "Dtools_Opportunity_Hours".to_string(),
            include_provenance: false,
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            endpoint: "Opportunities/GetOpportunities".to_string(),
            field: "opportunities".to_string(),
            stages: [
                "New Sales Opportunity",
                "Opportunity Won",
                "Qualifying & Consulting",
                "Quote Development (See Quote States)",
                "Negotiating, Reviews",
                "On Hold",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sort: Some("Price DESC".to_string()),
            page_size: 3000,
            won_stage: "Opportunity Won".to_string(),
            won_endpoint: "Projects/GetProject".to_string(),
            other_endpoint: "Opportunities/GetOpportunity".to_string(),
        }
    }
}

fn default_catalog() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new("Job ID", "id"),
        FieldMapping::new("Client Name", "clientName"),
        FieldMapping::new("Job Name", "name"),
        FieldMapping::new("Job Stage", "stage"),
        FieldMapping::new("Job Priority", "priority"),
        FieldMapping::new("Job Price", "price"),
    ]
}

impl Config {
    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            // Create default config if it doesn't exist
            let default_config = Self::default();
            default_config.save()?;
            return Ok(default_config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("dtools-export").join("config.toml"))
    }

    /// API field for a display name or field name. Unknown names pass
    /// through unchanged so any API field can be picked directly.
    pub fn resolve_field(&self, name: &str) -> String {
        let name = name.trim();
        self.fields
            .iter()
            .find(|m| m.display.eq_ignore_ascii_case(name))
            .map(|m| m.field.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Column header for an API field.
    pub fn display_name(&self, field: &str) -> String {
        self.fields
            .iter()
            .find(|m| m.field == field)
            .map(|m| m.display.clone())
            .unwrap_or_else(|| field.to_string())
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            freshness: self.cache.freshness,
            allow_mixing: self.planner.allow_mixing,
            max_concurrent: self.planner.max_concurrent_calls,
        }
    }

    pub fn list_query(&self) -> ListQuery {
        ListQuery {
            endpoint: self.listing.endpoint.clone(),
            field: self.listing.field.clone(),
            stages: self.listing.stages.clone(),
            sort: self.listing.sort.clone(),
            page_size: self.listing.page_size,
        }
    }

    pub fn stage_routing(&self) -> StageRouting {
        StageRouting {
            won_stage: self.listing.won_stage.clone(),
            won_endpoint: self.listing.won_endpoint.clone(),
            other_endpoint: self.listing.other_endpoint.clone(),
        }
    }

    pub fn http_settings(&self) -> HttpClientSettings {
        HttpClientSettings {
            base_url: self.api.base_url.clone(),
            throttle: Duration::from_millis(self.api.throttle_ms),
            timeout: Duration::from_secs(self.api.timeout_secs),
        }
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        r#"# dtools-export configuration file
# Location: ~/.config/dtools-export/config.toml (Linux)
#           ~/Library/Application Support/dtools-export/config.toml (macOS)
#           %APPDATA%\dtools-export\config.toml (Windows)

[api]
base_url = "https://dtcloudapi.d-tools.cloud/api/v1"

# Encoded credentials written by `dtools-export auth encode`
# credentials_file = "/path/to/AUTHENTICATION"

# The API allows this many calls per day
daily_call_limit = 10000

# Minimum delay between two live calls, in milliseconds
throttle_ms = 750

timeout_secs = 30

[cache]
# dir = "/path/to/cache"

# How old a cached record may be before a live call is made:
#   "exact-only"    always call the API
#   "max-age:<n>"   accept cache up to n old (s, m, h, d or w, e.g. "max-age:7d")
#   "any-age"       use any cached record
freshness = "max-age:1d"

[planner]
max_concurrent_calls = 4

# When false, one record needing a live call refreshes every record of the
# export so all rows share the same capture time
allow_mixing = false

[export]
endpoint = "Projects/GetProject"
# output_dir = "/path/to/exports"
file_prefix = "Dtools_Opportunity_Hours"
include_provenance = false

# Record list used by `export --all`
[listing]
endpoint = "Opportunities/GetOpportunities"
field = "opportunities"
stages = [
    "New Sales Opportunity",
    "Opportunity Won",
    "Qualifying & Consulting",
    "Quote Development (See Quote States)",
    "Negotiating, Reviews",
    "On Hold",
]
sort = "Price DESC"
page_size = 3000

# Listed records in won_stage are fetched from won_endpoint, the rest from
# other_endpoint
won_stage = "Opportunity Won"
won_endpoint = "Projects/GetProject"
other_endpoint = "Opportunities/GetOpportunity"

# Field catalog: display name shown to the user -> API field name
[[fields]]
display = "Job ID"
field = "id"

[[fields]]
display = "Client Name"
field = "clientName"

[[fields]]
display = "Job Name"
field = "name"

[[fields]]
display = "Job Stage"
field = "stage"

[[fields]]
display = "Job Priority"
field = "priority"

[[fields]]
display = "Job Price"
field = "price"

"#
        .to_string()
    }
}
