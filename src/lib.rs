pub mod api;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod export;
pub mod freshness;
pub mod listing;
pub mod payload;
pub mod planner;
pub mod request_key;
pub mod run;
pub mod selection;
pub mod utils;

pub use error::{CacheError, LiveCallError, PlanError};
pub use freshness::FreshnessPolicy;
pub use request_key::RequestKey;
pub use selection::Selection;
