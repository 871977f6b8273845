use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// How old a cached entry may be before a live call is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FreshnessPolicy {
    /// Accuracy must be exact: never serve from cache.
    ExactOnly,
    /// Accept entries fetched within the given window.
    MaxAge(Duration),
    /// Accept any present entry.
    AnyAge,
}

impl FreshnessPolicy {
    /// Whether an entry fetched at `fetched_at` is acceptable at `now`.
    pub fn accepts(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            FreshnessPolicy::ExactOnly => false,
            FreshnessPolicy::AnyAge => true,
            FreshnessPolicy::MaxAge(max) => now.signed_duration_since(fetched_at) <= *max,
        }
    }

    pub fn is_any_age(&self) -> bool {
        matches!(self, FreshnessPolicy::AnyAge)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy::MaxAge(Duration::days(1))
    }
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*([smhdw])\s*$").expect("valid duration regex"))
}

/// Parse `30s`, `90m`, `1h`, `7d`, `2w`.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let caps = duration_regex()
        .captures(text)
        .ok_or_else(|| anyhow!("Invalid duration '{}': expected e.g. 30m, 1h, 7d", text))?;
    let amount: i64 = caps[1].parse()?;
    let duration = match &caps[2] {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        unit => return Err(anyhow!("Unknown duration unit '{}'", unit)),
    };
    Ok(duration)
}

fn format_duration(d: &Duration) -> String {
    let secs = d.num_seconds();
    if secs != 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs != 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

impl FromStr for FreshnessPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "exact-only" | "exact" => Ok(FreshnessPolicy::ExactOnly),
            "any-age" | "any" => Ok(FreshnessPolicy::AnyAge),
            lower => {
                let window = lower.strip_prefix("max-age:").ok_or_else(|| {
                    anyhow!(
                        "Invalid freshness policy '{}': use exact-only, any-age or max-age:<duration>",
                        s
                    )
                })?;
                Ok(FreshnessPolicy::MaxAge(parse_duration(window)?))
            }
        }
    }
}

impl fmt::Display for FreshnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessPolicy::ExactOnly => f.write_str("exact-only"),
            FreshnessPolicy::AnyAge => f.write_str("any-age"),
            FreshnessPolicy::MaxAge(d) => write!(f, "max-age:{}", format_duration(d)),
        }
    }
}

impl TryFrom<String> for FreshnessPolicy {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FreshnessPolicy> for String {
    fn from(policy: FreshnessPolicy) -> Self {
        policy.to_string()
    }
}
