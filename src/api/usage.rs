use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::LiveCallError;

/// Daily call limit of the cloud API.
pub const DEFAULT_DAILY_LIMIT: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UsageRecord {
    date: NaiveDate,
    total_calls: u64,
    last_calls: u64,
}

/// Persistent count of API calls made today.
///
/// The counter survives restarts so that several runs on the same day share
/// one budget. Calls made by this process are added on [`UsageLedger::save`].
#[derive(Debug)]
pub struct UsageLedger {
    path: Option<PathBuf>,
    today: NaiveDate,
    /// Calls recorded today by earlier runs
    previous_total: u64,
    /// Calls made by the previous run
    last_run_calls: u64,
    session_calls: u64,
    daily_limit: u64,
}

impl UsageLedger {
    /// Ledger that is never written to disk.
    pub fn in_memory(daily_limit: u64) -> Self {
        Self {
            path: None,
            today: Local::now().date_naive(),
            previous_total: 0,
            last_run_calls: 0,
            session_calls: 0,
            daily_limit,
        }
    }

    pub fn load(path: &Path, daily_limit: u64) -> Self {
        Self::load_for_day(path, daily_limit, Local::now().date_naive())
    }

    pub fn load_for_day(path: &Path, daily_limit: u64, today: NaiveDate) -> Self {
        let record = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<UsageRecord>(&text) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(target: "api", "Ignoring unreadable usage file {:?}: {}", path, e);
                    None
                }
            },
            Err(_) => None,
        };

        let (previous_total, last_run_calls) = match record {
            Some(r) if r.date == today => (r.total_calls, r.last_calls),
            Some(r) => (0, r.last_calls),
            None => (0, 0),
        };

        Self {
            path: Some(path.to_path_buf()),
            today,
            previous_total,
            last_run_calls,
            session_calls: 0,
            daily_limit,
        }
    }

    /// Reserve one call against today's budget.
    pub fn try_record_call(&mut self) -> Result<(), LiveCallError> {
        if self.total_today() >= self.daily_limit {
            return Err(LiveCallError::BudgetExhausted {
                limit: self.daily_limit,
            });
        }
        self.session_calls += 1;
        Ok(())
    }

    pub fn session_calls(&self) -> u64 {
        self.session_calls
    }

    pub fn total_today(&self) -> u64 {
        self.previous_total + self.session_calls
    }

    pub fn last_run_calls(&self) -> u64 {
        self.last_run_calls
    }

    pub fn remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.total_today())
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn summary(&self) -> String {
        format!(
            "API Calls Used: {}, Total Calls Used Today: {}",
            self.session_calls,
            self.total_today()
        )
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = UsageRecord {
            date: self.today,
            total_calls: self.total_today(),
            last_calls: self.session_calls,
        };
        fs::write(path, serde_json::to_string_pretty(&record)?)?;
        info!(target: "api", "{}", self.summary());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_budget_is_enforced() {
        let mut ledger = UsageLedger::in_memory(2);
        ledger.try_record_call().unwrap();
        ledger.try_record_call().unwrap();
        assert_eq!(
            ledger.try_record_call(),
            Err(LiveCallError::BudgetExhausted { limit: 2 })
        );
        assert_eq!(ledger.remaining(), 0);
    }

    #[test]
    fn test_same_day_runs_accumulate() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage.json");

        let mut first = UsageLedger::load_for_day(&path, 100, day(27));
        for _ in 0..3 {
            first.try_record_call().unwrap();
        }
        first.save().unwrap();

        let mut second = UsageLedger::load_for_day(&path, 100, day(27));
        assert_eq!(second.total_today(), 3);
        assert_eq!(second.last_run_calls(), 3);
        second.try_record_call().unwrap();
        second.save().unwrap();

        let third = UsageLedger::load_for_day(&path, 100, day(27));
        assert_eq!(third.total_today(), 4);
        assert_eq!(third.last_run_calls(), 1);
    }

    #[test]
    fn test_new_day_resets_total() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage.json");

        let mut ledger = UsageLedger::load_for_day(&path, 100, day(1));
        ledger.try_record_call().unwrap();
        ledger.save().unwrap();

        let next_day = UsageLedger::load_for_day(&path, 100, day(2));
        assert_eq!(next_day.total_today(), 0);
        assert_eq!(next_day.last_run_calls(), 1);
    }

    #[test]
    fn test_summary_text() {
        let mut ledger = UsageLedger::in_memory(10);
        ledger.try_record_call().unwrap();
        assert_eq!(
            ledger.summary(),
            "API Calls Used: 1, Total Calls Used Today: 1"
        );
    }
}
