use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    /// Entries dropped because they could not be decoded
    pub discarded_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn format_size(&self) -> String {
        let size = self.total_size_bytes as f64;
        if size < 1024.0 {
            format!("{} B", size)
        } else if size < 1024.0 * 1024.0 {
            format!("{:.1} KB", size / 1024.0)
        } else if size < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.1} MB", size / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", size / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.format_size(), "0 B");
        stats.total_size_bytes = 2048;
        assert_eq!(stats.format_size(), "2.0 KB");
        stats.total_size_bytes = 5 * 1024 * 1024 + 512 * 1024;
        assert_eq!(stats.format_size(), "5.5 MB");
    }
}
