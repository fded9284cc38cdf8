use std::path::PathBuf;
use std::time::Duration;

/// Process-level settings shared by every business engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    /// Minutes before an appointment's start at which reminders should fire.
    pub reminder_offsets: Vec<i64>,
    /// Upper bound on a single notification or payment call.
    pub collaborator_timeout: Duration,
    pub max_businesses: usize,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            reminder_offsets: vec![24 * 60, 60],
            collaborator_timeout: Duration::from_millis(5000),
            max_businesses: 1000,
            log_level: "info".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; missing or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("SLOTWISE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold: u64 = lookup("SLOTWISE_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let reminder_offsets = lookup("SLOTWISE_REMINDER_OFFSETS")
            .and_then(|s| parse_offsets(&s))
            .unwrap_or(defaults.reminder_offsets);
        let collaborator_timeout = lookup("SLOTWISE_COLLABORATOR_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.collaborator_timeout);
        let max_businesses: usize = lookup("SLOTWISE_MAX_BUSINESSES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_businesses);
        let log_level = lookup("SLOTWISE_LOG").unwrap_or(defaults.log_level);

        Self {
            data_dir,
            compact_threshold,
            reminder_offsets,
            collaborator_timeout,
            max_businesses,
            log_level,
        }
    }
}

/// `"1440,60"` → `[1440, 60]`. Any bad entry rejects the whole list.
fn parse_offsets(raw: &str) -> Option<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().ok().filter(|m| *m > 0))
        .collect()
}
