use std::time::Duration;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_poll_interval_ms() -> u64 {
    100
}

/// Settings of the JSONL partition store.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStorageConfig {
    /// Root directory; each topic gets a subdirectory.
    pub data_dir: String,
    /// How often an idle reader re-checks the log for records appended by
    /// other processes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl FileStorageConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ════════════════════════════════════════════════════════════════
//  On-disk record format
// ════════════════════════════════════════════════════════════════

/// One line of `partition-{n}.jsonl`. Key and value are base64 so any codec
/// output survives the JSON envelope.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DiskRecord {
    pub ts_ms: i64,
    pub key: String,
    pub value: String,
}
