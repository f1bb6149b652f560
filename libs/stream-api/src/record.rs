/// Serialized key/value pair as stored in a partition log.
///
/// Neither the storage nor the topic interpret `key` and `value`;
/// only the topic's codecs do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicRecord {
    /// Append time in milliseconds (Unix epoch).
    pub ts_ms: i64,
    /// Encoded key; the partition is derived from these bytes.
    pub key: Vec<u8>,
    /// Encoded value.
    pub value: Vec<u8>,
}

impl TopicRecord {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            ts_ms: now_ms(),
            key,
            value,
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
