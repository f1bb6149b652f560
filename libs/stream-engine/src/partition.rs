use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use stream_api::StreamError;

/// Key → partition routing.
///
/// SipHash-1-3 with fixed zero keys over the encoded key bytes, so the
/// assignment is identical across calls, processes and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partitions: u32,
}

impl Partitioner {
    pub fn new(partitions: u32) -> Result<Self, StreamError> {
        if partitions == 0 {
            return Err(StreamError::config("partition count must be at least 1"));
        }
        Ok(Self { partitions })
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn partition(&self, key: &[u8]) -> u32 {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(key);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }
}
