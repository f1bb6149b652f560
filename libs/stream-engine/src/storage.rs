use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stream_api::{JsonCodec, PartitionStorage, Record, Utf8Codec};
use stream_storage_file::FileStorage;
use stream_storage_memory::MemoryStorage;

use crate::config::{StorageConfig, TopicConfig};
use crate::error::EngineError;
use crate::topic::Topic;

/// Creates the storage behind each topic from the `[storage]` config.
///
/// Memory storages are cached by topic name so every `Topic` built for the
/// same name in this process shares one log.
pub struct StorageFactory {
    config: StorageConfig,
    memory: Mutex<HashMap<String, Arc<MemoryStorage>>>,
}

impl std::fmt::Debug for StorageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFactory").field("config", &self.config).finish()
    }
}

impl StorageFactory {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, topic: &str) -> Arc<dyn PartitionStorage> {
        match &self.config {
            StorageConfig::Memory => {
                let mut cache = match self.memory.lock() {
                    Ok(g) => g,
                    Err(poisoned) => {
                        tracing::warn!("memory storage cache lock was poisoned, recovering");
                        poisoned.into_inner()
                    }
                };
                cache
                    .entry(topic.to_string())
                    .or_insert_with(|| Arc::new(MemoryStorage::new()))
                    .clone() as Arc<dyn PartitionStorage>
            }
            StorageConfig::File(cfg) => Arc::new(FileStorage::new(cfg, topic)) as Arc<dyn PartitionStorage>,
        }
    }

    /// Topic with UTF-8 keys and JSON values, sized from its config entry.
    pub fn json_topic<V: Record>(&self, cfg: &TopicConfig) -> Result<Topic<String, V>, EngineError> {
        let topic = Topic::new(
            cfg.name.clone(),
            cfg.partitions,
            self.create(&cfg.name),
            Utf8Codec,
            JsonCodec,
        )?;
        tracing::debug!(topic = %cfg.name, partitions = cfg.partitions, value = V::NAME, "created topic");
        Ok(topic)
    }
}
