use std::collections::VecDeque;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;

use stream_api::{Codec, LogEntry, PartitionStorage, StreamError, TopicRecord};

use crate::partition::Partitioner;

/// Records fetched from storage per read.
const READ_BATCH: usize = 64;

/// Acknowledgement of a publish: where the record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: u32,
    pub offset: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// Named, partitioned, append-only channel with typed keys and values.
///
/// Publishing validates and encodes the value, routes by the encoded key and
/// appends to that partition's log. Consumers read one partition each
/// through a [`PartitionReader`].
pub struct Topic<K, V> {
    name: String,
    partitioner: Partitioner,
    storage: Arc<dyn PartitionStorage>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
}

impl<K, V> std::fmt::Debug for Topic<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("partitions", &self.partitioner.partitions())
            .field("key_codec", &self.key_codec.name())
            .field("value_codec", &self.value_codec.name())
            .finish()
    }
}

impl<K, V> Topic<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        partitions: u32,
        storage: Arc<dyn PartitionStorage>,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> Result<Self, StreamError> {
        let name = name.into();
        let partitioner =
            Partitioner::new(partitions).map_err(|e| e.with_context(format!("topic '{name}'")))?;
        Ok(Self {
            name,
            partitioner,
            storage,
            key_codec: Arc::new(key_codec),
            value_codec: Arc::new(value_codec),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> u32 {
        self.partitioner.partitions()
    }

    /// Partition a key routes to.
    pub fn partition_for(&self, key: &K) -> Result<u32, StreamError> {
        let bytes = self.key_codec.encode(key)?;
        Ok(self.partitioner.partition(&bytes))
    }

    /// Connect the underlying storage.
    pub async fn connect(&self) -> Result<(), StreamError> {
        self.storage
            .open(self.partitions())
            .await
            .map_err(|e| e.with_context(format!("topic '{}'", self.name)))
    }

    pub async fn disconnect(&self) -> Result<(), StreamError> {
        self.storage
            .close()
            .await
            .map_err(|e| e.with_context(format!("topic '{}'", self.name)))
    }

    /// Append `value` under `key`.
    ///
    /// Fails with `Schema` when the value doesn't validate and with
    /// `Serialization` when a codec cannot encode it; nothing is appended in
    /// either case.
    pub async fn publish(&self, key: &K, value: &V) -> Result<Ack, StreamError> {
        let ctx = || format!("publish to '{}'", self.name);
        let key_bytes = self.key_codec.encode(key).map_err(|e| e.with_context(ctx()))?;
        let value_bytes = self.value_codec.encode(value).map_err(|e| e.with_context(ctx()))?;

        let partition = self.partitioner.partition(&key_bytes);
        let offset = self
            .storage
            .append(partition, TopicRecord::new(key_bytes, value_bytes))
            .await
            .map_err(|e| e.with_context(ctx()))?;

        tracing::trace!(topic = %self.name, partition, offset, "published");
        Ok(Ack { partition, offset })
    }

    /// One reader per partition in `partitions`, each resuming at `group`'s
    /// last committed offset (0 when the group never committed).
    pub async fn subscribe(
        &self,
        group: &str,
        partitions: Range<u32>,
    ) -> Result<Vec<PartitionReader<K, V>>, StreamError> {
        if partitions.end > self.partitions() {
            return Err(StreamError::config(format!(
                "topic '{}' has {} partitions, requested {}..{}",
                self.name,
                self.partitions(),
                partitions.start,
                partitions.end
            )));
        }
        let mut readers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            readers.push(self.reader(group, partition).await?);
        }
        Ok(readers)
    }

    /// Reader for a single partition, positioned at the committed offset.
    pub async fn reader(&self, group: &str, partition: u32) -> Result<PartitionReader<K, V>, StreamError> {
        let position = self
            .storage
            .committed(group, partition)
            .await
            .map_err(|e| e.with_context(format!("topic '{}' partition {partition}", self.name)))?
            .unwrap_or(0);
        Ok(PartitionReader {
            topic: self.name.clone(),
            group: group.to_string(),
            partition,
            position,
            fetch_offset: position,
            buffer: VecDeque::new(),
            storage: self.storage.clone(),
            key_codec: self.key_codec.clone(),
            value_codec: self.value_codec.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicHandle: type-erased view used by the runtime
// ═══════════════════════════════════════════════════════════════

/// Lifecycle of a topic independent of its key/value types.
pub trait TopicHandle: Send + Sync {
    fn name(&self) -> &str;

    fn partitions(&self) -> u32;

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}

impl<K, V> TopicHandle for Topic<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Topic::name(self)
    }

    fn partitions(&self) -> u32 {
        Topic::partitions(self)
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(self.connect())
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(self.disconnect())
    }
}

// ═══════════════════════════════════════════════════════════════
//  PartitionReader
// ═══════════════════════════════════════════════════════════════

/// Decoded key/value of a delivered record.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<K, V> {
    pub ts_ms: i64,
    pub key: K,
    pub value: V,
}

/// One position of the partition log as seen by a consumer. `message` is an
/// error for records that cannot be read or decoded; the reader has already
/// moved past them.
#[derive(Debug)]
pub struct Delivery<K, V> {
    pub partition: u32,
    pub offset: u64,
    pub message: Result<Message<K, V>, StreamError>,
}

/// Sequential consumer of one partition, in log order.
///
/// `recv` waits on an empty partition and never skips or reorders records.
/// Dropping a pending `recv` future loses nothing.
pub struct PartitionReader<K, V> {
    topic: String,
    group: String,
    partition: u32,
    /// Offset of the next record handed out by `recv`.
    position: u64,
    /// Offset of the next record to fetch from storage.
    fetch_offset: u64,
    buffer: VecDeque<LogEntry>,
    storage: Arc<dyn PartitionStorage>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
}

impl<K, V> PartitionReader<K, V> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next record of the partition. Errors are storage failures only.
    pub async fn recv(&mut self) -> Result<Delivery<K, V>, StreamError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                self.position = entry.offset + 1;
                return Ok(self.decode(entry));
            }

            let result = self
                .storage
                .read(self.partition, self.fetch_offset, READ_BATCH)
                .await
                .map_err(|e| self.context(e))?;

            if result.entries.is_empty() {
                self.storage
                    .wait_for(self.partition, self.fetch_offset)
                    .await
                    .map_err(|e| self.context(e))?;
                continue;
            }

            self.fetch_offset = result.next_offset;
            self.buffer.extend(result.entries);
        }
    }

    /// Persist `next_offset` as the group's resume position.
    pub async fn commit(&self, next_offset: u64) -> Result<(), StreamError> {
        self.storage
            .commit(&self.group, self.partition, next_offset)
            .await
            .map_err(|e| self.context(e))
    }

    fn decode(&self, entry: LogEntry) -> Delivery<K, V> {
        let message = entry.record.and_then(|record| {
            Ok(Message {
                ts_ms: record.ts_ms,
                key: self.key_codec.decode(&record.key)?,
                value: self.value_codec.decode(&record.value)?,
            })
        });
        Delivery {
            partition: self.partition,
            offset: entry.offset,
            message,
        }
    }

    fn context(&self, e: StreamError) -> StreamError {
        e.with_context(format!("topic '{}' partition {}", self.topic, self.partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_api::{ErrorKind, JsonCodec, Record, Utf8Codec};
    use stream_storage_memory::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Reading {
        sensor: String,
        value: i64,
    }

    impl Record for Reading {
        const NAME: &'static str = "Reading";

        fn validate(&self) -> Result<(), StreamError> {
            if self.value < 0 {
                return Err(StreamError::schema("value must be non-negative"));
            }
            Ok(())
        }
    }

    async fn topic(partitions: u32) -> Topic<String, Reading> {
        let topic = Topic::new(
            "readings",
            partitions,
            Arc::new(MemoryStorage::new()),
            Utf8Codec,
            JsonCodec,
        )
        .unwrap();
        topic.connect().await.unwrap();
        topic
    }

    fn reading(sensor: &str, value: i64) -> Reading {
        Reading {
            sensor: sensor.into(),
            value,
        }
    }

    #[tokio::test]
    async fn publish_routes_by_key() {
        let topic = topic(4).await;
        let key = "sensor-7".to_string();
        let first = topic.publish(&key, &reading("a", 1)).await.unwrap();
        let second = topic.publish(&key, &reading("a", 2)).await.unwrap();

        assert_eq!(first.partition, topic.partition_for(&key).unwrap());
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn invalid_value_is_not_appended() {
        let topic = topic(1).await;
        let err = topic
            .publish(&"k".to_string(), &reading("a", -1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let ack = topic.publish(&"k".to_string(), &reading("a", 1)).await.unwrap();
        assert_eq!(ack.offset, 0);
    }

    #[tokio::test]
    async fn reader_yields_in_log_order() {
        let topic = topic(1).await;
        for v in 0..5 {
            topic.publish(&"k".to_string(), &reading("a", v)).await.unwrap();
        }
        let mut readers = topic.subscribe("g", 0..1).await.unwrap();
        let reader = &mut readers[0];
        for v in 0..5 {
            let d = reader.recv().await.unwrap();
            assert_eq!(d.offset, v as u64);
            assert_eq!(d.message.unwrap().value.value, v);
        }
        assert_eq!(reader.position(), 5);
    }

    #[tokio::test]
    async fn reader_resumes_from_committed_offset() {
        let topic = topic(1).await;
        for v in 0..3 {
            topic.publish(&"k".to_string(), &reading("a", v)).await.unwrap();
        }
        let mut reader = topic.reader("g", 0).await.unwrap();
        let d = reader.recv().await.unwrap();
        reader.commit(d.offset + 1).await.unwrap();

        let mut resumed = topic.reader("g", 0).await.unwrap();
        assert_eq!(resumed.position(), 1);
        assert_eq!(resumed.recv().await.unwrap().message.unwrap().value.value, 1);

        let mut other_group = topic.reader("other", 0).await.unwrap();
        assert_eq!(other_group.recv().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_delivered_as_error() {
        let storage = Arc::new(MemoryStorage::new());
        let topic: Topic<String, Reading> =
            Topic::new("readings", 1, storage.clone(), Utf8Codec, JsonCodec).unwrap();
        topic.connect().await.unwrap();

        storage
            .append(0, TopicRecord::new(b"k".to_vec(), b"not json".to_vec()))
            .await
            .unwrap();
        topic.publish(&"k".to_string(), &reading("a", 3)).await.unwrap();

        let mut reader = topic.reader("g", 0).await.unwrap();
        let bad = reader.recv().await.unwrap();
        assert_eq!(bad.message.unwrap_err().kind(), ErrorKind::Serialization);
        let good = reader.recv().await.unwrap();
        assert_eq!(good.offset, 1);
        assert!(good.message.is_ok());
    }

    #[tokio::test]
    async fn subscribe_rejects_out_of_range_partitions() {
        let topic = topic(2).await;
        assert!(topic.subscribe("g", 0..3).await.is_err());
        assert_eq!(topic.subscribe("g", 0..2).await.unwrap().len(), 2);
    }
}
