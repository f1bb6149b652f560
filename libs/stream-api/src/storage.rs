use std::future::Future;
use std::pin::Pin;

use crate::error::StreamError;
use crate::record::TopicRecord;

/// One position of a partition log.
///
/// `record` is an error when the stored bytes cannot be read back; the
/// offset is still reported so the consumer can move past it.
#[derive(Debug)]
pub struct LogEntry {
    pub offset: u64,
    pub record: Result<TopicRecord, StreamError>,
}

/// Result of a read operation.
#[derive(Debug)]
pub struct ReadResult {
    pub entries: Vec<LogEntry>,
    /// Offset to read from next.
    pub next_offset: u64,
}

/// Append-only partitioned log backing a topic, plus committed consumer
/// positions.
///
/// Each topic owns one storage instance. Offsets are dense per partition and
/// start at 0. Implementations must keep a single order per partition: two
/// readers of the same partition always observe the same sequence.
pub trait PartitionStorage: Send + Sync {
    /// Connect to the backing store and prepare `partitions` logs.
    /// Failure here is fatal (`ErrorKind::Connection`).
    fn open(&self, partitions: u32) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;

    /// Append a record to the end of the partition. Returns its offset.
    fn append(
        &self,
        partition: u32,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StreamError>> + Send + '_>>;

    /// Read up to `limit` entries starting at `offset`.
    fn read(
        &self,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ReadResult, StreamError>> + Send + '_>>;

    /// Resolve once the partition holds an entry at `offset`.
    ///
    /// May resolve spuriously; callers re-read after it returns.
    fn wait_for(
        &self,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;

    /// Persist the next offset to consume for `group` on `partition`.
    fn commit<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + 'a>>;

    /// Last committed offset for `group`, `None` if the group never committed.
    fn committed<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, StreamError>> + Send + 'a>>;

    /// Flush buffers and release the connection.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}
