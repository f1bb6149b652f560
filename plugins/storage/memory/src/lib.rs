use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::{Mutex, RwLock, watch};

use stream_api::{LogEntry, PartitionStorage, ReadResult, StreamError, TopicRecord};

// ═══════════════════════════════════════════════════════════════
//  PartitionLog
// ═══════════════════════════════════════════════════════════════

struct PartitionLog {
    records: Vec<TopicRecord>,
    /// Current log length, watched by waiting readers.
    len_tx: watch::Sender<u64>,
}

impl PartitionLog {
    fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            len_tx,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStorage
// ═══════════════════════════════════════════════════════════════

/// In-process partition logs. Nothing survives the process, so committed
/// offsets only matter for consumers restarted within the same process.
pub struct MemoryStorage {
    partitions: RwLock<Vec<PartitionLog>>,
    offsets: Mutex<HashMap<(String, u32), u64>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(Vec::new()),
            offsets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of records currently held by a partition.
    pub async fn len(&self, partition: u32) -> usize {
        let logs = self.partitions.read().await;
        logs.get(partition as usize).map_or(0, |p| p.records.len())
    }
}

fn unknown_partition(partition: u32, count: usize) -> StreamError {
    StreamError::logic(format!("partition {partition} out of range (0..{count})"))
}

impl PartitionStorage for MemoryStorage {
    fn open(&self, partitions: u32) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            let mut logs = self.partitions.write().await;
            // Re-opening keeps existing data (producer and worker may share one instance).
            while logs.len() < partitions as usize {
                logs.push(PartitionLog::new());
            }
            Ok(())
        })
    }

    fn append(
        &self,
        partition: u32,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StreamError>> + Send + '_>> {
        Box::pin(async move {
            let mut logs = self.partitions.write().await;
            let count = logs.len();
            let log = logs
                .get_mut(partition as usize)
                .ok_or_else(|| unknown_partition(partition, count))?;
            let offset = log.records.len() as u64;
            log.records.push(record);
            log.len_tx.send_replace(offset + 1);
            Ok(offset)
        })
    }

    fn read(
        &self,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ReadResult, StreamError>> + Send + '_>> {
        Box::pin(async move {
            let logs = self.partitions.read().await;
            let log = logs
                .get(partition as usize)
                .ok_or_else(|| unknown_partition(partition, logs.len()))?;
            let entries: Vec<LogEntry> = log
                .records
                .iter()
                .enumerate()
                .skip(offset as usize)
                .take(limit)
                .map(|(i, r)| LogEntry {
                    offset: i as u64,
                    record: Ok(r.clone()),
                })
                .collect();
            let next_offset = offset + entries.len() as u64;
            Ok(ReadResult { entries, next_offset })
        })
    }

    fn wait_for(
        &self,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = {
                let logs = self.partitions.read().await;
                logs.get(partition as usize)
                    .ok_or_else(|| unknown_partition(partition, logs.len()))?
                    .len_tx
                    .subscribe()
            };
            rx.wait_for(|len| *len > offset)
                .await
                .map_err(|_| StreamError::connection("memory storage dropped"))?;
            Ok(())
        })
    }

    fn commit<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + 'a>> {
        Box::pin(async move {
            self.offsets
                .lock()
                .await
                .insert((group.to_string(), partition), offset);
            Ok(())
        })
    }

    fn committed<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, StreamError>> + Send + 'a>> {
        Box::pin(async move {
            let offsets = self.offsets.lock().await;
            Ok(offsets.get(&(group.to_string(), partition)).copied())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
