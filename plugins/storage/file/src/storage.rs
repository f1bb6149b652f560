use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::watch;

use stream_api::{LogEntry, PartitionStorage, ReadResult, StreamError, TopicRecord};

use super::config::{DiskRecord, FileStorageConfig};

// ════════════════════════════════════════════════════════════════
//  FileStorage
// ════════════════════════════════════════════════════════════════

/// Line position inside a partition file: `offset` complete lines end at
/// byte `pos`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct Cursor {
    offset: u64,
    pos: u64,
}

#[derive(Default)]
struct State {
    partitions: u32,
    /// Known end of each log (may lag behind appends from other processes).
    ends: HashMap<u32, Cursor>,
    /// Position after the last read, so sequential reads don't rescan.
    reads: HashMap<u32, Cursor>,
}

/// JSONL partition logs for one topic:
///
/// ```text
/// {data_dir}/{topic}/partitions              partition count, fixed at first open
/// {data_dir}/{topic}/partition-{n}.jsonl     one record per line, offset = line index
/// {data_dir}/{topic}/offsets/{group}/{n}     next offset to consume
/// ```
///
/// Several processes may append to the same files (a worker plus one-shot
/// producers). Only newline-terminated lines are ever exposed to readers.
pub struct FileStorage {
    root: PathBuf,
    poll_interval: Duration,
    state: Mutex<State>,
    /// Bumped on every local append to wake waiting readers early.
    appended: watch::Sender<u64>,
}

impl FileStorage {
    pub fn new(config: &FileStorageConfig, topic: &str) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            root: Path::new(&config.data_dir).join(topic),
            poll_interval: config.poll_interval(),
            state: Mutex::new(State::default()),
            appended,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(root = %self.root.display(), "file storage lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn partition_path(&self, partition: u32) -> PathBuf {
        self.root.join(format!("partition-{partition}.jsonl"))
    }

    fn offset_path(&self, group: &str, partition: u32) -> Result<PathBuf, StreamError> {
        if group.is_empty() || group.contains(['/', '\\']) || group.contains("..") {
            return Err(StreamError::config(format!("invalid consumer group name '{group}'")));
        }
        Ok(self.root.join("offsets").join(group).join(partition.to_string()))
    }

    fn check_partition(state: &State, partition: u32) -> Result<(), StreamError> {
        if state.partitions == 0 {
            return Err(StreamError::logic("file storage is not open"));
        }
        if partition >= state.partitions {
            return Err(StreamError::logic(format!(
                "partition {partition} out of range (0..{})",
                state.partitions
            )));
        }
        Ok(())
    }

    // ── Open ──

    fn do_open(&self, partitions: u32) -> Result<(), StreamError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            StreamError::connection(format!("mkdir {}: {e}", self.root.display()))
        })?;

        let meta = self.root.join("partitions");
        match std::fs::read_to_string(&meta) {
            Ok(existing) => {
                let existing: u32 = existing.trim().parse().map_err(|e| {
                    StreamError::serialization(format!("{}: {e}", meta.display()))
                })?;
                if existing != partitions {
                    return Err(StreamError::config(format!(
                        "{} holds {existing} partitions, configured {partitions}",
                        self.root.display()
                    )));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&meta, partitions.to_string()).map_err(|e| {
                    StreamError::connection(format!("write {}: {e}", meta.display()))
                })?;
            }
            Err(e) => {
                return Err(StreamError::connection(format!("read {}: {e}", meta.display())));
            }
        }

        self.lock().partitions = partitions;
        Ok(())
    }

    // ── Append ──

    fn do_append(&self, partition: u32, record: &TopicRecord) -> Result<u64, StreamError> {
        let line = serde_json::to_string(&DiskRecord {
            ts_ms: record.ts_ms,
            key: STANDARD.encode(&record.key),
            value: STANDARD.encode(&record.value),
        })
        .map_err(|e| StreamError::serialization(format!("json serialize: {e}")))?;

        let mut state = self.lock();
        Self::check_partition(&state, partition)?;

        let path = self.partition_path(partition);
        // Catch up with lines other processes appended since our last look.
        let known = state.ends.get(&partition).copied().unwrap_or_default();
        let mut end = scan_complete_lines(&path, known)?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StreamError::io(format!("open {}: {e}", path.display())))?;
        let bytes = format!("{line}\n");
        f.write_all(bytes.as_bytes())
            .map_err(|e| StreamError::io(format!("write {}: {e}", path.display())))?;

        let offset = end.offset;
        end.offset += 1;
        end.pos += bytes.len() as u64;
        state.ends.insert(partition, end);
        drop(state);

        self.appended.send_modify(|n| *n = n.wrapping_add(1));
        Ok(offset)
    }

    // ── Read ──

    fn do_log_len(&self, partition: u32) -> Result<u64, StreamError> {
        let mut state = self.lock();
        Self::check_partition(&state, partition)?;
        let known = state.ends.get(&partition).copied().unwrap_or_default();
        let end = scan_complete_lines(&self.partition_path(partition), known)?;
        state.ends.insert(partition, end);
        Ok(end.offset)
    }

    fn do_read(&self, partition: u32, offset: u64, limit: usize) -> Result<ReadResult, StreamError> {
        let mut state = self.lock();
        Self::check_partition(&state, partition)?;

        let path = self.partition_path(partition);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReadResult {
                    entries: Vec::new(),
                    next_offset: offset,
                });
            }
            Err(e) => return Err(StreamError::io(format!("open {}: {e}", path.display()))),
        };

        let start = match state.reads.get(&partition) {
            Some(c) if c.offset == offset => *c,
            _ => Cursor::default(),
        };

        let mut reader = BufReader::new(f);
        reader
            .seek(SeekFrom::Start(start.pos))
            .map_err(|e| StreamError::io(format!("seek {}: {e}", path.display())))?;

        let mut cursor = start;
        let mut entries = Vec::new();
        let mut line = Vec::new();
        while entries.len() < limit {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| StreamError::io(format!("read {}: {e}", path.display())))?;
            if n == 0 || line.last() != Some(&b'\n') {
                // EOF or a line still being written.
                break;
            }
            let line_offset = cursor.offset;
            cursor.offset += 1;
            cursor.pos += n as u64;
            if line_offset < offset {
                continue;
            }
            entries.push(LogEntry {
                offset: line_offset,
                record: parse_line(&line[..n - 1]),
            });
        }

        state.reads.insert(partition, cursor);
        let next_offset = if entries.is_empty() { offset } else { cursor.offset };
        Ok(ReadResult { entries, next_offset })
    }

    // ── Offsets ──

    fn do_commit(&self, group: &str, partition: u32, offset: u64) -> Result<(), StreamError> {
        let path = self.offset_path(group, partition)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StreamError::io(format!("mkdir {}: {e}", parent.display())))?;
        }
        // Write-then-rename keeps the committed offset readable after a crash.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, offset.to_string())
            .map_err(|e| StreamError::io(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| StreamError::io(format!("rename {}: {e}", path.display())))
    }

    fn do_committed(&self, group: &str, partition: u32) -> Result<Option<u64>, StreamError> {
        let path = self.offset_path(group, partition)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| StreamError::serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StreamError::io(format!("read {}: {e}", path.display()))),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  PartitionStorage impl
// ════════════════════════════════════════════════════════════════

impl PartitionStorage for FileStorage {
    fn open(&self, partitions: u32) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move { self.do_open(partitions) })
    }

    fn append(
        &self,
        partition: u32,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StreamError>> + Send + '_>> {
        Box::pin(async move { self.do_append(partition, &record) })
    }

    fn read(
        &self,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ReadResult, StreamError>> + Send + '_>> {
        Box::pin(async move { self.do_read(partition, offset, limit) })
    }

    fn wait_for(
        &self,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(async move {
            let mut appended = self.appended.subscribe();
            loop {
                if self.do_log_len(partition)? > offset {
                    return Ok(());
                }
                // Local appends wake us immediately; other processes are polled.
                tokio::select! {
                    _ = appended.changed() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        })
    }

    fn commit<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
        offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + 'a>> {
        Box::pin(async move { self.do_commit(group, partition, offset) })
    }

    fn committed<'a>(
        &'a self,
        group: &'a str,
        partition: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, StreamError>> + Send + 'a>> {
        Box::pin(async move { self.do_committed(group, partition) })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        // Appends are unbuffered; nothing to flush.
        Box::pin(async { Ok(()) })
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

/// Advance `from` over every newline-terminated line present on disk.
fn scan_complete_lines(path: &Path, from: Cursor) -> Result<Cursor, StreamError> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(from),
        Err(e) => return Err(StreamError::io(format!("open {}: {e}", path.display()))),
    };
    let mut reader = BufReader::new(f);
    reader
        .seek(SeekFrom::Start(from.pos))
        .map_err(|e| StreamError::io(format!("seek {}: {e}", path.display())))?;

    let mut cursor = from;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| StreamError::io(format!("read {}: {e}", path.display())))?;
        if n == 0 || line.last() != Some(&b'\n') {
            return Ok(cursor);
        }
        cursor.offset += 1;
        cursor.pos += n as u64;
    }
}

/// Decode one stored line back into a TopicRecord.
fn parse_line(line: &[u8]) -> Result<TopicRecord, StreamError> {
    let dr: DiskRecord = serde_json::from_slice(line)
        .map_err(|e| StreamError::serialization(format!("parse json: {e}")))?;
    let key = STANDARD
        .decode(dr.key)
        .map_err(|e| StreamError::serialization(format!("key base64: {e}")))?;
    let value = STANDARD
        .decode(dr.value)
        .map_err(|e| StreamError::serialization(format!("value base64: {e}")))?;
    Ok(TopicRecord {
        ts_ms: dr.ts_ms,
        key,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_api::ErrorKind;

    fn config(dir: &tempfile::TempDir) -> FileStorageConfig {
        FileStorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            poll_interval_ms: 10,
        }
    }

    fn rec(v: &str) -> TopicRecord {
        TopicRecord::new(b"key".to_vec(), v.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(&config(&dir), "src");
        storage.open(2).await.unwrap();

        assert_eq!(storage.append(1, rec("a")).await.unwrap(), 0);
        assert_eq!(storage.append(1, rec("b")).await.unwrap(), 1);

        let res = storage.read(1, 0, 10).await.unwrap();
        assert_eq!(res.next_offset, 2);
        let values: Vec<Vec<u8>> = res
            .entries
            .into_iter()
            .map(|e| e.record.unwrap().value)
            .collect();
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);

        let empty = storage.read(0, 0, 10).await.unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.next_offset, 0);
    }

    #[tokio::test]
    async fn second_instance_sees_appends_of_first() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileStorage::new(&config(&dir), "src");
        let consumer = FileStorage::new(&config(&dir), "src");
        producer.open(1).await.unwrap();
        consumer.open(1).await.unwrap();

        let waiter = tokio::spawn(async move {
            consumer.wait_for(0, 0).await.unwrap();
            consumer.read(0, 0, 1).await.unwrap()
        });
        producer.append(0, rec("x")).await.unwrap();

        let res = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.entries[0].record.as_ref().unwrap().value, b"x");
    }

    #[tokio::test]
    async fn corrupt_line_is_reported_and_skippable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(&config(&dir), "src");
        storage.open(1).await.unwrap();
        storage.append(0, rec("ok")).await.unwrap();

        let path = dir.path().join("src").join("partition-0.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{broken\n").unwrap();
        storage.append(0, rec("after")).await.unwrap();

        let res = storage.read(0, 0, 10).await.unwrap();
        assert_eq!(res.entries.len(), 3);
        assert!(res.entries[0].record.is_ok());
        assert_eq!(
            res.entries[1].record.as_ref().unwrap_err().kind(),
            ErrorKind::Serialization
        );
        assert_eq!(res.entries[2].offset, 2);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_not_exposed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(&config(&dir), "src");
        storage.open(1).await.unwrap();
        storage.append(0, rec("ok")).await.unwrap();

        let path = dir.path().join("src").join("partition-0.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"ts_ms\":1,").unwrap();

        let res = storage.read(0, 0, 10).await.unwrap();
        assert_eq!(res.entries.len(), 1);
        assert_eq!(res.next_offset, 1);
    }

    #[tokio::test]
    async fn committed_offsets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::new(&config(&dir), "src");
            storage.open(1).await.unwrap();
            assert_eq!(storage.committed("workers", 0).await.unwrap(), None);
            storage.commit("workers", 0, 7).await.unwrap();
        }
        let storage = FileStorage::new(&config(&dir), "src");
        storage.open(1).await.unwrap();
        assert_eq!(storage.committed("workers", 0).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn partition_count_is_fixed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::new(&config(&dir), "src").open(4).await.unwrap();
        let err = FileStorage::new(&config(&dir), "src").open(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn unusable_data_dir_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let cfg = FileStorageConfig {
            data_dir: blocker.to_string_lossy().into_owned(),
            poll_interval_ms: 10,
        };
        let err = FileStorage::new(&cfg, "src").open(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn group_cannot_leave_topic_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(&config(&dir), "src");
        storage.open(1).await.unwrap();

        for group in ["../escape", "a/b", "..", ""] {
            let err = storage.commit(group, 0, 1).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "group {group:?}");
            assert!(storage.committed(group, 0).await.is_err());
        }
        assert!(!dir.path().join("escape").exists());

        storage.commit("g.agent", 0, 3).await.unwrap();
        assert_eq!(storage.committed("g.agent", 0).await.unwrap(), Some(3));
    }
}
