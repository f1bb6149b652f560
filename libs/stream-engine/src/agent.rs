use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use stream_api::{ErrorKind, Record, StreamError};

use crate::config::AgentConfig;
use crate::topic::{Message, Topic};

/// What an agent does with a record whose transform (or sink publish)
/// failed with a record-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log, commit past the record, keep consuming.
    #[default]
    Skip,
    /// Log and stop every partition task of the agent. The record stays
    /// uncommitted and is retried after a restart.
    Halt,
}

/// Counters reported when a partition task exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub processed: u64,
    pub skipped: u64,
    pub halted: bool,
}

type TransformFn<K, V, O> = dyn Fn(&K, &V) -> Result<Vec<O>, StreamError> + Send + Sync;

// ═══════════════════════════════════════════════════════════════
//  Agent
// ═══════════════════════════════════════════════════════════════

/// Consume-transform-produce processor bound to one source topic.
///
/// Every output of `transform` is published to each sink in declaration
/// order, under the key of the input record. The consume position is
/// committed only after all sinks acknowledged (at-least-once).
pub struct Agent<K, V, O = V> {
    name: String,
    source: Arc<Topic<K, V>>,
    sinks: Vec<Arc<Topic<K, O>>>,
    transform: Arc<TransformFn<K, V, O>>,
    policy: ErrorPolicy,
    retries: u32,
}

impl<K, V, O> Agent<K, V, O>
where
    K: Send + Sync + 'static,
    V: Record,
    O: Record,
{
    pub fn new<F>(name: impl Into<String>, source: Arc<Topic<K, V>>, transform: F) -> Self
    where
        F: Fn(&K, &V) -> Result<Vec<O>, StreamError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source,
            sinks: Vec::new(),
            transform: Arc::new(transform),
            policy: ErrorPolicy::default(),
            retries: 0,
        }
    }

    /// Append a sink topic. Sinks receive outputs in the order they were added.
    pub fn sink(mut self, topic: Arc<Topic<K, O>>) -> Self {
        self.sinks.push(topic);
        self
    }

    pub fn policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Extra transform attempts before the error policy applies.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Apply policy and retries from the config file.
    pub fn configure(self, cfg: &AgentConfig) -> Self {
        self.policy(cfg.error_policy).retries(cfg.retries)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, message: &Message<K, V>) -> Result<Vec<O>, StreamError> {
        let mut attempt = 0;
        loop {
            match (self.transform)(&message.key, &message.value) {
                Ok(outputs) => return Ok(outputs),
                Err(e) if e.kind() == ErrorKind::Transform && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(agent = %self.name, attempt, error = %e, "retrying transform");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Transform one record and publish its outputs. Returns the number of
    /// outputs emitted.
    async fn process(&self, message: &Message<K, V>) -> Result<usize, StreamError> {
        let outputs = self.apply(message)?;
        for output in &outputs {
            for sink in &self.sinks {
                sink.publish(&message.key, output).await?;
            }
        }
        Ok(outputs.len())
    }

    async fn consume(
        self: Arc<Self>,
        group: String,
        partition: u32,
        token: CancellationToken,
    ) -> Result<PartitionStats, StreamError> {
        let mut reader = self.source.reader(&group, partition).await?;
        let mut stats = PartitionStats::default();
        tracing::debug!(
            agent = %self.name,
            topic = %self.source.name(),
            partition,
            offset = reader.position(),
            "partition task started"
        );

        loop {
            // Only the wait for the next record is cancellable; an in-flight
            // record always finishes transform, publish and commit.
            let delivery = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                delivery = reader.recv() => delivery?,
            };
            let offset = delivery.offset;

            match delivery.message {
                Err(e) => {
                    tracing::warn!(
                        agent = %self.name,
                        topic = %self.source.name(),
                        partition,
                        offset,
                        error = %e,
                        "rejected unreadable record"
                    );
                    stats.skipped += 1;
                }
                Ok(message) => match self.process(&message).await {
                    Ok(emitted) => {
                        tracing::trace!(agent = %self.name, partition, offset, emitted, "processed");
                        stats.processed += 1;
                    }
                    Err(e) if e.is_record_level() => match self.policy {
                        ErrorPolicy::Skip => {
                            tracing::warn!(
                                agent = %self.name,
                                partition,
                                offset,
                                error = %e,
                                "record failed, skipping"
                            );
                            stats.skipped += 1;
                        }
                        ErrorPolicy::Halt => {
                            tracing::error!(
                                agent = %self.name,
                                partition,
                                offset,
                                error = %e,
                                "record failed, halting agent"
                            );
                            stats.halted = true;
                            token.cancel();
                            return Ok(stats);
                        }
                    },
                    Err(e) => {
                        return Err(e.with_context(format!("agent '{}' partition {partition}", self.name)));
                    }
                },
            }

            reader.commit(offset + 1).await?;
        }

        Ok(stats)
    }
}

impl<K, V> Agent<K, V, V>
where
    K: Send + Sync + 'static,
    V: Record,
{
    /// Terminal agent: no sinks, only a side effect per record.
    pub fn observe<F>(name: impl Into<String>, source: Arc<Topic<K, V>>, observer: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        Self::new(name, source, move |key, value| {
            observer(key, value);
            Ok(Vec::new())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  AgentTask: type-erased view used by the runtime
// ═══════════════════════════════════════════════════════════════

/// What the runtime needs from an agent, independent of its record types.
pub trait AgentTask: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> &str;

    fn sinks(&self) -> Vec<String>;

    /// Number of partitions to run, one task each.
    fn partitions(&self) -> u32;

    /// Consume one partition until `token` is cancelled.
    ///
    /// Record-level failures are handled inside per the error policy; an
    /// `Err` means a storage failure that is fatal to the runtime.
    fn run_partition(
        self: Arc<Self>,
        group: String,
        partition: u32,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<PartitionStats, StreamError>> + Send>>;
}

impl<K, V, O> AgentTask for Agent<K, V, O>
where
    K: Send + Sync + 'static,
    V: Record,
    O: Record,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &str {
        self.source.name()
    }

    fn sinks(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    fn partitions(&self) -> u32 {
        self.source.partitions()
    }

    fn run_partition(
        self: Arc<Self>,
        group: String,
        partition: u32,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<PartitionStats, StreamError>> + Send>> {
        Box::pin(self.consume(group, partition, token))
    }
}
