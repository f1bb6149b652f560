use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use stream_api::StreamError;

use crate::agent::{AgentTask, PartitionStats};
use crate::config::check_name;
use crate::error::EngineError;
use crate::topic::TopicHandle;

/// Lifecycle of the runtime. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Result of one (agent, partition) task.
struct TaskExit {
    agent: String,
    partition: u32,
    result: Result<PartitionStats, StreamError>,
}

/// Consumer group under which `agent` commits its positions.
///
/// Each agent tracks its own offsets, so agents sharing a source topic never
/// move each other's resume position.
pub fn consumer_group(group: &str, agent: &str) -> String {
    format!("{group}.{agent}")
}

/// Process-wide owner of topics and agents.
///
/// Built explicitly from values (no global registration), started once,
/// then driven until an external shutdown signal or a fatal storage error.
pub struct Runtime {
    group: String,
    topics: Vec<Arc<dyn TopicHandle>>,
    agents: Vec<Arc<dyn AgentTask>>,
    state: watch::Sender<RuntimeState>,
    token: CancellationToken,
    tasks: JoinSet<TaskExit>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("group", &self.group)
            .field("topics", &self.topics.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("agents", &self.agents.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("state", &self.state())
            .finish()
    }
}

impl Runtime {
    /// Register topics and agents.
    ///
    /// Every source and sink topic of an agent must be among `topics`.
    /// Agent names must be unique.
    pub fn new(
        group: impl Into<String>,
        topics: Vec<Arc<dyn TopicHandle>>,
        agents: Vec<Arc<dyn AgentTask>>,
    ) -> Result<Self, EngineError> {
        let group = group.into();
        check_name("group", &group)?;

        let mut names = HashSet::new();
        for topic in &topics {
            if !names.insert(topic.name().to_string()) {
                return Err(EngineError::DuplicateTopic(topic.name().to_string()));
            }
        }

        let mut agent_names = HashSet::new();
        for agent in &agents {
            check_name("agent", agent.name())?;
            if !agent_names.insert(agent.name()) {
                return Err(EngineError::DuplicateAgent(agent.name().to_string()));
            }
            let ctx = format!("agent '{}'", agent.name());
            if !names.contains(agent.source()) {
                return Err(EngineError::TopicNotFound(format!("source '{}'", agent.source()))
                    .with_context(&ctx));
            }
            for sink in agent.sinks() {
                if !names.contains(&sink) {
                    return Err(EngineError::TopicNotFound(format!("sink '{sink}'")).with_context(&ctx));
                }
            }
        }

        let (state, _) = watch::channel(RuntimeState::Created);
        Ok(Self {
            group,
            topics,
            agents,
            state,
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        })
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: RuntimeState) {
        let prev = self.state.send_replace(next);
        tracing::info!(from = ?prev, to = ?next, "runtime state changed");
    }

    fn expect_state(&self, expected: RuntimeState) -> Result<(), EngineError> {
        let actual = self.state();
        if actual != expected {
            return Err(EngineError::InvalidState { expected, actual });
        }
        Ok(())
    }

    /// `Created → Running`: open every topic, then spawn one task per
    /// (agent, partition).
    ///
    /// A topic that cannot be opened aborts startup: topics opened so far are
    /// closed and the runtime ends `Stopped`.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        self.expect_state(RuntimeState::Created)?;

        for (i, topic) in self.topics.iter().enumerate() {
            if let Err(e) = topic.open().await {
                tracing::error!(topic = %topic.name(), error = %e, "failed to open topic");
                for opened in &self.topics[..i] {
                    if let Err(e) = opened.close().await {
                        tracing::warn!(topic = %opened.name(), error = %e, "close failed");
                    }
                }
                self.set_state(RuntimeState::Stopped);
                return Err(e.into());
            }
            tracing::info!(topic = %topic.name(), partitions = topic.partitions(), "opened topic");
        }

        for agent in &self.agents {
            // Child token: a halting agent cancels only its own partitions.
            let agent_token = self.token.child_token();
            for partition in 0..agent.partitions() {
                let agent = agent.clone();
                let group = consumer_group(&self.group, agent.name());
                let token = agent_token.clone();
                self.tasks.spawn(async move {
                    let name = agent.name().to_string();
                    let result = agent.run_partition(group, partition, token).await;
                    TaskExit {
                        agent: name,
                        partition,
                        result,
                    }
                });
            }
            tracing::info!(
                agent = %agent.name(),
                source = %agent.source(),
                sinks = ?agent.sinks(),
                partitions = agent.partitions(),
                "started agent"
            );
        }

        self.set_state(RuntimeState::Running);
        Ok(())
    }

    /// Drive the running agents until `signal` resolves or a task fails
    /// fatally, then shut down.
    ///
    /// Returns the fatal error, if any, after shutdown completed.
    pub async fn run_until<S>(&mut self, signal: S) -> Result<(), EngineError>
    where
        S: Future<Output = ()>,
    {
        self.expect_state(RuntimeState::Running)?;
        tokio::pin!(signal);

        let mut fatal = None;
        loop {
            tokio::select! {
                _ = &mut signal => {
                    tracing::info!("shutdown requested");
                    break;
                }
                joined = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    let Some(joined) = joined else { continue };
                    if let Some(e) = log_exit(joined) {
                        fatal = Some(e);
                        break;
                    }
                    if self.tasks.is_empty() {
                        tracing::warn!("all agents stopped, waiting for shutdown signal");
                    }
                }
            }
        }

        let closed = self.shutdown().await;
        match fatal {
            Some(e) => {
                if let Err(close_err) = closed {
                    tracing::warn!(error = %close_err, "shutdown after fatal error was not clean");
                }
                Err(e)
            }
            None => closed,
        }
    }

    /// `Running → Stopping → Stopped`: cancel all tasks at their next
    /// suspension point, wait for in-flight records, close topics.
    ///
    /// Calling it on an already stopped runtime is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        match self.state() {
            RuntimeState::Stopped => return Ok(()),
            RuntimeState::Created => {
                self.set_state(RuntimeState::Stopped);
                return Ok(());
            }
            RuntimeState::Running | RuntimeState::Stopping => {}
        }

        self.set_state(RuntimeState::Stopping);
        self.token.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            // Already stopping; a late failure is only reported.
            let _ = log_exit(joined);
        }

        let mut first_err = None;
        for topic in &self.topics {
            if let Err(e) = topic.close().await {
                tracing::error!(topic = %topic.name(), error = %e, "failed to close topic");
                first_err.get_or_insert(e);
            }
        }

        self.set_state(RuntimeState::Stopped);
        tracing::info!("runtime stopped");
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Log how a partition task ended. Returns an error if it was fatal.
fn log_exit(joined: Result<TaskExit, JoinError>) -> Option<EngineError> {
    match joined {
        Ok(TaskExit {
            agent,
            partition,
            result: Ok(stats),
        }) => {
            tracing::info!(
                agent = %agent,
                partition,
                processed = stats.processed,
                skipped = stats.skipped,
                halted = stats.halted,
                "partition task finished"
            );
            None
        }
        Ok(TaskExit {
            agent,
            partition,
            result: Err(e),
        }) => {
            tracing::error!(agent = %agent, partition, error = %e, "partition task failed");
            Some(EngineError::Stream(e))
        }
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            tracing::error!(error = %e, "partition task panicked");
            Some(EngineError::Task(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::agent::{Agent, ErrorPolicy};
    use crate::topic::Topic;
    use stream_api::{ErrorKind, JsonCodec, PartitionStorage, ReadResult, Record, TopicRecord, Utf8Codec};
    use stream_storage_memory::MemoryStorage;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Record for Ping {
        const NAME: &'static str = "Ping";
    }

    fn topic(name: &str) -> Arc<Topic<String, Ping>> {
        topic_on(name, 2, Arc::new(MemoryStorage::new()))
    }

    fn topic_on(name: &str, partitions: u32, storage: Arc<dyn PartitionStorage>) -> Arc<Topic<String, Ping>> {
        Arc::new(Topic::new(name, partitions, storage, Utf8Codec, JsonCodec).unwrap())
    }

    async fn wait_until(what: &str, done: impl Fn() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    #[test]
    fn unknown_sink_is_rejected() {
        let src = topic("src");
        let tgt = topic("tgt");
        let agent = Agent::new("a", src.clone(), |_k: &String, v: &Ping| Ok(vec![v.clone()])).sink(tgt);
        let err = Runtime::new(
            "g",
            vec![src as Arc<dyn TopicHandle>],
            vec![Arc::new(agent) as Arc<dyn AgentTask>],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::TopicNotFound(ref m) if m.contains("sink 'tgt'")));
    }

    #[test]
    fn duplicate_topic_is_rejected() {
        let err = Runtime::new(
            "g",
            vec![topic("src") as Arc<dyn TopicHandle>, topic("src") as Arc<dyn TopicHandle>],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTopic(_)));
    }

    #[tokio::test]
    async fn lifecycle_walks_all_states() {
        let src = topic("src");
        let agent = Agent::observe("tail", src.clone(), |_k, _v| {});
        let mut rt = Runtime::new(
            "g",
            vec![src as Arc<dyn TopicHandle>],
            vec![Arc::new(agent) as Arc<dyn AgentTask>],
        )
        .unwrap();
        assert_eq!(rt.state(), RuntimeState::Created);

        rt.start().await.unwrap();
        assert_eq!(rt.state(), RuntimeState::Running);
        assert!(matches!(
            rt.start().await,
            Err(EngineError::InvalidState { .. })
        ));

        rt.run_until(async {}).await.unwrap();
        assert_eq!(rt.state(), RuntimeState::Stopped);
        rt.shutdown().await.unwrap();
    }

    #[test]
    fn duplicate_agent_is_rejected() {
        let src = topic("src");
        let a = Agent::observe("tail", src.clone(), |_k, _v| {});
        let b = Agent::observe("tail", src.clone(), |_k, _v| {});
        let err = Runtime::new(
            "g",
            vec![src as Arc<dyn TopicHandle>],
            vec![Arc::new(a) as Arc<dyn AgentTask>, Arc::new(b) as Arc<dyn AgentTask>],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAgent(ref name) if name == "tail"));
    }

    #[test]
    fn path_like_group_is_rejected() {
        let err = Runtime::new("../elsewhere", Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn agents_on_one_source_keep_separate_positions() {
        let src = topic_on("src", 1, Arc::new(MemoryStorage::new()));
        let audited = Arc::new(Mutex::new(Vec::new()));
        let attempted = Arc::new(Mutex::new(Vec::new()));

        let audit = {
            let audited = audited.clone();
            Agent::observe("audit", src.clone(), move |_k: &String, v: &Ping| {
                audited.lock().unwrap().push(v.n);
            })
        };
        let strict = {
            let attempted = attempted.clone();
            Agent::<String, Ping, Ping>::new("strict", src.clone(), move |_k, v| {
                attempted.lock().unwrap().push(v.n);
                if v.n == 2 {
                    return Err(StreamError::transform("two"));
                }
                Ok(Vec::new())
            })
            .policy(ErrorPolicy::Halt)
        };

        let mut rt = Runtime::new(
            "g",
            vec![src.clone() as Arc<dyn TopicHandle>],
            vec![Arc::new(audit) as Arc<dyn AgentTask>, Arc::new(strict) as Arc<dyn AgentTask>],
        )
        .unwrap();
        rt.start().await.unwrap();

        let stop = CancellationToken::new();
        let signal = stop.clone().cancelled_owned();
        let handle = tokio::spawn(async move { rt.run_until(signal).await });

        for n in 1..=5 {
            src.publish(&"k".to_string(), &Ping { n }).await.unwrap();
        }
        wait_until("audit to see every record", || audited.lock().unwrap().len() == 5).await;
        wait_until("strict to reach the failing record", || attempted.lock().unwrap().contains(&2)).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        let audit_pos = src.reader(&consumer_group("g", "audit"), 0).await.unwrap().position();
        let strict_pos = src.reader(&consumer_group("g", "strict"), 0).await.unwrap().position();
        assert_eq!(audit_pos, 5);
        // Offset 1 holds the record the strict agent halted on.
        assert_eq!(strict_pos, 1);
    }

    /// Reads fail as if the connection dropped; closing fails too.
    struct Unreachable;

    type Fut<'a, T> = Pin<Box<dyn Future<Output = Result<T, StreamError>> + Send + 'a>>;

    impl PartitionStorage for Unreachable {
        fn open(&self, _partitions: u32) -> Fut<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn append(&self, _partition: u32, _record: TopicRecord) -> Fut<'_, u64> {
            Box::pin(async { Err(StreamError::connection("gone")) })
        }

        fn read(&self, _partition: u32, _offset: u64, _limit: usize) -> Fut<'_, ReadResult> {
            Box::pin(async { Err(StreamError::connection("gone")) })
        }

        fn wait_for(&self, _partition: u32, _offset: u64) -> Fut<'_, ()> {
            Box::pin(std::future::pending())
        }

        fn commit<'a>(&'a self, _group: &'a str, _partition: u32, _offset: u64) -> Fut<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn committed<'a>(&'a self, _group: &'a str, _partition: u32) -> Fut<'a, Option<u64>> {
            Box::pin(async { Ok(None) })
        }

        fn close(&self) -> Fut<'_, ()> {
            Box::pin(async { Err(StreamError::io("close failed")) })
        }
    }

    #[tokio::test]
    async fn fatal_error_wins_over_close_error() {
        let src = topic_on("src", 1, Arc::new(Unreachable));
        let agent = Agent::observe("tail", src.clone(), |_k, _v| {});
        let mut rt = Runtime::new(
            "g",
            vec![src as Arc<dyn TopicHandle>],
            vec![Arc::new(agent) as Arc<dyn AgentTask>],
        )
        .unwrap();
        rt.start().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), rt.run_until(std::future::pending()))
            .await
            .unwrap()
            .unwrap_err();
        match err {
            EngineError::Stream(e) => assert_eq!(e.kind(), ErrorKind::Connection),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(rt.state(), RuntimeState::Stopped);
    }
}
