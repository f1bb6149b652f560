pub mod agent;
pub mod config;
pub mod error;
pub mod partition;
pub mod producer;
pub mod runtime;
pub mod storage;
pub mod topic;

pub use agent::{Agent, AgentTask, ErrorPolicy, PartitionStats};
pub use config::{AgentConfig, AppConfig, StorageConfig, TopicConfig};
pub use error::EngineError;
pub use partition::Partitioner;
pub use producer::produce;
pub use runtime::{Runtime, RuntimeState, consumer_group};
pub use storage::StorageFactory;
pub use topic::{Ack, Delivery, Message, PartitionReader, Topic, TopicHandle};
