use std::collections::HashSet;

use serde::Deserialize;

use stream_storage_file::FileStorageConfig;

use crate::agent::ErrorPolicy;
use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Consumer group under which agents commit their offsets.
    #[serde(default = "default_group")]
    pub group: String,

    /// Where topic partitions live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Topic definitions.
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicConfig>,

    /// Per-agent error handling overrides.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn default_group() -> String {
    "streaming-processing-pipeline".into()
}

fn default_topics() -> Vec<TopicConfig> {
    vec![
        TopicConfig {
            name: "src".into(),
            partitions: default_partitions(),
        },
        TopicConfig {
            name: "tgt".into(),
            partitions: default_partitions(),
        },
    ]
}

fn default_partitions() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-process logs; producer and worker must share the process.
    Memory,
    /// JSONL files shared between processes.
    File(FileStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File(FileStorageConfig {
            data_dir: "./data".into(),
            poll_interval_ms: 100,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub retries: u32,
}

/// Group, topic and agent names end up as directory names of file storage.
pub(crate) fn check_name(what: &str, name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Config(format!("{what} name must not be empty")));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(EngineError::Config(format!(
            "{what} name '{name}' must not contain '/', '\\' or '..'"
        )));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            storage: StorageConfig::default(),
            topics: default_topics(),
            agents: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Like `load`, but a missing file yields the built-in defaults.
    /// An existing file that fails to parse is still an error.
    pub fn load_or_default(path: &str) -> Result<Self, EngineError> {
        if !std::path::Path::new(path).exists() {
            tracing::debug!(config = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        check_name("group", &self.group)?;
        let mut names = HashSet::new();
        for topic in &self.topics {
            check_name("topic", &topic.name)?;
            if topic.partitions == 0 {
                return Err(EngineError::Config(format!(
                    "topic '{}': partitions must be at least 1",
                    topic.name
                )));
            }
            if !names.insert(topic.name.as_str()) {
                return Err(EngineError::DuplicateTopic(topic.name.clone()));
            }
        }
        for agent in &self.agents {
            check_name("agent", &agent.name)?;
        }
        Ok(())
    }

    pub fn topic(&self, name: &str) -> Result<&TopicConfig, EngineError> {
        self.topics
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::TopicNotFound(name.to_string()))
    }

    /// Settings for the named agent; defaults when not configured.
    pub fn agent(&self, name: &str) -> AgentConfig {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .unwrap_or_else(|| AgentConfig {
                name: name.to_string(),
                error_policy: ErrorPolicy::default(),
                retries: 0,
            })
    }
}
