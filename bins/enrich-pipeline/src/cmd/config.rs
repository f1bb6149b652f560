use clap::Args;

use stream_engine::AppConfig;

use super::error::PipelineError;

/// Topic the producer writes users to.
pub const SOURCE_TOPIC: &str = "src";
/// Topic the enriched users land in.
pub const TARGET_TOPIC: &str = "tgt";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

/// Load the config file, or built-in defaults when it doesn't exist.
///
/// Both pipeline topics must be declared.
pub fn load_config(path: &str) -> Result<AppConfig, PipelineError> {
    let config = AppConfig::load_or_default(path)?;
    check_topics(&config)?;
    Ok(config)
}

fn check_topics(config: &AppConfig) -> Result<(), PipelineError> {
    for name in [SOURCE_TOPIC, TARGET_TOPIC] {
        if config.topic(name).is_err() {
            return Err(PipelineError::Config(format!("topic '{name}' is not configured")));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct WorkerArgs {
    /// Log level used when RUST_LOG is not set.
    #[arg(short = 'l', long, default_value = "info")]
    pub loglevel: String,
}

#[derive(Args, Clone, Debug)]
pub struct ProduceArgs {
    /// User id (integer).
    pub id: String,

    /// User name.
    pub user_name: String,

    /// Partitioning key; defaults to the id.
    #[arg(long)]
    pub key: Option<String>,
}

impl ProduceArgs {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.id)
    }
}
