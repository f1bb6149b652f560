use std::sync::Arc;

use stream_api::LookupStore;
use stream_engine::{Agent, AgentTask, AppConfig, Runtime, StorageFactory, Topic, TopicHandle};

use super::config::{SOURCE_TOPIC, TARGET_TOPIC};
use super::domain::{Database, User, UserJoin, enrich};
use super::error::PipelineError;

pub const SOURCE_AGENT: &str = "source-agent";
pub const TARGET_AGENT: &str = "target-agent";

/// Run both agents until Ctrl+C or a fatal storage error.
pub async fn run(config: &AppConfig) -> Result<(), PipelineError> {
    let factory = StorageFactory::new(config.storage.clone());
    let mut runtime = build(config, &factory, Arc::new(Database), |_, _| {})?;

    runtime.start().await?;
    tracing::info!(group = %config.group, "worker started, press Ctrl+C to stop");
    runtime.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down..."),
        Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C, shutting down"),
    }
}

/// Wire `src → source-agent → tgt → target-agent`.
///
/// `on_target` sees every enriched user after it has been logged.
pub fn build<F>(
    config: &AppConfig,
    factory: &StorageFactory,
    store: Arc<dyn LookupStore>,
    on_target: F,
) -> Result<Runtime, PipelineError>
where
    F: Fn(&String, &UserJoin) + Send + Sync + 'static,
{
    let src: Arc<Topic<String, User>> = Arc::new(factory.json_topic(config.topic(SOURCE_TOPIC)?)?);
    let tgt: Arc<Topic<String, UserJoin>> = Arc::new(factory.json_topic(config.topic(TARGET_TOPIC)?)?);

    let source_agent = Agent::new(SOURCE_AGENT, src.clone(), move |key: &String, user: &User| {
        tracing::info!(key = %key, id = user.id, user_name = %user.user_name, "[SOURCE] received user");
        Ok(vec![enrich(user, store.as_ref())])
    })
    .sink(tgt.clone())
    .configure(&config.agent(SOURCE_AGENT));

    let target_agent = Agent::observe(TARGET_AGENT, tgt.clone(), move |key: &String, join: &UserJoin| {
        tracing::info!(
            key = %key,
            id = join.id,
            user_name = %join.user_name,
            info = %join.info,
            "[TARGET] received enriched user"
        );
        on_target(key, join);
    })
    .configure(&config.agent(TARGET_AGENT));

    let runtime = Runtime::new(
        config.group.clone(),
        vec![src as Arc<dyn TopicHandle>, tgt as Arc<dyn TopicHandle>],
        vec![
            Arc::new(source_agent) as Arc<dyn AgentTask>,
            Arc::new(target_agent) as Arc<dyn AgentTask>,
        ],
    )?;
    Ok(runtime)
}
