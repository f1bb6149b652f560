use stream_engine::{Ack, AppConfig, StorageFactory, Topic, produce};

use super::config::{ProduceArgs, SOURCE_TOPIC};
use super::domain::User;
use super::error::PipelineError;

/// Publish one user to the source topic.
pub async fn run(config: &AppConfig, args: &ProduceArgs) -> Result<Ack, PipelineError> {
    let factory = StorageFactory::new(config.storage.clone());
    let topic: Topic<String, User> = factory.json_topic(config.topic(SOURCE_TOPIC)?)?;

    let ack = produce(&topic, args.key().to_string(), &[args.id.as_str(), args.user_name.as_str()]).await?;
    tracing::info!(
        id = %args.id,
        user_name = %args.user_name,
        partition = ack.partition,
        offset = ack.offset,
        "user sent"
    );
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_api::ErrorKind;
    use stream_engine::StorageConfig;

    fn config() -> AppConfig {
        AppConfig {
            storage: StorageConfig::Memory,
            ..AppConfig::default()
        }
    }

    fn args(id: &str, user_name: &str) -> ProduceArgs {
        ProduceArgs {
            id: id.into(),
            user_name: user_name.into(),
            key: None,
        }
    }

    #[tokio::test]
    async fn valid_user_is_acknowledged() {
        let ack = run(&config(), &args("3", "Ann")).await.unwrap();
        assert!(ack.partition < 4);
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_validation_error() {
        let err = run(&config(), &args("three", "Ann")).await.unwrap_err();
        match err {
            PipelineError::Stream(e) => assert_eq!(e.kind(), ErrorKind::Validation),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
