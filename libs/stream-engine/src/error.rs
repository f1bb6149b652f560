use stream_api::StreamError;

use crate::runtime::RuntimeState;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Stream(#[from] StreamError),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic '{0}' registered twice")]
    DuplicateTopic(String),

    #[error("agent '{0}' registered twice")]
    DuplicateAgent(String),

    #[error("runtime is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: RuntimeState,
        actual: RuntimeState,
    },

    #[error("agent task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Stream` variant, context is added to the inner `StreamError`.
    /// For other variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Stream(e) => EngineError::Stream(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::TopicNotFound(msg) => EngineError::TopicNotFound(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
