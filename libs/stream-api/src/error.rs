/// Category of a stream error. Lets the runtime decide whether an error is
/// contained to one record or fatal to the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed bytes on the wire. The record is rejected.
    Serialization,
    /// Well-formed payload that fails type/field validation.
    Schema,
    /// Raw producer input that cannot form a typed record.
    Validation,
    /// Business-logic failure inside an agent transform.
    Transform,
    /// Topic storage unreachable. Fatal to the runtime.
    Connection,
    /// I/O failure on an already opened topic.
    Io,
    /// Invalid configuration. Fails at startup.
    Config,
    /// Logical error (invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Serialization => f.write_str("serialization"),
            ErrorKind::Schema => f.write_str("schema"),
            ErrorKind::Validation => f.write_str("validation"),
            ErrorKind::Transform => f.write_str("transform"),
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for codecs, storages, topics and transforms.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the appropriate kind automatically so `?` works in
/// storage and codec implementations.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamError {
    kind: ErrorKind,
    message: String,
}

impl StreamError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, msg)
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, msg)
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Errors that concern a single record and must never unwind past the
    /// agent loop.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Serialization | ErrorKind::Schema | ErrorKind::Validation | ErrorKind::Transform
        )
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl std::fmt::Debug for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for StreamError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → StreamError with the matching kind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match e.classify() {
            Category::Data => Self::schema(e.to_string()),
            Category::Io => Self::io(e.to_string()),
            Category::Syntax | Category::Eof => Self::serialization(e.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for StreamError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for StreamError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::serialization(e.to_string())
    }
}
