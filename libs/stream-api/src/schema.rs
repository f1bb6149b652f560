use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StreamError;

/// A typed, serializable record carried by a topic.
///
/// `validate` runs before every publish and after every decode, so a record
/// observed by an agent always satisfies its field constraints.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Record type name, used in logs and error messages.
    const NAME: &'static str;

    fn validate(&self) -> Result<(), StreamError> {
        Ok(())
    }
}

/// Build a typed record from raw string fields (CLI input).
///
/// Fails with `ErrorKind::Validation` when a field is missing, extra or does
/// not parse into its declared type.
pub trait FromFields: Sized {
    fn from_fields(fields: &[&str]) -> Result<Self, StreamError>;
}

impl Record for String {
    const NAME: &'static str = "String";
}
