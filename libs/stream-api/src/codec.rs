use crate::error::StreamError;
use crate::schema::Record;

/// Key/value codec declared by a topic.
///
/// `decode` must reject malformed bytes with `ErrorKind::Serialization` and
/// well-formed payloads of the wrong shape with `ErrorKind::Schema`; it never
/// returns a partially populated value.
pub trait Codec<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &T) -> Result<Vec<u8>, StreamError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, StreamError>;
}

// ═══════════════════════════════════════════════════════════════
//  JsonCodec
// ═══════════════════════════════════════════════════════════════

/// JSON encoding of a [`Record`], validated on both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Record> Codec<T> for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, StreamError> {
        value.validate()?;
        serde_json::to_vec(value)
            .map_err(|e| StreamError::serialization(format!("encode {}: {e}", T::NAME)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, StreamError> {
        let value: T = serde_json::from_slice(bytes)
            .map_err(|e| StreamError::from(e).with_context(format!("decode {}", T::NAME)))?;
        value.validate()?;
        Ok(value)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Utf8Codec
// ═══════════════════════════════════════════════════════════════

/// Raw UTF-8 string keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn encode(&self, value: &String) -> Result<Vec<u8>, StreamError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, StreamError> {
        Ok(std::str::from_utf8(bytes)?.to_string())
    }
}
