pub mod codec;
pub mod error;
pub mod lookup;
pub mod record;
pub mod schema;
pub mod storage;

pub use codec::{Codec, JsonCodec, Utf8Codec};
pub use error::{ErrorKind, StreamError};
pub use lookup::LookupStore;
pub use record::{TopicRecord, now_ms};
pub use schema::{FromFields, Record};
pub use storage::{LogEntry, PartitionStorage, ReadResult};
