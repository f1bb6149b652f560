use stream_api::{FromFields, Record, StreamError};

use crate::topic::{Ack, Topic};

/// One-shot publish of a record built from raw string fields.
///
/// Opens the topic, appends, closes it. Fields that don't form a valid `V`
/// fail with `Validation` before anything is written.
pub async fn produce<K, V>(topic: &Topic<K, V>, key: K, fields: &[&str]) -> Result<Ack, StreamError>
where
    K: Send + Sync + 'static,
    V: Record + FromFields,
{
    let value = V::from_fields(fields).map_err(|e| e.with_context(V::NAME))?;

    topic.connect().await?;
    let published = topic.publish(&key, &value).await;
    let closed = topic.disconnect().await;

    let ack = published?;
    closed?;
    tracing::info!(
        topic = %topic.name(),
        record = V::NAME,
        partition = ack.partition,
        offset = ack.offset,
        "produced record"
    );
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stream_api::{ErrorKind, JsonCodec, Utf8Codec};
    use stream_storage_memory::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl Record for Point {
        const NAME: &'static str = "Point";
    }

    impl FromFields for Point {
        fn from_fields(fields: &[&str]) -> Result<Self, StreamError> {
            let [x, y] = fields else {
                return Err(StreamError::validation(format!("expected 2 fields, got {}", fields.len())));
            };
            let parse = |s: &str| {
                s.parse::<i32>()
                    .map_err(|e| StreamError::validation(format!("'{s}': {e}")))
            };
            Ok(Point { x: parse(x)?, y: parse(y)? })
        }
    }

    fn topic(storage: Arc<MemoryStorage>) -> Topic<String, Point> {
        Topic::new("points", 2, storage, Utf8Codec, JsonCodec).unwrap()
    }

    #[tokio::test]
    async fn produces_parsed_record() {
        let storage = Arc::new(MemoryStorage::new());
        let topic = topic(storage.clone());
        let ack = produce(&topic, "p1".to_string(), &["3", "4"]).await.unwrap();
        assert_eq!(ack.partition, topic.partition_for(&"p1".to_string()).unwrap());
        assert_eq!(ack.offset, 0);

        topic.connect().await.unwrap();
        let mut reader = topic.reader("g", ack.partition).await.unwrap();
        let value = reader.recv().await.unwrap().message.unwrap().value;
        assert_eq!(value, Point { x: 3, y: 4 });
    }

    #[tokio::test]
    async fn bad_fields_are_rejected_before_publish() {
        let storage = Arc::new(MemoryStorage::new());
        let topic = topic(storage.clone());

        let err = produce(&topic, "p1".to_string(), &["3", "four"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = produce(&topic, "p1".to_string(), &["3"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(storage.len(0).await + storage.len(1).await, 0);
    }
}
