/// External read-only key-value lookup used to enrich records.
///
/// `query` is total: a missing key yields a sentinel string chosen by the
/// implementation, never an error. Implementations must be reentrant since
/// every partition task of an agent calls them concurrently.
pub trait LookupStore: Send + Sync {
    fn query(&self, key: &str) -> String;
}
