//! redb table definitions for the durable object store.

use redb::TableDefinition;

/// Object bodies keyed by `{bucket}/{key}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Bucket names, value unused.
pub const BUCKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("buckets");

/// Composite table key for an object.
pub fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}
