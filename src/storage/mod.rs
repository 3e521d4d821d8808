//! Document store abstraction for the region indices.
//!
//! This module provides a trait-based abstraction over a search/document store
//! with named indices and per-index document types, so the indexer can run
//! against Elasticsearch in production and an in-memory store in tests.
//!
//! # Implementations
//!
//! - [`ElasticStore`] - Elasticsearch REST API (document-type era)
//! - [`MemoryStore`] - In-process maps, for tests and local runs
//!
//! Every mutation is keyed by a stable identifier, so replaying a partially
//! applied cycle never duplicates data.

mod elastic;
mod memory;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

/// Settings applied when an index is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub max_result_window: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            number_of_shards: 2,
            max_result_window: 99999,
        }
    }
}

impl IndexSettings {
    pub fn to_body(&self) -> Value {
        json!({ "settings": { "index": self } })
    }
}

/// A document read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub doc_type: String,
    pub source: Value,
}

/// Storage backend trait for index documents.
///
/// `get`, `delete` and `delete_index` report absence as `Ok(None)`/`Ok(false)`
/// rather than an error; any `Err` is a real failure.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn type_exists(&self, index: &str, doc_type: &str) -> Result<bool>;

    async fn create_index(&self, index: &str, settings: &IndexSettings) -> Result<()>;

    /// Install the mapping for `doc_type`. `mapping` is the type's body
    /// (`{"properties": ...}` or `{"enabled": false}`).
    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> Result<()>;

    /// Create or replace a single document.
    async fn put(&self, index: &str, doc_type: &str, id: &str, doc: &Value) -> Result<()>;

    /// Create or replace many documents of one type. Returns the number written.
    async fn bulk_put(&self, index: &str, doc_type: &str, docs: Vec<(String, Value)>)
    -> Result<usize>;

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDoc>>;

    /// Returns whether a document was actually deleted.
    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<bool>;

    /// Returns whether an index was actually deleted.
    async fn delete_index(&self, index: &str) -> Result<bool>;

    async fn count(&self, index: &str, doc_type: Option<&str>) -> Result<u64>;

    /// Durability hint for indices matching `pattern` (`*` wildcards allowed).
    async fn flush(&self, pattern: &str) -> Result<()>;

    async fn ensure_index(&self, index: &str, settings: &IndexSettings) -> Result<()> {
        if !self.index_exists(index).await? {
            self.create_index(index, settings).await?;
        }
        Ok(())
    }

    async fn ensure_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> Result<()> {
        if !self.type_exists(index, doc_type).await? {
            self.put_mapping(index, doc_type, mapping).await?;
        }
        Ok(())
    }

    /// Flush that never fails: correctness does not depend on it.
    async fn flush_advisory(&self, pattern: &str) {
        if let Err(e) = self.flush(pattern).await {
            tracing::debug!("flush of {} skipped: {}", pattern, e);
        }
    }
}

/// Mapping for region documents: index=chrom, type=assembly, id=file uuid.
pub fn chrom_index_mapping() -> Value {
    json!({
        "_all": { "enabled": false },
        "_source": { "enabled": true },
        "properties": {
            "uuid": { "type": "keyword" },
            "positions": {
                "type": "nested",
                "properties": {
                    "start": { "type": "long" },
                    "end": { "type": "long" }
                }
            }
        }
    })
}

/// Mapping for SNP documents: index=snp index, type=chrom, id=rsid.
pub fn snp_index_mapping() -> Value {
    json!({
        "_all": { "enabled": false },
        "_source": { "enabled": true },
        "properties": {
            "rsid": { "type": "keyword" },
            "start": { "type": "long" },
            "end": { "type": "long" }
        }
    })
}

/// Residency documents are only ever fetched by id.
pub fn resident_mapping() -> Value {
    json!({ "enabled": false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_settings_body() {
        let body = IndexSettings::default().to_body();
        assert_eq!(body["settings"]["index"]["number_of_shards"], 2);
        assert_eq!(body["settings"]["index"]["max_result_window"], 99999);
    }
}
