//! In-memory [`DocumentStore`] for tests and local runs.
//!
//! Mirrors the store semantics the indexer relies on: indices must be created
//! before documents are written, mappings are per document type, and `get`
//! looks a document up by id across all types of an index.

use super::{DocumentStore, IndexSettings, StoredDoc};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemIndex {
    settings: Option<IndexSettings>,
    mappings: HashMap<String, Value>,
    /// id -> (type, source)
    docs: BTreeMap<String, (String, Value)>,
}

#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<BTreeMap<String, MemIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.indices.read().await.keys().cloned().collect()
    }

    pub async fn settings(&self, index: &str) -> Option<IndexSettings> {
        self.indices
            .read()
            .await
            .get(index)
            .and_then(|idx| idx.settings)
    }

    pub async fn mapping(&self, index: &str, doc_type: &str) -> Option<Value> {
        self.indices
            .read()
            .await
            .get(index)
            .and_then(|idx| idx.mappings.get(doc_type).cloned())
    }

    /// Ids of all documents of `doc_type` in `index`.
    pub async fn ids(&self, index: &str, doc_type: &str) -> Vec<String> {
        self.indices
            .read()
            .await
            .get(index)
            .map(|idx| {
                idx.docs
                    .iter()
                    .filter(|(_, (t, _))| t == doc_type)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn missing_index(index: &str) -> Error {
    Error::Store {
        status: 404,
        message: format!("index_not_found_exception: no such index [{}]", index),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.read().await.contains_key(index))
    }

    async fn type_exists(&self, index: &str, doc_type: &str) -> Result<bool> {
        Ok(self
            .indices
            .read()
            .await
            .get(index)
            .is_some_and(|idx| idx.mappings.contains_key(doc_type)))
    }

    async fn create_index(&self, index: &str, settings: &IndexSettings) -> Result<()> {
        let mut indices = self.indices.write().await;
        if indices.contains_key(index) {
            return Err(Error::Store {
                status: 400,
                message: format!("resource_already_exists_exception: [{}]", index),
            });
        }
        indices.insert(
            index.to_string(),
            MemIndex {
                settings: Some(*settings),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> Result<()> {
        let mut indices = self.indices.write().await;
        let idx = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        idx.mappings.insert(doc_type.to_string(), mapping.clone());
        Ok(())
    }

    async fn put(&self, index: &str, doc_type: &str, id: &str, doc: &Value) -> Result<()> {
        let mut indices = self.indices.write().await;
        // Like Elasticsearch with auto-create on, a write creates a missing index.
        let idx = indices.entry(index.to_string()).or_default();
        idx.docs
            .insert(id.to_string(), (doc_type.to_string(), doc.clone()));
        Ok(())
    }

    async fn bulk_put(
        &self,
        index: &str,
        doc_type: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<usize> {
        let mut indices = self.indices.write().await;
        let idx = indices.entry(index.to_string()).or_default();
        let count = docs.len();
        for (id, doc) in docs {
            idx.docs.insert(id, (doc_type.to_string(), doc));
        }
        Ok(count)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDoc>> {
        Ok(self.indices.read().await.get(index).and_then(|idx| {
            idx.docs.get(id).map(|(doc_type, source)| StoredDoc {
                doc_type: doc_type.clone(),
                source: source.clone(),
            })
        }))
    }

    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<bool> {
        let mut indices = self.indices.write().await;
        let Some(idx) = indices.get_mut(index) else {
            return Ok(false);
        };
        match idx.docs.get(id) {
            Some((t, _)) if t == doc_type => {
                idx.docs.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        Ok(self.indices.write().await.remove(index).is_some())
    }

    async fn count(&self, index: &str, doc_type: Option<&str>) -> Result<u64> {
        let indices = self.indices.read().await;
        let idx = indices.get(index).ok_or_else(|| missing_index(index))?;
        let count = match doc_type {
            Some(t) => idx.docs.values().filter(|(dt, _)| dt == t).count(),
            None => idx.docs.len(),
        };
        Ok(count as u64)
    }

    async fn flush(&self, pattern: &str) -> Result<()> {
        // A wildcard may match nothing; a concrete name must exist.
        if pattern.contains('*') || self.indices.read().await.contains_key(pattern) {
            Ok(())
        } else {
            Err(missing_index(pattern))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ensure_index_is_idempotent() {
        let store = MemoryStore::new();
        let settings = IndexSettings::default();
        store.ensure_index("chr1", &settings).await.unwrap();
        store.ensure_index("chr1", &settings).await.unwrap();
        assert_eq!(store.index_names().await, vec!["chr1".to_string()]);
        assert_eq!(store.settings("chr1").await, Some(settings));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store
            .put("chr1", "hg19", "f1", &json!({"uuid": "f1"}))
            .await
            .unwrap();

        let doc = store.get("chr1", "f1").await.unwrap().unwrap();
        assert_eq!(doc.doc_type, "hg19");
        assert_eq!(doc.source["uuid"], "f1");

        assert!(!store.delete("chr1", "mm10", "f1").await.unwrap());
        assert!(store.delete("chr1", "hg19", "f1").await.unwrap());
        assert!(store.get("chr1", "f1").await.unwrap().is_none());
        assert!(!store.delete("chr2", "hg19", "f1").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_by_type() {
        let store = MemoryStore::new();
        store
            .ensure_index("resident_regionsets", &IndexSettings::default())
            .await
            .unwrap();
        store
            .put("resident_regionsets", "region_search", "a", &json!({}))
            .await
            .unwrap();
        store
            .put("resident_regionsets", "multiple", "b", &json!({}))
            .await
            .unwrap();

        assert_eq!(store.count("resident_regionsets", None).await.unwrap(), 2);
        assert_eq!(
            store
                .count("resident_regionsets", Some("region_search"))
                .await
                .unwrap(),
            1
        );
        assert!(store.count("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_bulk_put_and_delete_index() {
        let store = MemoryStore::new();
        let docs = vec![
            ("rs1".to_string(), json!({"rsid": "rs1"})),
            ("rs2".to_string(), json!({"rsid": "rs2"})),
        ];
        assert_eq!(store.bulk_put("snp141_hg19", "chr1", docs).await.unwrap(), 2);
        assert_eq!(store.ids("snp141_hg19", "chr1").await.len(), 2);
        assert!(store.delete_index("snp141_hg19").await.unwrap());
        assert!(!store.delete_index("snp141_hg19").await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_patterns() {
        let store = MemoryStore::new();
        store
            .ensure_index("resident_regionsets", &IndexSettings::default())
            .await
            .unwrap();

        store.flush("resident_regionsets").await.unwrap();
        store.flush("chr*").await.unwrap();
        assert!(store.flush("chr1").await.is_err());
    }
}
