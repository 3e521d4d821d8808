//! Elasticsearch storage backend.
//!
//! Talks to the REST API of a document-type era cluster (5.x/6.x), where each
//! index holds several named types: `chr*` indices hold one type per
//! assembly, SNP indices one type per chromosome, and the residency index one
//! type per use policy.

use super::{DocumentStore, IndexSettings, StoredDoc};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub struct ElasticStore {
    client: Client,
    base_url: String,
    bulk_chunk_size: usize,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_type", default)]
    doc_type: Option<String>,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl ElasticStore {
    /// Create a new ElasticStore.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Cluster URL (e.g., "http://localhost:9201")
    /// * `timeout` - Per-request timeout
    /// * `bulk_chunk_size` - Documents per `_bulk` request
    pub fn new(base_url: &str, timeout: Duration, bulk_chunk_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bulk_chunk_size: bulk_chunk_size.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn head(&self, path: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, path, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(store_error(s, String::new())),
        }
    }

    async fn expect_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(store_error(status, message))
        }
    }

    async fn bulk_chunk(&self, index: &str, doc_type: &str, docs: &[(String, Value)]) -> Result<()> {
        let mut body = String::new();
        for (id, doc) in docs {
            let action = json!({ "index": { "_index": index, "_type": doc_type, "_id": id } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.to_string());
            body.push('\n');
        }

        let response = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let result: BulkResponse = response.json().await?;
        if result.errors {
            let first = result
                .items
                .iter()
                .find_map(|item| item.get("index").and_then(|i| i.get("error")).cloned())
                .unwrap_or(Value::Null);
            return Err(Error::Store {
                status: 200,
                message: format!("bulk insert into {}/{} failed: {}", index, doc_type, first),
            });
        }
        Ok(())
    }
}

fn store_error(status: StatusCode, message: String) -> Error {
    Error::Store {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.head(index).await
    }

    async fn type_exists(&self, index: &str, doc_type: &str) -> Result<bool> {
        self.head(&format!("{}/_mapping/{}", index, doc_type)).await
    }

    async fn create_index(&self, index: &str, settings: &IndexSettings) -> Result<()> {
        let response = self
            .send(Method::PUT, index, Some(&settings.to_body()))
            .await?;
        Self::expect_success(response).await?;
        tracing::info!("created index {}", index);
        Ok(())
    }

    async fn put_mapping(&self, index: &str, doc_type: &str, mapping: &Value) -> Result<()> {
        let mut body = serde_json::Map::new();
        body.insert(doc_type.to_string(), mapping.clone());
        let body = Value::Object(body);
        let response = self
            .send(
                Method::PUT,
                &format!("{}/_mapping/{}", index, doc_type),
                Some(&body),
            )
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn put(&self, index: &str, doc_type: &str, id: &str, doc: &Value) -> Result<()> {
        let response = self
            .send(Method::PUT, &format!("{}/{}/{}", index, doc_type, id), Some(doc))
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn bulk_put(
        &self,
        index: &str,
        doc_type: &str,
        docs: Vec<(String, Value)>,
    ) -> Result<usize> {
        for chunk in docs.chunks(self.bulk_chunk_size) {
            self.bulk_chunk(index, doc_type, chunk).await?;
        }
        Ok(docs.len())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDoc>> {
        let response = self
            .send(Method::GET, &format!("{}/_all/{}", index, id), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response).await?;
        let result: GetResponse = response.json().await?;
        match (result.found, result.source) {
            (true, Some(source)) => Ok(Some(StoredDoc {
                doc_type: result.doc_type.unwrap_or_default(),
                source,
            })),
            _ => Ok(None),
        }
    }

    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<bool> {
        let response = self
            .send(Method::DELETE, &format!("{}/{}/{}", index, doc_type, id), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect_success(response).await?;
        Ok(true)
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let response = self.send(Method::DELETE, index, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect_success(response).await?;
        tracing::info!("deleted index {}", index);
        Ok(true)
    }

    async fn count(&self, index: &str, doc_type: Option<&str>) -> Result<u64> {
        let path = match doc_type {
            Some(t) => format!("{}/{}/_count", index, t),
            None => format!("{}/_count", index),
        };
        let response = self.send(Method::GET, &path, None).await?;
        let response = Self::expect_success(response).await?;
        let result: CountResponse = response.json().await?;
        Ok(result.count)
    }

    async fn flush(&self, pattern: &str) -> Result<()> {
        let response = self
            .send(Method::POST, &format!("{}/_flush/synced", pattern), None)
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_paths() {
        let store = ElasticStore::new("http://localhost:9201/", Duration::from_secs(5), 10).unwrap();
        assert_eq!(store.url("chr1/hg19/abc"), "http://localhost:9201/chr1/hg19/abc");
        assert_eq!(store.url("/_bulk"), "http://localhost:9201/_bulk");
    }

    #[test]
    fn test_bulk_chunk_size_never_zero() {
        let store = ElasticStore::new("http://localhost:9201", Duration::from_secs(5), 0).unwrap();
        assert_eq!(store.bulk_chunk_size, 1);
    }

    #[test]
    fn test_store_error_keeps_status() {
        let err = store_error(StatusCode::SERVICE_UNAVAILABLE, "busy".to_string());
        assert!(err.is_transient());
    }
}
