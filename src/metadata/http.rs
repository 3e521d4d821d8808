//! HTTP/JSON metadata repository client.

use super::MetadataRepository;
use crate::policy::{Policy, REGULOME_TAG};
use crate::types::{Dataset, File};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

pub struct HttpMetadata {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(rename = "@graph", default)]
    graph: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    uuid: String,
}

impl HttpMetadata {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        // Joins resolve against the last path segment unless it ends in '/'.
        let base = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|e| Error::InvalidInput(format!("invalid metadata URL {}: {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// URL for an object: uuids and `@id` paths are both accepted.
    fn object_url(&self, id: &str) -> Result<Url> {
        let path = format!("{}/", id.trim_matches('/'));
        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| Error::InvalidInput(format!("invalid object id {}: {}", id, e)))?;
        url.query_pairs_mut()
            .append_pair("frame", "embedded")
            .append_pair("format", "json");
        Ok(url)
    }

    fn search_url(&self, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join("search/")
            .map_err(|e| Error::Internal(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("field", "uuid")
                .append_pair("limit", "all")
                .append_pair("format", "json");
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.client.get(url.clone()).send().await?;
        match response.status() {
            s if s.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::NotFound(url.to_string())),
            s => Err(Error::Transient(format!("GET {} returned {}", url, s))),
        }
    }

    async fn search(&self, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let url = self.search_url(params)?;
        let response = self.client.get(url.clone()).send().await?;
        // The repository answers an empty search with 404.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        let results: SearchResults = response.json().await?;
        Ok(results.graph.into_iter().map(|hit| hit.uuid).collect())
    }
}

#[async_trait]
impl MetadataRepository for HttpMetadata {
    async fn dataset(&self, id: &str) -> Result<Dataset> {
        self.fetch(self.object_url(id)?).await
    }

    async fn file(&self, id: &str) -> Result<File> {
        self.fetch(self.object_url(id)?).await
    }

    async fn regionable_datasets(&self, policy: &Policy) -> Result<HashSet<String>> {
        let mut uuids = HashSet::new();

        let mut params: Vec<(&str, &str)> = vec![("type", "Experiment")];
        params.extend(policy.region_search.statuses.iter().map(|s| ("status", s.as_str())));
        params.extend(
            policy
                .region_search
                .requirements
                .keys()
                .map(|assay| ("assay_term_name", assay.as_str())),
        );
        uuids.extend(self.search(&params).await?);

        let mut params: Vec<(&str, &str)> =
            vec![("type", "Dataset"), ("internal_tags", REGULOME_TAG)];
        params.extend(policy.regulome.statuses.iter().map(|s| ("status", s.as_str())));
        uuids.extend(self.search(&params).await?);

        Ok(uuids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpMetadata {
        HttpMetadata::new("http://localhost:6543/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_object_url_from_uuid() {
        let url = client()
            .object_url("0a61ce1c-4ea5-4e46-a1d4-a8a1d4ae1b1f")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6543/0a61ce1c-4ea5-4e46-a1d4-a8a1d4ae1b1f/?frame=embedded&format=json"
        );
    }

    #[test]
    fn test_object_url_from_path() {
        let url = client().object_url("/files/ENCFF002COS/").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6543/files/ENCFF002COS/?frame=embedded&format=json"
        );
    }

    #[test]
    fn test_search_url() {
        let url = client()
            .search_url(&[("type", "Dataset"), ("status", "in progress")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6543/search/?field=uuid&limit=all&format=json&type=Dataset&status=in+progress"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpMetadata::new("not a url", Duration::from_secs(5)).is_err());
    }
}
