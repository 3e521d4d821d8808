//! Access to the primary dataset/file metadata repository.
//!
//! The repository owns datasets and files; the indexer only reads them. The
//! [`MetadataRepository`] trait is the seam the engine is built against, with
//! [`HttpMetadata`] talking to the repository's JSON API.

mod http;

pub use http::HttpMetadata;

use crate::Result;
use crate::policy::Policy;
use crate::types::{Dataset, File};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Fetch a dataset with its files embedded where the repository embeds
    /// them. Missing datasets are `Error::NotFound`.
    async fn dataset(&self, id: &str) -> Result<Dataset>;

    /// Fetch a single file by uuid or `@id`. Missing files are
    /// `Error::NotFound`.
    async fn file(&self, id: &str) -> Result<File>;

    /// Uuids of every dataset that could hold indexable files under `policy`.
    async fn regionable_datasets(&self, policy: &Policy) -> Result<HashSet<String>>;
}
