//! Artifact scanners for the object store and the image registry.

use crate::client::{ImageRegistryClient, ObjectStoreClient};
use crate::error::ClientError;
use crate::pagination::collect_pages;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Image digest mapped to every tag attached to it.
pub type ImageTags = BTreeMap<String, BTreeSet<String>>;

pub struct ObjectScanner {
    client: Arc<dyn ObjectStoreClient>,
}

impl ObjectScanner {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self { client }
    }

    /// Every key in the bucket, in listing order.
    pub async fn scan(&self, bucket: &str) -> Result<Vec<String>, ClientError> {
        let objects = collect_pages("ListObjectsV2", |token| {
            self.client.list_objects(bucket, token)
        })
        .await?;

        let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();

        tracing::debug!(bucket = %bucket, objects = keys.len(), "Scanned object store");

        Ok(keys)
    }
}

pub struct ImageScanner {
    client: Arc<dyn ImageRegistryClient>,
}

impl ImageScanner {
    pub fn new(client: Arc<dyn ImageRegistryClient>) -> Self {
        Self { client }
    }

    /// Group a repository's image identifiers by digest.
    ///
    /// Grouping happens after the listing is exhausted, since one digest's
    /// tags may be spread over several pages. Identifiers without a digest
    /// are ignored; an untagged digest maps to an empty set.
    pub async fn scan(&self, repository: &str) -> Result<ImageTags, ClientError> {
        let ids = collect_pages("ListImages", |token| {
            self.client.list_images(repository, token)
        })
        .await?;

        let mut images = ImageTags::new();
        for id in ids {
            let Some(digest) = id.digest else {
                continue;
            };
            let tags = images.entry(digest).or_default();
            if let Some(tag) = id.tag {
                tags.insert(tag);
            }
        }

        tracing::debug!(
            repository = %repository,
            digests = images.len(),
            "Scanned image repository"
        );

        Ok(images)
    }
}
