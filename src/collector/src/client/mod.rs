//! Ports consumed by the collection core.
//!
//! The collector never talks to a provider SDK directly. It is handed
//! already-authenticated clients implementing these traits, each scoped to one
//! resolved environment (one account/region, one bucket, one registry).
//!
//! Listing operations are paged: the caller passes the continuation token of
//! the previous page (or `None` for the first page) and gets back a [`Page`]
//! whose `next_token` is `None` once the listing is exhausted.

pub mod memory;

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use memory::{EnvironmentSnapshot, InMemoryEnvironment};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A final page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Stack status reported for stacks that have been deleted.
pub const STACK_DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// Summary of a deployed (or previously deployed) stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    pub stack_id: Option<String>,
    pub stack_name: String,
    pub status: String,
}

impl StackSummary {
    /// Identifier used to fetch the template: the stack id when known,
    /// otherwise the stack name.
    pub fn identifier(&self) -> &str {
        self.stack_id.as_deref().unwrap_or(&self.stack_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == STACK_DELETE_COMPLETE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub arn: String,
}

/// Image identifier as returned by a registry listing.
///
/// A digest carrying several tags is listed once per tag; an untagged image
/// is listed once with `tag: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageId {
    pub digest: Option<String>,
    pub tag: Option<String>,
}

/// Key/value tag attached to an object or repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Result of a batched image delete. The registry reports failures per digest
/// rather than failing the whole call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<String>,
    pub failures: Vec<(String, String)>,
}

/// Stack enumeration and template retrieval.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackInventory: Send + Sync {
    async fn list_stacks(&self, next_token: Option<String>)
    -> Result<Page<StackSummary>, ClientError>;

    async fn get_template(&self, stack: &str) -> Result<String, ClientError>;
}

/// Object store holding file assets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn list_objects(
        &self,
        bucket: &str,
        next_token: Option<String>,
    ) -> Result<Page<ObjectSummary>, ClientError>;

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, ClientError>;

    /// Attach a tag to an object. Existing tags on the object are kept.
    async fn put_object_tag(&self, bucket: &str, key: &str, tag: Tag) -> Result<(), ClientError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;
}

/// Container image registry holding image assets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageRegistryClient: Send + Sync {
    async fn list_repositories(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<RepositorySummary>, ClientError>;

    async fn get_repository_tags(&self, repository_arn: &str) -> Result<Vec<Tag>, ClientError>;

    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<String>,
    ) -> Result<Page<ImageId>, ClientError>;

    /// Fetch manifests for the given digests. Digests the registry does not
    /// know are absent from the returned map.
    async fn get_image_manifests(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<BTreeMap<String, String>, ClientError>;

    /// Push an existing manifest under an additional tag.
    async fn put_image_tag(
        &self,
        repository: &str,
        digest: &str,
        manifest: &str,
        tag: &str,
    ) -> Result<(), ClientError>;

    async fn delete_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<BatchDeleteOutcome, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_identifier_prefers_id() {
        let with_id = StackSummary {
            stack_id: Some("arn:aws:cloudformation:us-east-1:123:stack/app/abc".to_string()),
            stack_name: "app".to_string(),
            status: "CREATE_COMPLETE".to_string(),
        };
        assert_eq!(
            with_id.identifier(),
            "arn:aws:cloudformation:us-east-1:123:stack/app/abc"
        );

        let without_id = StackSummary {
            stack_id: None,
            ..with_id
        };
        assert_eq!(without_id.identifier(), "app");
    }

    #[test]
    fn test_deleted_stack_status() {
        let stack = StackSummary {
            stack_id: None,
            stack_name: "gone".to_string(),
            status: STACK_DELETE_COMPLETE.to_string(),
        };
        assert!(stack.is_deleted());
    }
}
