//! In-memory environment implementing every client port.
//!
//! Used by the test-suite and by the command-line binary, which loads the
//! environment from a JSON snapshot file, runs a collection against it and
//! writes the mutated snapshot back.

use super::{
    BatchDeleteOutcome, ImageId, ImageRegistryClient, ObjectStoreClient, ObjectSummary, Page,
    RepositorySummary, StackInventory, StackSummary, Tag,
};
use crate::error::ClientError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_PAGE_SIZE: usize = 1000;

fn default_stack_status() -> String {
    "CREATE_COMPLETE".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    #[serde(default)]
    pub stack_id: Option<String>,
    pub stack_name: String,
    #[serde(default = "default_stack_status")]
    pub status: String,
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub arn: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

impl RepositoryRecord {
    /// Point `tag` at `digest`. A tag names one image per repository, so it
    /// moves off whichever image carried it before.
    fn retag(&mut self, digest: &str, tag: &str) {
        for image in &mut self.images {
            if image.digest == digest {
                if !image.tags.iter().any(|t| t == tag) {
                    image.tags.push(tag.to_string());
                }
            } else {
                image.tags.retain(|t| t != tag);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub digest: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub manifest: String,
}

/// Serializable state of one environment: its stacks, the asset bucket(s)
/// with per-object tags, and the image repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    #[serde(default)]
    pub stacks: Vec<StackRecord>,
    #[serde(default)]
    pub buckets: BTreeMap<String, BTreeMap<String, Vec<Tag>>>,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryRecord>,
}

/// A mutating call observed by the in-memory environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    PutObjectTag {
        bucket: String,
        key: String,
        tag: Tag,
    },
    DeleteObject {
        bucket: String,
        key: String,
    },
    PutImageTag {
        repository: String,
        digest: String,
        tag: String,
    },
    DeleteImages {
        repository: String,
        digests: Vec<String>,
    },
}

/// Injected failures, keyed by the name of the resource the call targets.
#[derive(Debug, Default)]
struct FailurePlan {
    stack_listing: bool,
    repository_listing: bool,
    templates: HashSet<String>,
    listings: HashSet<String>,
    tag_reads: HashSet<String>,
    tag_writes: HashSet<String>,
    deletes: HashSet<String>,
    manifests: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    snapshot: EnvironmentSnapshot,
    failures: FailurePlan,
    mutations: Vec<Mutation>,
}

/// Cloneable handle to a shared in-memory environment.
#[derive(Debug, Clone)]
pub struct InMemoryEnvironment {
    state: Arc<Mutex<State>>,
    page_size: usize,
}

impl Default for InMemoryEnvironment {
    fn default() -> Self {
        Self::new(EnvironmentSnapshot::default())
    }
}

fn paginate<T: Clone>(
    items: &[T],
    next_token: Option<String>,
    page_size: usize,
    operation: &'static str,
) -> Result<Page<T>, ClientError> {
    let start = match next_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ClientError::request(operation, format!("invalid token {token}")))?,
        None => 0,
    };
    let end = (start + page_size).min(items.len());
    let page = items.get(start..end).unwrap_or_default().to_vec();
    let next_token = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: page,
        next_token,
    })
}

impl InMemoryEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                snapshot,
                ..Default::default()
            })),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit every listing to `page_size` items per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Load an environment from a JSON snapshot file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read environment file {}", path.display()))?;
        let snapshot: EnvironmentSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse environment file {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    /// Write the current state back to a JSON snapshot file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let raw = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize environment snapshot")?;
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("Failed to write environment file {}", path.display()))?;
        Ok(())
    }

    pub async fn snapshot(&self) -> EnvironmentSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().await.mutations.clone()
    }

    pub async fn add_stack(&self, name: &str, template: &str) {
        self.state.lock().await.snapshot.stacks.push(StackRecord {
            stack_id: Some(format!("arn:aws:cloudformation:stack/{name}")),
            stack_name: name.to_string(),
            status: default_stack_status(),
            template: template.to_string(),
        });
    }

    pub async fn put_object(&self, bucket: &str, key: &str) {
        self.state
            .lock()
            .await
            .snapshot
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), Vec::new());
    }

    pub async fn object_tags(&self, bucket: &str, key: &str) -> Option<Vec<Tag>> {
        self.state
            .lock()
            .await
            .snapshot
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    pub async fn add_repository(&self, name: &str, tags: Vec<Tag>) {
        self.state.lock().await.snapshot.repositories.insert(
            name.to_string(),
            RepositoryRecord {
                arn: format!("arn:aws:ecr:repository/{name}"),
                tags,
                images: Vec::new(),
            },
        );
    }

    pub async fn push_image(&self, repository: &str, digest: &str, tags: &[&str]) {
        let mut state = self.state.lock().await;
        let repo = state
            .snapshot
            .repositories
            .entry(repository.to_string())
            .or_insert_with(|| RepositoryRecord {
                arn: format!("arn:aws:ecr:repository/{repository}"),
                ..Default::default()
            });
        repo.images.push(ImageRecord {
            digest: digest.to_string(),
            tags: Vec::new(),
            manifest: format!("{{\"config\":{{\"digest\":\"{digest}\"}}}}"),
        });
        for tag in tags {
            repo.retag(digest, tag);
        }
    }

    pub async fn image_tags(&self, repository: &str, digest: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .await
            .snapshot
            .repositories
            .get(repository)
            .and_then(|repo| repo.images.iter().find(|i| i.digest == digest))
            .map(|image| image.tags.clone())
    }

    pub async fn fail_stack_listing(&self) {
        self.state.lock().await.failures.stack_listing = true;
    }

    pub async fn fail_repository_listing(&self) {
        self.state.lock().await.failures.repository_listing = true;
    }

    /// Fail template fetches for the given stack identifier (id or name).
    pub async fn fail_template(&self, stack: &str) {
        self.state
            .lock()
            .await
            .failures
            .templates
            .insert(stack.to_string());
    }

    /// Fail listings of the given bucket or repository.
    pub async fn fail_listing(&self, container: &str) {
        self.state
            .lock()
            .await
            .failures
            .listings
            .insert(container.to_string());
    }

    /// Fail tag reads for the given object key or repository ARN.
    pub async fn fail_tag_read(&self, resource: &str) {
        self.state
            .lock()
            .await
            .failures
            .tag_reads
            .insert(resource.to_string());
    }

    /// Fail tag writes for the given object key or image digest.
    pub async fn fail_tag_write(&self, resource: &str) {
        self.state
            .lock()
            .await
            .failures
            .tag_writes
            .insert(resource.to_string());
    }

    /// Fail deletes of the given object key or image digest.
    pub async fn fail_delete(&self, resource: &str) {
        self.state
            .lock()
            .await
            .failures
            .deletes
            .insert(resource.to_string());
    }

    pub async fn fail_manifest(&self, digest: &str) {
        self.state
            .lock()
            .await
            .failures
            .manifests
            .insert(digest.to_string());
    }
}

#[async_trait]
impl StackInventory for InMemoryEnvironment {
    async fn list_stacks(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<StackSummary>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.stack_listing {
            return Err(ClientError::request("ListStacks", "injected failure"));
        }
        let summaries: Vec<StackSummary> = state
            .snapshot
            .stacks
            .iter()
            .map(|stack| StackSummary {
                stack_id: stack.stack_id.clone(),
                stack_name: stack.stack_name.clone(),
                status: stack.status.clone(),
            })
            .collect();
        paginate(&summaries, next_token, self.page_size, "ListStacks")
    }

    async fn get_template(&self, stack: &str) -> Result<String, ClientError> {
        let state = self.state.lock().await;
        if state.failures.templates.contains(stack) {
            return Err(ClientError::request("GetTemplate", "injected failure"));
        }
        state
            .snapshot
            .stacks
            .iter()
            .find(|s| s.stack_id.as_deref() == Some(stack) || s.stack_name == stack)
            .map(|s| s.template.clone())
            .ok_or_else(|| ClientError::not_found(format!("stack {stack}")))
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryEnvironment {
    async fn list_objects(
        &self,
        bucket: &str,
        next_token: Option<String>,
    ) -> Result<Page<ObjectSummary>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.listings.contains(bucket) {
            return Err(ClientError::request("ListObjectsV2", "injected failure"));
        }
        let objects = state
            .snapshot
            .buckets
            .get(bucket)
            .ok_or_else(|| ClientError::not_found(format!("bucket {bucket}")))?;
        let keys: Vec<ObjectSummary> = objects
            .keys()
            .map(|key| ObjectSummary { key: key.clone() })
            .collect();
        paginate(&keys, next_token, self.page_size, "ListObjectsV2")
    }

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.tag_reads.contains(key) {
            return Err(ClientError::request("GetObjectTagging", "injected failure"));
        }
        state
            .snapshot
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("object {bucket}/{key}")))
    }

    async fn put_object_tag(&self, bucket: &str, key: &str, tag: Tag) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::PutObjectTag {
            bucket: bucket.to_string(),
            key: key.to_string(),
            tag: tag.clone(),
        });
        if state.failures.tag_writes.contains(key) {
            return Err(ClientError::request("PutObjectTagging", "injected failure"));
        }
        let tags = state
            .snapshot
            .buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
            .ok_or_else(|| ClientError::not_found(format!("object {bucket}/{key}")))?;
        tags.retain(|existing| existing.key != tag.key);
        tags.push(tag);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::DeleteObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if state.failures.deletes.contains(key) {
            return Err(ClientError::request("DeleteObject", "injected failure"));
        }
        if let Some(objects) = state.snapshot.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageRegistryClient for InMemoryEnvironment {
    async fn list_repositories(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<RepositorySummary>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.repository_listing {
            return Err(ClientError::request(
                "DescribeRepositories",
                "injected failure",
            ));
        }
        let repositories: Vec<RepositorySummary> = state
            .snapshot
            .repositories
            .iter()
            .map(|(name, repo)| RepositorySummary {
                name: name.clone(),
                arn: repo.arn.clone(),
            })
            .collect();
        paginate(
            &repositories,
            next_token,
            self.page_size,
            "DescribeRepositories",
        )
    }

    async fn get_repository_tags(&self, repository_arn: &str) -> Result<Vec<Tag>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.tag_reads.contains(repository_arn) {
            return Err(ClientError::request("ListTagsForResource", "injected failure"));
        }
        state
            .snapshot
            .repositories
            .values()
            .find(|repo| repo.arn == repository_arn)
            .map(|repo| repo.tags.clone())
            .ok_or_else(|| ClientError::not_found(format!("repository {repository_arn}")))
    }

    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<String>,
    ) -> Result<Page<ImageId>, ClientError> {
        let state = self.state.lock().await;
        if state.failures.listings.contains(repository) {
            return Err(ClientError::request("ListImages", "injected failure"));
        }
        let repo = state
            .snapshot
            .repositories
            .get(repository)
            .ok_or_else(|| ClientError::not_found(format!("repository {repository}")))?;
        let mut ids = Vec::new();
        for image in &repo.images {
            if image.tags.is_empty() {
                ids.push(ImageId {
                    digest: Some(image.digest.clone()),
                    tag: None,
                });
            }
            for tag in &image.tags {
                ids.push(ImageId {
                    digest: Some(image.digest.clone()),
                    tag: Some(tag.clone()),
                });
            }
        }
        paginate(&ids, next_token, self.page_size, "ListImages")
    }

    async fn get_image_manifests(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let state = self.state.lock().await;
        let repo = state
            .snapshot
            .repositories
            .get(repository)
            .ok_or_else(|| ClientError::not_found(format!("repository {repository}")))?;
        Ok(repo
            .images
            .iter()
            .filter(|image| digests.contains(&image.digest))
            .filter(|image| !state.failures.manifests.contains(&image.digest))
            .map(|image| (image.digest.clone(), image.manifest.clone()))
            .collect())
    }

    async fn put_image_tag(
        &self,
        repository: &str,
        digest: &str,
        manifest: &str,
        tag: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::PutImageTag {
            repository: repository.to_string(),
            digest: digest.to_string(),
            tag: tag.to_string(),
        });
        if state.failures.tag_writes.contains(digest) {
            return Err(ClientError::request("PutImage", "injected failure"));
        }
        let repo = state
            .snapshot
            .repositories
            .get_mut(repository)
            .ok_or_else(|| ClientError::not_found(format!("repository {repository}")))?;
        let image = repo
            .images
            .iter()
            .find(|i| i.digest == digest)
            .ok_or_else(|| ClientError::not_found(format!("image {repository}@{digest}")))?;
        if image.manifest != manifest {
            return Err(ClientError::request(
                "PutImage",
                format!("manifest does not match digest {digest}"),
            ));
        }
        repo.retag(digest, tag);
        Ok(())
    }

    async fn delete_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<BatchDeleteOutcome, ClientError> {
        let mut state = self.state.lock().await;
        state.mutations.push(Mutation::DeleteImages {
            repository: repository.to_string(),
            digests: digests.to_vec(),
        });
        let State {
            snapshot, failures, ..
        } = &mut *state;
        let repo = snapshot
            .repositories
            .get_mut(repository)
            .ok_or_else(|| ClientError::not_found(format!("repository {repository}")))?;

        let mut outcome = BatchDeleteOutcome::default();
        for digest in digests {
            if failures.deletes.contains(digest) {
                outcome
                    .failures
                    .push((digest.clone(), "injected failure".to_string()));
                continue;
            }
            let before = repo.images.len();
            repo.images.retain(|image| &image.digest != digest);
            if repo.images.len() < before {
                outcome.deleted.push(digest.clone());
            } else {
                outcome
                    .failures
                    .push((digest.clone(), "ImageNotFound".to_string()));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_pages_follow_tokens() {
        let env = InMemoryEnvironment::default().with_page_size(2);
        for key in ["a.zip", "b.zip", "c.zip"] {
            env.put_object("assets", key).await;
        }

        let first = env.list_objects("assets", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let second = env.list_objects("assets", first.next_token).await.unwrap();
        assert_eq!(second.items, vec![ObjectSummary {
            key: "c.zip".to_string()
        }]);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_images_listed_once_per_tag() {
        let env = InMemoryEnvironment::default();
        env.push_image("repo", "sha256:aaa", &["v1", "v2"]).await;
        env.push_image("repo", "sha256:bbb", &[]).await;

        let page = env.list_images("repo", None).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[2], ImageId {
            digest: Some("sha256:bbb".to_string()),
            tag: None,
        });
    }

    #[tokio::test]
    async fn test_put_object_tag_replaces_same_key() {
        let env = InMemoryEnvironment::default();
        env.put_object("assets", "a.zip").await;
        env.put_object_tag("assets", "a.zip", Tag::new("k", "1"))
            .await
            .unwrap();
        env.put_object_tag("assets", "a.zip", Tag::new("k", "2"))
            .await
            .unwrap();

        let tags = env.object_tags("assets", "a.zip").await.unwrap();
        assert_eq!(tags, vec![Tag::new("k", "2")]);
        assert_eq!(env.mutations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_image_tag_moves_between_digests() {
        let env = InMemoryEnvironment::default();
        env.push_image("repo", "sha256:aaa", &["latest", "v1"]).await;
        env.push_image("repo", "sha256:bbb", &["v2"]).await;

        let manifest = env
            .get_image_manifests("repo", &["sha256:bbb".to_string()])
            .await
            .unwrap()
            .remove("sha256:bbb")
            .unwrap();
        env.put_image_tag("repo", "sha256:bbb", &manifest, "latest")
            .await
            .unwrap();

        assert_eq!(
            env.image_tags("repo", "sha256:aaa").await.unwrap(),
            vec!["v1".to_string()]
        );
        assert_eq!(
            env.image_tags("repo", "sha256:bbb").await.unwrap(),
            vec!["v2".to_string(), "latest".to_string()]
        );

        // Pushing an image with an existing tag takes the tag over as well.
        env.push_image("repo", "sha256:ccc", &["v1"]).await;
        assert!(env.image_tags("repo", "sha256:aaa").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_images_reports_missing_digests() {
        let env = InMemoryEnvironment::default();
        env.push_image("repo", "sha256:aaa", &["v1"]).await;

        let outcome = env
            .delete_images(
                "repo",
                &["sha256:aaa".to_string(), "sha256:zzz".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(outcome.deleted, vec!["sha256:aaa".to_string()]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "sha256:zzz");
    }

    #[tokio::test]
    async fn test_snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");

        let env = InMemoryEnvironment::default();
        env.add_stack("app", "{\"Resources\":{}}").await;
        env.put_object("assets", "abc.zip").await;
        env.save(&path).await.unwrap();

        let loaded = InMemoryEnvironment::load(&path).await.unwrap();
        assert_eq!(loaded.snapshot().await, env.snapshot().await);
    }
}
