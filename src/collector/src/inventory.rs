//! Inventory collection: builds the reference corpus from deployed stacks.
//!
//! ## Phases
//!
//! 1. **List stacks**: follow continuation tokens until the listing is exhausted
//! 2. **Fetch templates**: retrieve the current template body of every stack
//!    that is still deployed
//! 3. **Build corpus**: concatenate all bodies into one immutable corpus
//!
//! The corpus must be complete. Any failure in phase 1 or 2 fails the whole
//! collection run, since classifying against a partial corpus could mark live
//! artifacts as isolated.

use crate::client::{StackInventory, StackSummary};
use crate::corpus::ReferenceCorpus;
use crate::error::{GcError, GcResult};
use crate::pagination::collect_pages;
use std::sync::Arc;

pub struct InventoryCollector {
    stacks: Arc<dyn StackInventory>,
}

impl InventoryCollector {
    pub fn new(stacks: Arc<dyn StackInventory>) -> Self {
        Self { stacks }
    }

    /// List every stack that is currently deployed.
    ///
    /// Stacks in `DELETE_COMPLETE` are returned by the listing but no longer
    /// reference anything, so they are dropped here.
    pub async fn list_active_stacks(&self) -> GcResult<Vec<StackSummary>> {
        let all = collect_pages("ListStacks", |token| self.stacks.list_stacks(token))
            .await
            .map_err(GcError::StackListing)?;
        let total = all.len();

        let active: Vec<StackSummary> = all.into_iter().filter(|s| !s.is_deleted()).collect();

        tracing::debug!(
            total_stacks = total,
            active_stacks = active.len(),
            "Listed stacks"
        );

        Ok(active)
    }

    /// Build the reference corpus from every active stack's template.
    pub async fn collect(&self) -> GcResult<ReferenceCorpus> {
        let stacks = self.list_active_stacks().await?;

        let mut templates = Vec::with_capacity(stacks.len());
        for stack in &stacks {
            let identifier = stack.identifier();
            let body = self
                .stacks
                .get_template(identifier)
                .await
                .map_err(|source| GcError::TemplateFetch {
                    stack: identifier.to_string(),
                    source,
                })?;

            tracing::trace!(
                stack = %identifier,
                template_bytes = body.len(),
                "Fetched template"
            );
            templates.push(body);
        }

        let corpus = ReferenceCorpus::from_templates(templates);

        tracing::info!(
            stacks = corpus.template_count(),
            corpus_bytes = corpus.len(),
            "Built reference corpus"
        );

        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryEnvironment, MockStackInventory, Page};
    use crate::error::ClientError;

    fn stack(name: &str, status: &str) -> StackSummary {
        StackSummary {
            stack_id: Some(format!("id-{name}")),
            stack_name: name.to_string(),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_collects_templates_across_pages() {
        let env = InMemoryEnvironment::default().with_page_size(1);
        env.add_stack("a", "alpha-asset").await;
        env.add_stack("b", "beta-asset").await;
        env.add_stack("c", "gamma-asset").await;

        let collector = InventoryCollector::new(Arc::new(env));
        let corpus = collector.collect().await.unwrap();

        assert_eq!(corpus.template_count(), 3);
        assert!(corpus.contains("alpha-asset"));
        assert!(corpus.contains("gamma-asset"));
    }

    #[tokio::test]
    async fn test_deleted_stacks_are_skipped() {
        let mut mock = MockStackInventory::new();
        mock.expect_list_stacks().times(1).returning(|_| {
            Ok(Page::last(vec![
                stack("live", "UPDATE_COMPLETE"),
                stack("gone", "DELETE_COMPLETE"),
            ]))
        });
        mock.expect_get_template()
            .withf(|id: &str| id == "id-live")
            .times(1)
            .returning(|_| Ok("live-template".to_string()));

        let collector = InventoryCollector::new(Arc::new(mock));
        let corpus = collector.collect().await.unwrap();

        assert_eq!(corpus.template_count(), 1);
        assert!(corpus.contains("live-template"));
    }

    #[tokio::test]
    async fn test_template_failure_aborts_collection() {
        let mut mock = MockStackInventory::new();
        mock.expect_list_stacks().returning(|_| {
            Ok(Page::last(vec![
                stack("a", "CREATE_COMPLETE"),
                stack("b", "CREATE_COMPLETE"),
            ]))
        });
        mock.expect_get_template()
            .withf(|id: &str| id == "id-a")
            .returning(|_| Ok("template-a".to_string()));
        mock.expect_get_template()
            .withf(|id: &str| id == "id-b")
            .returning(|_| Err(ClientError::request("GetTemplate", "access denied")));

        let collector = InventoryCollector::new(Arc::new(mock));
        let err = collector.collect().await.unwrap_err();

        assert!(matches!(err, GcError::TemplateFetch { ref stack, .. } if stack == "id-b"));
        assert!(err.is_inventory_failure());
    }

    #[tokio::test]
    async fn test_listing_failure_on_later_page_aborts() {
        let mut mock = MockStackInventory::new();
        mock.expect_list_stacks()
            .withf(|token: &Option<String>| token.is_none())
            .returning(|_| {
                Ok(Page {
                    items: vec![stack("a", "CREATE_COMPLETE")],
                    next_token: Some("page-2".to_string()),
                })
            });
        mock.expect_list_stacks()
            .withf(|token: &Option<String>| token.as_deref() == Some("page-2"))
            .returning(|_| Err(ClientError::request("ListStacks", "throttled")));
        mock.expect_get_template().never();

        let collector = InventoryCollector::new(Arc::new(mock));
        let err = collector.collect().await.unwrap_err();

        assert!(matches!(err, GcError::StackListing(_)));
    }
}
