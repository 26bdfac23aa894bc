//! Continuation-token pagination.

use crate::client::Page;
use crate::error::ClientError;
use std::future::Future;

/// Drive a paged listing to exhaustion.
///
/// Pages are requested one at a time, each only after the previous one has
/// completed, and their items are returned in the order the store produced
/// them. The first failing page fails the whole listing.
pub async fn collect_pages<T, F, Fut>(
    operation: &'static str,
    mut fetch: F,
) -> Result<Vec<T>, ClientError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ClientError>>,
{
    let mut items = Vec::new();
    let mut next_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = fetch(next_token.take()).await?;
        pages += 1;
        items.extend(page.items);

        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    tracing::trace!(operation, pages, items = items.len(), "Listing exhausted");
    Ok(items)
}
