//! Paginated retrieval on top of a [`ContentClient`].

use tracing::debug;

use crate::contract::{ContentClient, PageCursor, PageRequest, PaginationStyle};
use crate::error::ApiError;
use crate::model::{Item, ItemKind};

/// Field projection and page settings shared by every request of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFetcher {
    fields: Vec<String>,
    page_size: u32,
    pagination: PaginationStyle,
}

impl ItemFetcher {
    pub fn new(fields: Vec<String>, page_size: u32, pagination: PaginationStyle) -> Self {
        Self {
            fields,
            page_size: page_size.max(1),
            pagination,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub async fn fetch_item(
        &self,
        client: &dyn ContentClient,
        id: &str,
        kind: ItemKind,
    ) -> Result<Item, ApiError> {
        client.get_item(id, kind, &self.fields).await
    }

    /// Every child of `folder_id`, all pages concatenated in server order.
    ///
    /// Any page failing fails the whole listing; partial results are discarded.
    pub async fn fetch_folder_children(
        &self,
        client: &dyn ContentClient,
        folder_id: &str,
    ) -> Result<Vec<Item>, ApiError> {
        let mut items = Vec::new();
        let mut cursor = self.pagination.first_cursor();
        loop {
            let page = client
                .list_folder_children(
                    folder_id,
                    &self.fields,
                    PageRequest {
                        cursor: cursor.clone(),
                        limit: self.page_size,
                    },
                )
                .await?;
            debug!(
                action = "RETRIEVE_FOLDER_ITEMS_PAGE",
                folder_id,
                cursor = ?cursor,
                entries = page.entries.len(),
                total_count = ?page.total_count,
                "Retrieved folder page"
            );
            items.extend(page.entries);

            match page.next {
                Some(next) if next != cursor => cursor = next,
                Some(_) => {
                    // A server returning the same cursor again would loop forever.
                    debug!(folder_id, "Page cursor did not advance, stopping");
                    break;
                }
                None => break,
            }
        }
        Ok(items)
    }
}

/// Computes the cursor following an offset page. Used by client implementations.
pub fn next_offset(offset: u64, returned: usize, total_count: u64) -> Option<PageCursor> {
    let next = offset + returned as u64;
    (returned > 0 && next < total_count).then_some(PageCursor::Offset(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockContentClient, Page};
    use mockall::predicate::*;

    fn file(id: &str) -> Item {
        Item::new(id, ItemKind::File, id)
    }

    #[tokio::test]
    async fn offset_pages_are_concatenated() {
        let mut client = MockContentClient::new();
        client
            .expect_list_folder_children()
            .with(eq("100"), always(), eq(PageRequest { cursor: PageCursor::Offset(0), limit: 2 }))
            .times(1)
            .returning(|_, _, _| {
                Ok(Page {
                    entries: vec![file("1"), file("2")],
                    next: next_offset(0, 2, 3),
                    total_count: Some(3),
                })
            });
        client
            .expect_list_folder_children()
            .with(eq("100"), always(), eq(PageRequest { cursor: PageCursor::Offset(2), limit: 2 }))
            .times(1)
            .returning(|_, _, _| {
                Ok(Page {
                    entries: vec![file("3")],
                    next: next_offset(2, 1, 3),
                    total_count: Some(3),
                })
            });

        let fetcher = ItemFetcher::new(vec!["id".into()], 2, PaginationStyle::Offset);
        let items = fetcher.fetch_folder_children(&client, "100").await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn marker_pages_follow_next_marker() {
        let mut client = MockContentClient::new();
        client
            .expect_list_folder_children()
            .returning(|_, _, page| match page.cursor {
                PageCursor::Marker(None) => Ok(Page {
                    entries: vec![file("a")],
                    next: Some(PageCursor::Marker(Some("m1".into()))),
                    total_count: None,
                }),
                PageCursor::Marker(Some(ref m)) if m == "m1" => Ok(Page {
                    entries: vec![file("b")],
                    next: None,
                    total_count: None,
                }),
                other => panic!("unexpected cursor {other:?}"),
            });

        let fetcher = ItemFetcher::new(vec![], 1000, PaginationStyle::Marker);
        let items = fetcher.fetch_folder_children(&client, "0").await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn page_failure_fails_listing() {
        let mut client = MockContentClient::new();
        client.expect_list_folder_children().returning(|_, _, _| {
            Err(ApiError::RateLimited {
                code: None,
                message: "slow down".into(),
                retry_after: None,
            })
        });
        let fetcher = ItemFetcher::new(vec![], 10, PaginationStyle::Offset);
        let err = fetcher
            .fetch_folder_children(&client, "0")
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[test]
    fn next_offset_stops_at_total() {
        assert_eq!(next_offset(0, 1000, 2500), Some(PageCursor::Offset(1000)));
        assert_eq!(next_offset(2000, 500, 2500), None);
        assert_eq!(next_offset(0, 0, 10), None);
    }
}
