use std::collections::HashSet;
use std::sync::Arc;

use crate::content_filter::{keep, ViewContext};
use crate::cursor::Cursor;
use crate::error::FeedResult;
use crate::fetcher::{PageFetcher, PageQuery};
use crate::models::{Page, Post};

/// Pulls raw pages until enough posts survive the content filter.
///
/// Server pages can be sparse once replies and hidden topics are removed, so a
/// single fetch-and-filter would often hand the view a near-empty page. The
/// aggregator keeps following `next` until `target` posts are collected or the
/// listing runs out.
#[derive(Clone)]
pub struct BackfillAggregator {
    fetcher: Arc<dyn PageFetcher>,
    target: usize,
}

impl BackfillAggregator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, target: usize) -> Self {
        Self { fetcher, target }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Appends filtered posts to `accumulated`, starting from `cursor`.
    ///
    /// Duplicate hashes within one call are dropped, first occurrence wins.
    /// Callers merging into an existing list must still deduplicate against
    /// it. A failed page fails the whole call and discards what this call had
    /// collected.
    pub async fn backfill(
        &self,
        query: &PageQuery,
        context: ViewContext,
        cursor: Cursor,
        mut accumulated: Vec<Post>,
    ) -> FeedResult<Page<Post>> {
        if query.is_unconstrained_filter() {
            return Ok(Page {
                items: accumulated,
                next: Cursor::Exhausted,
            });
        }

        let mut seen: HashSet<String> = accumulated.iter().map(|post| post.hash.clone()).collect();
        let mut visited: HashSet<Cursor> = HashSet::new();
        let mut cursor = cursor;
        let mut pages = 0usize;

        loop {
            if cursor.is_exhausted() {
                return Ok(Page {
                    items: accumulated,
                    next: Cursor::Exhausted,
                });
            }
            if !visited.insert(cursor) {
                tracing::warn!(?cursor, pages, "indexer repeated a cursor; treating listing as exhausted");
                return Ok(Page {
                    items: accumulated,
                    next: Cursor::Exhausted,
                });
            }

            let page = self.fetcher.fetch_page(query, cursor).await?;
            pages += 1;
            let raw = page.items.len();
            for post in page.items {
                if keep(&post, context) && seen.insert(post.hash.clone()) {
                    accumulated.push(post);
                }
            }
            tracing::debug!(
                ?cursor,
                raw,
                collected = accumulated.len(),
                next = ?page.next,
                "backfill page"
            );

            if accumulated.len() >= self.target || page.next.is_exhausted() {
                return Ok(Page {
                    items: accumulated,
                    next: page.next,
                });
            }
            cursor = page.next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::test_support::{page, post, posts, reply, ScriptedFetcher};
    use pretty_assertions::assert_eq;

    fn hashes(page: &Page<Post>) -> Vec<String> {
        page.items.iter().map(|post| post.hash.clone()).collect()
    }

    fn alice_filter() -> PageQuery {
        PageQuery::filter(Filter {
            posted_by: vec!["alice".into()],
            ..Filter::default()
        })
    }

    #[tokio::test]
    async fn sparse_first_page_recurses_to_target() {
        let mut first = vec![reply("r0", "x"), reply("r1", "x"), reply("r2", "x")];
        first.extend(posts("top", 2));
        let fetcher = Arc::new(ScriptedFetcher::by_cursor(vec![
            (Cursor::Start, page(first, Cursor::Offset(20))),
            (Cursor::Offset(20), page(posts("more", 18), Cursor::Exhausted)),
        ]));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(&alice_filter(), ViewContext::TopLevelFeed, Cursor::Start, Vec::new())
            .await
            .expect("backfill");

        assert_eq!(result.items.len(), 20);
        assert_eq!(result.next, Cursor::Exhausted);
        assert_eq!(fetcher.page_calls(), 2);
        assert_eq!(result.items[0].hash, "top0");
        assert_eq!(result.items[2].hash, "more0");
    }

    #[tokio::test]
    async fn all_replies_feed_terminates_empty() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_, cursor| {
            let offset = match cursor {
                Cursor::Offset(offset) => offset,
                _ => 0,
            };
            let items = (0..20)
                .map(|i| reply(&format!("r{}", offset + i), "root"))
                .collect();
            let next = if offset >= 100 {
                Cursor::Exhausted
            } else {
                Cursor::Offset(offset + 20)
            };
            Ok(page(items, next))
        }));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(&PageQuery::posts(), ViewContext::TopLevelFeed, Cursor::Start, Vec::new())
            .await
            .expect("backfill");

        assert!(result.items.is_empty());
        assert_eq!(result.next, Cursor::Exhausted);
        assert_eq!(fetcher.page_calls(), 6);
    }

    #[tokio::test]
    async fn repeated_next_cursor_stops_the_loop() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_, _| {
            Ok(page(vec![post("same")], Cursor::Offset(20)))
        }));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(&PageQuery::posts(), ViewContext::TopLevelFeed, Cursor::Start, Vec::new())
            .await
            .expect("backfill");

        assert_eq!(hashes(&result), vec!["same".to_string()]);
        assert_eq!(result.next, Cursor::Exhausted);
        assert_eq!(fetcher.page_calls(), 2);
    }

    #[tokio::test]
    async fn duplicates_across_pages_keep_first_order() {
        let fetcher = Arc::new(ScriptedFetcher::by_cursor(vec![
            (Cursor::Start, page(vec![post("a"), post("b")], Cursor::Offset(2))),
            (Cursor::Offset(2), page(vec![post("b"), post("c"), post("a")], Cursor::Exhausted)),
        ]));
        let aggregator = BackfillAggregator::new(fetcher, 20);

        let result = aggregator
            .backfill(&PageQuery::posts(), ViewContext::TopLevelFeed, Cursor::Start, vec![post("z")])
            .await
            .expect("backfill");

        assert_eq!(hashes(&result), vec!["z", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_filter_never_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_, _| Ok(page(posts("p", 5), Cursor::Exhausted))));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(
                &PageQuery::filter(Filter::default()),
                ViewContext::TopLevelFeed,
                Cursor::Start,
                Vec::new(),
            )
            .await
            .expect("backfill");

        assert!(result.items.is_empty());
        assert_eq!(result.next, Cursor::Exhausted);
        assert_eq!(fetcher.page_calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_cursor_returns_accumulated_without_fetching() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_, _| Ok(Page::empty())));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(&PageQuery::posts(), ViewContext::TopLevelFeed, Cursor::Exhausted, vec![post("kept")])
            .await
            .expect("backfill");

        assert_eq!(hashes(&result), vec!["kept"]);
        assert_eq!(fetcher.page_calls(), 0);
    }

    #[tokio::test]
    async fn failed_page_fails_the_call() {
        let fetcher = Arc::new(ScriptedFetcher::by_cursor(vec![(
            Cursor::Start,
            page(vec![reply("r", "x")], Cursor::Offset(20)),
        )]));
        let aggregator = BackfillAggregator::new(fetcher.clone(), 20);

        let result = aggregator
            .backfill(&PageQuery::posts(), ViewContext::TopLevelFeed, Cursor::Start, Vec::new())
            .await;

        assert!(result.is_err());
        assert_eq!(fetcher.page_calls(), 2);
    }
}
