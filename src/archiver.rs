//! Incremental subreddit fetch.
//!
//! Walks the search API backwards in time from the start of the run down to
//! the subreddit's checkpoint, one page at a time. Each following page asks
//! for posts no newer than the oldest post already seen.

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::Settings;
use crate::models::{ArchiveMapping, Checkpoints};
use crate::pushshift::{ApiError, RateLimitPolicy, SearchApi, SearchPage, SearchQuery};

pub struct Archiver<A> {
    api: A,
    page_size: u32,
    max_pages: Option<u32>,
    rate_limit: RateLimitPolicy,
}

impl<A: SearchApi> Archiver<A> {
    #[must_use]
    pub fn new(api: A, settings: &Settings) -> Self {
        Self {
            api,
            page_size: settings.page_size,
            max_pages: settings.max_pages,
            rate_limit: settings.rate_limit,
        }
    }

    /// Fetch everything posted to `forum` since its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the first search API error; nothing fetched so far is kept.
    pub async fn archive(
        &self,
        forum: &str,
        checkpoints: &mut Checkpoints,
    ) -> Result<ArchiveMapping, ApiError> {
        self.archive_at(forum, checkpoints, Utc::now().timestamp())
            .await
    }

    /// Same as [`Archiver::archive`] with an explicit start time.
    ///
    /// The checkpoint for `forum` is moved to `now` before the first request,
    /// whatever the outcome. Callers persist it only after a successful write.
    ///
    /// # Errors
    ///
    /// Returns the first search API error.
    pub async fn archive_at(
        &self,
        forum: &str,
        checkpoints: &mut Checkpoints,
        now: i64,
    ) -> Result<ArchiveMapping, ApiError> {
        let after = checkpoints.get(forum).copied().unwrap_or(0);
        checkpoints.insert(forum.to_string(), now);

        info!(subreddit = %forum, after, before = now, "Archiving /r/{forum}.");

        let mut data = ArchiveMapping::new();
        let mut before = now;
        let mut pages = 0u32;

        loop {
            let query = SearchQuery {
                subreddit: forum.to_string(),
                after,
                before,
                limit: self.page_size,
            };
            let page = self.api.search_submissions(&query).await?;
            pages += 1;

            let count = page.submissions.len();
            if page.total_results == Some(0) || count == 0 {
                debug!(subreddit = %forum, page = pages, before, "No more results");
                break;
            }

            let mut oldest = before;
            let mut added = 0usize;
            for submission in &page.submissions {
                oldest = oldest.min(submission.created_utc);
                if data
                    .insert(submission.id.clone(), submission.to_record())
                    .is_none()
                {
                    added += 1;
                }
            }

            debug!(
                subreddit = %forum,
                page = pages,
                count,
                added,
                before,
                oldest,
                total_results = ?page.total_results,
                "Fetched page"
            );

            // be nice to rate limits
            if !self.rate_limit.page_delay.is_zero() {
                sleep(self.rate_limit.page_delay).await;
            }

            if !self.has_more(&page) {
                break;
            }
            if self.max_pages.is_some_and(|max| pages >= max) {
                debug!(subreddit = %forum, pages, "Page limit reached");
                break;
            }
            let next = next_before(before, oldest);
            if next >= before || next <= after + 1 {
                break;
            }
            before = next;
        }

        info!(subreddit = %forum, pages, fetched = data.len(), "Fetch complete");
        Ok(data)
    }

    /// Whether the window below this page may still hold posts.
    ///
    /// Servers cap page sizes below what was asked for, so a reported total
    /// decides; the short-page rule only applies without one.
    fn has_more(&self, page: &SearchPage) -> bool {
        let count = page.submissions.len() as u64;
        match page.total_results {
            Some(total) => total > count,
            None => count >= u64::from(self.page_size),
        }
    }
}

/// Upper bound for the next page, given the oldest timestamp on this one.
///
/// The oldest second is asked for again, since more posts may share it;
/// duplicates collapse by id. When the whole page sits in that second the
/// bound moves past it.
fn next_before(before: i64, oldest: i64) -> i64 {
    if oldest + 1 < before {
        oldest + 1
    } else {
        oldest
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Submission;

    /// Replays canned pages and records every query.
    #[derive(Default)]
    struct FakeApi {
        pages: Mutex<VecDeque<Result<SearchPage, ApiError>>>,
        queries: Mutex<Vec<SearchQuery>>,
    }

    impl FakeApi {
        fn with_pages(pages: Vec<SearchPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().map(Ok).collect()),
                queries: Mutex::default(),
            }
        }

        fn queries(&self) -> Vec<SearchQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchApi for &FakeApi {
        async fn search_submissions(&self, query: &SearchQuery) -> Result<SearchPage, ApiError> {
            self.queries.lock().unwrap().push(query.clone());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SearchPage::default()))
        }
    }

    /// Answers queries from a fixed set of posts, newest first, returning at
    /// most `cap` per page no matter how many were asked for.
    struct DatasetApi {
        posts: Vec<Submission>,
        cap: usize,
        queries: Mutex<Vec<SearchQuery>>,
    }

    impl DatasetApi {
        fn new(posts: Vec<Submission>, cap: usize) -> Self {
            Self {
                posts,
                cap,
                queries: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl SearchApi for &DatasetApi {
        async fn search_submissions(&self, query: &SearchQuery) -> Result<SearchPage, ApiError> {
            self.queries.lock().unwrap().push(query.clone());
            let mut matching: Vec<Submission> = self
                .posts
                .iter()
                .filter(|p| p.created_utc > query.after && p.created_utc < query.before)
                .cloned()
                .collect();
            matching.sort_by_key(|p| Reverse(p.created_utc));
            let total = matching.len() as u64;
            matching.truncate(self.cap.min(query.limit as usize));
            Ok(page(Some(total), matching))
        }
    }

    fn submission(id: &str, created_utc: i64) -> Submission {
        Submission {
            id: id.to_string(),
            created_utc,
            score: 1,
            title: format!("title {id}"),
            selftext: None,
        }
    }

    fn page(total: Option<u64>, submissions: Vec<Submission>) -> SearchPage {
        SearchPage {
            total_results: total,
            submissions,
        }
    }

    fn settings(page_size: u32) -> Settings {
        Settings {
            page_size,
            ..Settings::for_testing()
        }
    }

    #[tokio::test]
    async fn test_first_run_queries_from_zero() {
        let api = FakeApi::with_pages(vec![page(Some(1), vec![submission("a", 50)])]);
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        let queries = api.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].after, 0);
        assert_eq!(queries[0].before, 100);
        assert_eq!(queries[0].limit, 2000);
        assert_eq!(queries[0].subreddit, "rust");
        assert_eq!(data.len(), 1);
        assert_eq!(data["a"].title, "title a");
        assert_eq!(data["a"].text, "");
        assert_eq!(checkpoints["rust"], 100);
    }

    #[tokio::test]
    async fn test_archive_uses_wall_clock() {
        let api = FakeApi::with_pages(vec![page(Some(0), vec![])]);
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::new();
        let started = Utc::now().timestamp();

        archiver.archive("rust", &mut checkpoints).await.unwrap();

        assert!(checkpoints["rust"] >= started);
        assert_eq!(api.queries()[0].before, checkpoints["rust"]);
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint() {
        let api = FakeApi::with_pages(vec![page(Some(0), vec![])]);
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::from([("rust".to_string(), 40)]);

        archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(api.queries()[0].after, 40);
        assert_eq!(checkpoints["rust"], 100);
    }

    #[tokio::test]
    async fn test_zero_total_results_stops_immediately() {
        // A second page is queued to prove it is never requested.
        let api = FakeApi::with_pages(vec![
            page(Some(0), vec![]),
            page(Some(1), vec![submission("late", 10)]),
        ]);
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("empty", &mut checkpoints, 100)
            .await
            .unwrap();

        assert!(data.is_empty());
        assert_eq!(api.queries().len(), 1);
        assert_eq!(checkpoints["empty"], 100);
    }

    #[tokio::test]
    async fn test_paginates_backwards_until_short_page() {
        let api = FakeApi::with_pages(vec![
            page(None, vec![submission("e", 90), submission("d", 80)]),
            page(None, vec![submission("c", 70), submission("b", 60)]),
            page(None, vec![submission("a", 50)]),
        ]);
        let archiver = Archiver::new(&api, &settings(2));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        let befores: Vec<i64> = api.queries().iter().map(|q| q.before).collect();
        assert_eq!(befores, vec![100, 81, 61]);
        assert_eq!(data.len(), 5);
        assert_eq!(data["a"].time, 50);
    }

    #[tokio::test]
    async fn test_stops_when_page_holds_all_results() {
        let api = FakeApi::with_pages(vec![page(
            Some(2),
            vec![submission("b", 60), submission("a", 50)],
        )]);
        let archiver = Archiver::new(&api, &settings(2));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(api.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_respects_max_pages() {
        let api = FakeApi::with_pages(vec![
            page(None, vec![submission("d", 80), submission("c", 70)]),
            page(None, vec![submission("b", 60), submission("a", 50)]),
        ]);
        let archiver = Archiver::new(
            &api,
            &Settings {
                max_pages: Some(1),
                ..settings(2)
            },
        );
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(api.queries().len(), 1);
        assert_eq!(data.len(), 2);
    }

    #[tokio::test]
    async fn test_stops_when_timestamps_do_not_advance() {
        let api = FakeApi::with_pages(vec![
            page(None, vec![submission("b", 100), submission("a", 100)]),
            page(None, vec![submission("x", 1)]),
        ]);
        let archiver = Archiver::new(&api, &settings(2));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(api.queries().len(), 1);
        assert_eq!(data.len(), 2);
    }

    #[tokio::test]
    async fn test_error_propagates_but_checkpoint_moves() {
        let api = FakeApi {
            pages: Mutex::new(VecDeque::from([Err(ApiError::RateLimited { attempts: 1 })])),
            queries: Mutex::default(),
        };
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::from([("rust".to_string(), 5)]);

        let result = archiver.archive_at("rust", &mut checkpoints, 100).await;

        assert!(matches!(result, Err(ApiError::RateLimited { .. })));
        assert_eq!(checkpoints["rust"], 100);
    }

    #[tokio::test]
    async fn test_keeps_paging_when_server_caps_page_size() {
        let api = DatasetApi::new(
            vec![submission("c", 90), submission("b", 80), submission("a", 70)],
            2,
        );
        let archiver = Archiver::new(&api, &settings(2000));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(api.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_posts_sharing_boundary_second_are_all_fetched() {
        let api = DatasetApi::new(
            vec![
                submission("c", 90),
                submission("b", 80),
                submission("b2", 80),
                submission("a", 70),
            ],
            2,
        );
        let archiver = Archiver::new(&api, &settings(2));
        let mut checkpoints = Checkpoints::new();

        let data = archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["a", "b", "b2", "c"]);
        let befores: Vec<i64> = api.queries.lock().unwrap().iter().map(|q| q.before).collect();
        assert_eq!(befores, vec![100, 81, 80]);
    }

    #[test]
    fn test_next_before() {
        assert_eq!(next_before(100, 80), 81);
        assert_eq!(next_before(81, 80), 80);
        assert_eq!(next_before(100, 100), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_page_delay_after_each_page() {
        let api = FakeApi::with_pages(vec![
            page(None, vec![submission("b", 60), submission("a", 50)]),
            page(None, vec![submission("z", 10)]),
        ]);
        let archiver = Archiver::new(
            &api,
            &Settings {
                rate_limit: RateLimitPolicy {
                    page_delay: Duration::from_secs(1),
                    ..RateLimitPolicy::default()
                },
                ..settings(2)
            },
        );
        let mut checkpoints = Checkpoints::new();
        let started = tokio::time::Instant::now();

        archiver
            .archive_at("rust", &mut checkpoints, 100)
            .await
            .unwrap();

        assert_eq!(api.queries().len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
