//! ASP.NET postback pagination
//!
//! Page 1 of a grid comes from a plain GET. Every following page is a POST
//! that replays the hidden form state of the previous response, with
//! `__EVENTTARGET` naming the grid and `__EVENTARGUMENT` set to `Page$N`.
//! The state values are opaque: they are copied, never interpreted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::crawling::dto::Page;
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::http_client::PageFetcher;

/// Upper bound on pages walked for one grid
pub const MAX_PAGES: u32 = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostbackState {
    pub view_state: String,
    pub view_state_generator: String,
    pub event_validation: String,
    pub event_target: String,
    pub current_page: u32,
    pub total_pages: u32,
}

impl PostbackState {
    /// Builds the state from a page's hidden inputs; `None` without a `__VIEWSTATE`
    #[must_use]
    pub fn from_hidden_fields(fields: &HashMap<String, String>, event_target: &str, total_pages: u32) -> Option<Self> {
        let view_state = fields.get("__VIEWSTATE")?.clone();
        Some(Self {
            view_state,
            view_state_generator: fields.get("__VIEWSTATEGENERATOR").cloned().unwrap_or_default(),
            event_validation: fields.get("__EVENTVALIDATION").cloned().unwrap_or_default(),
            event_target: event_target.to_string(),
            current_page: 1,
            total_pages,
        })
    }

    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    /// Form body requesting `page`
    #[must_use]
    pub fn to_form(&self, page: u32) -> Vec<(String, String)> {
        let mut form = vec![
            ("__EVENTTARGET".to_string(), self.event_target.clone()),
            ("__EVENTARGUMENT".to_string(), format!("Page${page}")),
            ("__VIEWSTATE".to_string(), self.view_state.clone()),
        ];
        if !self.view_state_generator.is_empty() {
            form.push(("__VIEWSTATEGENERATOR".to_string(), self.view_state_generator.clone()));
        }
        if !self.event_validation.is_empty() {
            form.push(("__EVENTVALIDATION".to_string(), self.event_validation.clone()));
        }
        form
    }
}

/// Walks every page after `first`, concatenating items in page order
///
/// Stops at the last page, on cancellation, at [`MAX_PAGES`], or when a page
/// comes back without postback state. A failed page fetch fails the walk.
pub async fn collect_pages<T, F>(
    fetcher: &dyn PageFetcher,
    cancel: &CancellationToken,
    path: &str,
    first: Page<T>,
    parse: F,
) -> DomainResult<Vec<T>>
where
    F: Fn(&[u8]) -> DomainResult<Page<T>>,
{
    let mut items = first.items;
    let mut state = first.postback;

    while let Some(current) = state.take() {
        if !current.has_next() {
            break;
        }
        if cancel.is_cancelled() {
            debug!("Pagination of {} stopped at page {} by cancellation", path, current.current_page);
            break;
        }
        let next_page = current.current_page + 1;
        if next_page > MAX_PAGES {
            warn!("Pagination of {} exceeded {} pages, stopping", path, MAX_PAGES);
            break;
        }

        let body = fetcher
            .post_form(path, &current.to_form(next_page))
            .await
            .map_err(|e| e.with_context("page", next_page.to_string()))?;
        let page = parse(&body)?;
        if page.items.is_empty() {
            return Err(DomainError::parsing_temporary("page", format!("{path} page {next_page} is empty")));
        }
        items.extend(page.items);

        // Pagers only link a window of pages, so the total can grow as we advance
        state = page.postback.map(|mut s| {
            s.current_page = next_page;
            s.total_pages = s.total_pages.max(current.total_pages);
            s
        });
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Script {
        posts: Mutex<Vec<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl PageFetcher for Script {
        async fn get(&self, _path: &str) -> DomainResult<Vec<u8>> {
            Err(DomainError::business("GET not expected"))
        }

        async fn post_form(&self, _path: &str, form: &[(String, String)]) -> DomainResult<Vec<u8>> {
            let mut posts = self.posts.lock().unwrap();
            posts.push(form.to_vec());
            let page = posts.len() + 1;
            Ok(format!("{page}").into_bytes())
        }
    }

    fn state(total: u32) -> PostbackState {
        PostbackState {
            view_state: "vs".into(),
            event_target: "grid".into(),
            current_page: 1,
            total_pages: total,
            ..PostbackState::default()
        }
    }

    fn parse(body: &[u8]) -> DomainResult<Page<u32>> {
        let page: u32 = String::from_utf8_lossy(body).parse().unwrap();
        Ok(Page {
            items: vec![page * 10],
            postback: Some(state(3)),
        })
    }

    #[test]
    fn form_replays_state_verbatim() {
        let mut s = state(4);
        s.event_validation = "ev/+=".into();
        let form = s.to_form(2);
        assert!(form.contains(&("__EVENTARGUMENT".to_string(), "Page$2".to_string())));
        assert!(form.contains(&("__EVENTVALIDATION".to_string(), "ev/+=".to_string())));
        assert!(!form.iter().any(|(k, _)| k == "__VIEWSTATEGENERATOR"));
    }

    #[tokio::test]
    async fn walks_until_last_page() {
        let fetcher = Script { posts: Mutex::new(Vec::new()) };
        let first = Page {
            items: vec![10],
            postback: Some(state(3)),
        };
        let items = collect_pages(&fetcher, &CancellationToken::new(), "/Schedule.aspx", first, parse)
            .await
            .unwrap();
        assert_eq!(items, vec![10, 20, 30]);

        let posts = fetcher.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1][1].1, "Page$3");
    }

    #[tokio::test]
    async fn single_page_makes_no_requests() {
        let fetcher = Script { posts: Mutex::new(Vec::new()) };
        let items = collect_pages(&fetcher, &CancellationToken::new(), "/x", Page::single(vec![1]), parse)
            .await
            .unwrap();
        assert_eq!(items, vec![1]);
        assert!(fetcher.posts.lock().unwrap().is_empty());
    }
}
