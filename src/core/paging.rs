//! Cursor-based pagination over list endpoints.
//!
//! A [`PagedSequence`] wraps a "fetch one page" function. It can be consumed
//! as a stream of items, as a stream of raw pages, or in explicit
//! fixed-size reads with [`PagedSequence::read_page`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::http_client::{ApiRequest, HttpClient};

/// One page of results. `next_page_token` is `None` on the last page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token: next_page_token.filter(|token| !token.is_empty()),
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Fetches the page starting at the given token, with the given page size.
pub type FetchPage<T> =
    Arc<dyn Fn(Option<String>, usize) -> BoxFuture<'static, Result<Page<T>>> + Send + Sync>;

/// A lazy, single-owner cursor over a paginated collection.
///
/// [`items`](Self::items) and [`pages`](Self::pages) start a fresh traversal
/// from the initial page token every time they are called.
/// [`read_page`](Self::read_page) advances a cursor owned by this object and
/// resumes where the previous read stopped.
pub struct PagedSequence<T> {
    fetch: FetchPage<T>,
    page_size: usize,
    max_page_size: usize,
    start_token: Option<String>,
    buffered: VecDeque<T>,
    cursor_token: Option<String>,
    exhausted: bool,
}

impl<T> fmt::Debug for PagedSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedSequence")
            .field("page_size", &self.page_size)
            .field("max_page_size", &self.max_page_size)
            .field("start_token", &self.start_token)
            .field("buffered", &self.buffered.len())
            .field("cursor_token", &self.cursor_token)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl<T: Send + 'static> PagedSequence<T> {
    /// Fails with [`Error::InvalidArgument`] unless `0 < page_size <= max_page_size`.
    pub fn new(
        fetch: FetchPage<T>,
        page_size: usize,
        max_page_size: usize,
        page_token: Option<String>,
    ) -> Result<Self> {
        validate_page_size(page_size, max_page_size)?;
        let start_token = page_token.filter(|token| !token.is_empty());
        Ok(Self {
            fetch,
            page_size,
            max_page_size,
            cursor_token: start_token.clone(),
            start_token,
            buffered: VecDeque::new(),
            exhausted: false,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// All pages, in order, from the initial page token.
    pub fn pages(&self) -> BoxStream<'static, Result<Page<T>>> {
        let fetch = Arc::clone(&self.fetch);
        let page_size = self.page_size;

        // `None` once the last page has been yielded.
        let state: Option<Option<String>> = Some(self.start_token.clone());
        stream::try_unfold(state, move |state| {
            let fetch = Arc::clone(&fetch);
            async move {
                let Some(token) = state else {
                    return Ok::<_, Error>(None);
                };
                debug!(page_token = ?token, page_size, "fetching page");
                let page = fetch(token, page_size).await?;
                let next = page.next_page_token.clone().map(Some);
                Ok(Some((page, next)))
            }
        })
        .boxed()
    }

    /// All items across all pages, in page order then in-page order.
    pub fn items(&self) -> BoxStream<'static, Result<T>> {
        self.pages()
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok::<T, Error>)))
            .try_flatten()
            .boxed()
    }

    /// Reads up to `count` items, fetching as many backend pages as needed.
    ///
    /// Backend requests never ask for more than the items still missing, so
    /// every read ends on a backend page boundary and the returned token
    /// resumes exactly where this read stopped. Returns fewer than `count`
    /// items, with a `None` token, only when the collection is exhausted.
    pub async fn read_page(&mut self, count: usize) -> Result<Page<T>> {
        validate_page_size(count, self.max_page_size)?;

        let mut items = Vec::with_capacity(count);
        loop {
            while items.len() < count {
                match self.buffered.pop_front() {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
            if items.len() == count || self.exhausted {
                break;
            }

            let page_size = self.page_size.min(count - items.len());
            debug!(page_token = ?self.cursor_token, page_size, "fetching page");
            let page = match (self.fetch)(self.cursor_token.clone(), page_size).await {
                Ok(page) => page,
                Err(err) => {
                    // Keep what was already taken so a later read does not lose it.
                    for item in items.into_iter().rev() {
                        self.buffered.push_front(item);
                    }
                    return Err(err);
                }
            };
            self.cursor_token = page.next_page_token;
            self.exhausted = self.cursor_token.is_none();
            self.buffered.extend(page.items);
        }

        Ok(Page {
            items,
            next_page_token: self.cursor_token.clone(),
        })
    }
}

/// Query parameter names a list endpoint uses for paging.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListParams {
    pub page_size: &'static str,
    pub page_token: &'static str,
}

/// A [`FetchPage`] that GETs `path` and converts each decoded response into a page.
pub(crate) fn list_endpoint<R, T, F>(
    client: HttpClient,
    cancel: CancellationToken,
    path: String,
    params: ListParams,
    into_page: F,
) -> FetchPage<T>
where
    R: DeserializeOwned + Send + 'static,
    T: Send + 'static,
    F: Fn(R) -> Page<T> + Send + Sync + 'static,
{
    let into_page = Arc::new(into_page);
    Arc::new(move |token: Option<String>, size: usize| {
        let client = client.clone();
        let cancel = cancel.clone();
        let into_page = Arc::clone(&into_page);
        let mut request = ApiRequest::get(path.clone()).query(params.page_size, size);
        if let Some(token) = token {
            request = request.query(params.page_token, token);
        }
        async move {
            let response: R = client.send_and_deserialize(&request, &cancel).await?;
            Ok(into_page(response))
        }
        .boxed()
    })
}

fn validate_page_size(size: usize, max_page_size: usize) -> Result<()> {
    if size == 0 || size > max_page_size {
        return Err(Error::invalid_argument(format!(
            "page size must be between 1 and {}, got {}",
            max_page_size, size
        )));
    }
    Ok(())
}
