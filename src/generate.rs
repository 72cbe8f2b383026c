//! Decides what gets rendered and with which data. [`Generator`] produces the
//! props for the list page, the set of post slugs to pre-render, and the data
//! for a single post page. [`DetailState`] and [`Stamped`] model the
//! lifecycle of pages rendered after the build: post pages generated on first
//! request, and the list page refreshed once it goes stale.

use crate::post::{PageOfPosts, PostDetail};
use crate::prismic::{Client, Result, Transport};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How many posts the list page shows before "load more".
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// How long a rendered list page is served before it's refreshed.
pub const DEFAULT_REVALIDATE: Duration = Duration::from_secs(60);

/// The data the list page is rendered from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListProps {
    #[serde(rename = "postsPagination")]
    pub posts_pagination: PageOfPosts,

    #[serde(rename = "revalidate", serialize_with = "as_seconds")]
    pub revalidate: Duration,
}

fn as_seconds<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// The post pages rendered ahead of time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticPaths {
    pub slugs: Vec<String>,

    /// Whether slugs outside `slugs` are generated on request rather than
    /// treated as missing.
    pub fallback: bool,
}

impl StaticPaths {
    pub fn contains(&self, slug: &str) -> bool {
        self.slugs.iter().any(|s| s == slug)
    }
}

/// The outcome of generating one post page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetailPage {
    Ready(PostDetail),
    NotFound,
}

/// Fetches everything the pages are rendered from.
pub struct Generator<T> {
    client: Arc<Client<T>>,
    page_size: u32,
    revalidate: Duration,
}

impl<T> Clone for Generator<T> {
    fn clone(&self) -> Self {
        Generator {
            client: Arc::clone(&self.client),
            page_size: self.page_size,
            revalidate: self.revalidate,
        }
    }
}

impl<T: Transport> Generator<T> {
    pub fn new(client: Arc<Client<T>>, page_size: u32, revalidate: Duration) -> Generator<T> {
        Generator {
            client,
            page_size,
            revalidate,
        }
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn revalidate(&self) -> Duration {
        self.revalidate
    }

    /// Fetches the first page of posts for the list page. `reference` selects
    /// a preview; `None` renders published content.
    pub async fn list_page(&self, reference: Option<&str>) -> Result<ListProps> {
        let posts_pagination = self.client.list_posts(1, self.page_size, reference).await?;
        debug!(
            "list page: {} posts, more: {}",
            posts_pagination.results.len(),
            posts_pagination.has_more()
        );
        Ok(ListProps {
            posts_pagination,
            revalidate: self.revalidate,
        })
    }

    /// Enumerates one path per known post.
    pub async fn static_paths(&self) -> Result<StaticPaths> {
        let slugs = self.client.list_all_uids().await?;
        info!("{} post pages to pre-render", slugs.len());
        Ok(StaticPaths {
            slugs,
            fallback: true,
        })
    }

    /// Fetches the data for one post page. A slug with no post yields
    /// [`DetailPage::NotFound`]; any other failure is returned as an error.
    pub async fn detail_page(&self, slug: &str) -> Result<DetailPage> {
        match self.client.get_post_by_uid(slug).await {
            Ok(post) => Ok(DetailPage::Ready(post)),
            Err(e) if e.is_not_found() => {
                debug!("no post for slug `{}`", slug);
                Ok(DetailPage::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

/// The lifecycle of a post page that wasn't rendered at build time.
///
/// `Unbuilt -> Generating -> Ready | NotFound`. `Ready` and `NotFound` are
/// terminal. A generation that fails outright returns to `Unbuilt` so the
/// next request can try again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetailState<T> {
    Unbuilt,
    Generating,
    Ready(T),
    NotFound,
}

impl<T> Default for DetailState<T> {
    fn default() -> Self {
        DetailState::Unbuilt
    }
}

impl<T> DetailState<T> {
    /// Moves `Unbuilt` to `Generating`. Returns whether the caller should
    /// start generating; `false` means someone else already has (or finished).
    pub fn begin(&mut self) -> bool {
        match self {
            DetailState::Unbuilt => {
                *self = DetailState::Generating;
                true
            }
            _ => false,
        }
    }

    /// Moves `Generating` to `Ready` (`Some`) or `NotFound` (`None`). Returns
    /// `false` and leaves the state alone if generation wasn't in progress.
    pub fn finish(&mut self, page: Option<T>) -> bool {
        match self {
            DetailState::Generating => {
                *self = match page {
                    Some(page) => DetailState::Ready(page),
                    None => DetailState::NotFound,
                };
                true
            }
            _ => false,
        }
    }

    /// Moves `Generating` back to `Unbuilt` after a failed generation.
    pub fn abandon(&mut self) {
        if let DetailState::Generating = self {
            *self = DetailState::Unbuilt;
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DetailState::Ready(_) | DetailState::NotFound)
    }
}

/// A rendered value and when it was built. Once older than the revalidation
/// interval it is stale: it keeps being served while one refresh runs in the
/// background.
#[derive(Clone, Debug)]
pub struct Stamped<T> {
    value: T,
    built_at: Instant,
    refreshing: bool,
}

impl<T> Stamped<T> {
    pub fn new(value: T, built_at: Instant) -> Stamped<T> {
        Stamped {
            value,
            built_at,
            refreshing: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn is_stale(&self, interval: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.built_at) >= interval
    }

    /// Claims the refresh of a stale value. Returns `false` if the value is
    /// fresh or a refresh is already running.
    pub fn begin_refresh(&mut self, interval: Duration, now: Instant) -> bool {
        if self.refreshing || !self.is_stale(interval, now) {
            return false;
        }
        self.refreshing = true;
        true
    }

    /// Replaces the value with a freshly built one.
    pub fn replace(&mut self, value: T, built_at: Instant) {
        self.value = value;
        self.built_at = built_at;
        self.refreshing = false;
    }

    /// Releases a refresh claim without replacing the value. The stale value
    /// stays and the next request tries again.
    pub fn refresh_failed(&mut self) {
        self.refreshing = false;
    }
}
