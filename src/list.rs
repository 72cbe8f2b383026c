//! The paginated post list. [`PostListView`] starts from the first page
//! rendered at build time and grows one page at a time through
//! [`PostListView::load_more`]. What gets displayed is always derived from a
//! [`ListSnapshot`].

use crate::post::{PageOfPosts, PostSummary};
use crate::prismic::{Client, Error, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// The default bound on a single "load more" fetch.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// The result of a [`PostListView::load_more`] call.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The next page was appended; carries how many posts it held.
    Loaded(usize),

    /// There is no next page. Nothing was fetched.
    Exhausted,

    /// Another load was already in flight. This call was ignored.
    Busy,

    /// The fetch failed. The cursor is kept so the load can be retried.
    Failed(Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Status {
    Idle,
    Loading,
    Failed(String),
}

#[derive(Debug)]
struct ListState {
    page: PageOfPosts,
    status: Status,
}

/// Everything needed to draw the list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListSnapshot {
    /// One row per post, in order.
    pub rows: Vec<PostSummary>,

    /// Whether the "load more" control is shown: exactly when a next page
    /// exists.
    pub show_load_more: bool,

    pub loading: bool,

    /// The last load's failure, if it failed.
    pub error: Option<String>,

    /// Whether a retry control should accompany `error`.
    pub can_retry: bool,
}

/// Shared handle to the list state. Clones observe and drive the same list.
#[derive(Clone, Debug)]
pub struct PostListView {
    state: Arc<Mutex<ListState>>,
    timeout: Duration,
}

impl PostListView {
    pub fn new(initial: PageOfPosts, timeout: Duration) -> PostListView {
        PostListView {
            state: Arc::new(Mutex::new(ListState {
                page: initial,
                status: Status::Idle,
            })),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the page behind the current cursor and appends it. While one
    /// call is in flight, further calls return [`LoadOutcome::Busy`] without
    /// fetching.
    pub async fn load_more<T: Transport>(&self, client: &Client<T>) -> LoadOutcome {
        let cursor = {
            let mut state = self.lock();
            if state.status == Status::Loading {
                return LoadOutcome::Busy;
            }
            let cursor = match state.page.next_page() {
                Some(cursor) => cursor.to_owned(),
                None => return LoadOutcome::Exhausted,
            };
            state.status = Status::Loading;
            cursor
        };

        let mut in_flight = InFlight {
            view: self,
            settled: false,
        };
        debug!("loading more posts from {}", cursor);
        let result = match tokio::time::timeout(self.timeout, client.fetch_page(&cursor)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout)),
        };

        let mut state = self.lock();
        in_flight.settled = true;
        match result {
            Ok(fetched) => {
                let loaded = fetched.results.len();
                let page = std::mem::take(&mut state.page);
                state.page = page.merged(fetched);
                state.status = Status::Idle;
                LoadOutcome::Loaded(loaded)
            }
            Err(err) => {
                warn!("loading more posts: {}", err);
                state.status = Status::Failed(err.to_string());
                LoadOutcome::Failed(err)
            }
        }
    }

    /// Returns the current list. Never reflects a half-applied load.
    pub fn snapshot(&self) -> ListSnapshot {
        let state = self.lock();
        let error = match &state.status {
            Status::Failed(message) => Some(message.clone()),
            _ => None,
        };
        ListSnapshot {
            rows: state.page.results.clone(),
            show_load_more: state.page.has_more(),
            loading: state.status == Status::Loading,
            can_retry: error.is_some() && state.page.has_more(),
            error,
        }
    }

    /// Returns the accumulated page.
    pub fn page(&self) -> PageOfPosts {
        self.lock().page.clone()
    }
}

// Resets `Loading` if a `load_more` future is dropped before it settles, so
// the list doesn't stay stuck.
struct InFlight<'a> {
    view: &'a PostListView,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.view.lock();
            if state.status == Status::Loading {
                state.status = Status::Idle;
            }
        }
    }
}
