//! A read-only client for the Prismic REST API (v2). [`Client`] issues
//! searches and continuation fetches over a [`Transport`] and maps the raw
//! documents into the shapes defined in [`crate::post`].
//!
//! Every search needs a content reference. Unless a preview reference is
//! supplied, the master reference is read from the API root before each
//! query. Nothing is cached and nothing is retried: failures propagate to the
//! caller.

use crate::post::{
    DetailFields, PageOfPosts, PostDetail, SummaryFields, DOCUMENT_TYPE, SUMMARY_FIELDS,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// The page size used when walking every document, the largest the backend
/// accepts.
const MAX_PAGE_SIZE: u32 = 100;

const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Performs GET requests on behalf of a [`Client`] and returns response
/// bodies.
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> impl Future<Output = Result<String>> + Send;
}

/// A [`Transport`] backed by [`reqwest`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<HttpTransport> {
        Ok(HttpTransport {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<String> {
        debug!("GET {}", url);
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!("GET {} status: {}", url, status);
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}

/// A raw backend document. `D` is the shape of its `data` field.
#[derive(Clone, Debug, Deserialize)]
pub struct Document<D> {
    pub id: String,
    pub uid: Option<String>,
    pub first_publication_date: Option<String>,
    pub data: D,
}

/// A raw search response.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchResponse<D> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    pub next_page: Option<String>,
    pub results: Vec<Document<D>>,
}

/// Document data that's never read; only ids and uids matter.
#[derive(Clone, Debug, Deserialize)]
struct Ignored {}

#[derive(Deserialize)]
struct ApiRoot {
    refs: Vec<Ref>,
}

#[derive(Deserialize)]
struct Ref {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(rename = "isMasterRef", default)]
    is_master_ref: bool,
}

/// A single search condition.
#[derive(Clone, Debug)]
pub enum Predicate<'a> {
    /// Matches documents whose `path` equals `value`.
    At(&'a str, &'a str),
}

impl fmt::Display for Predicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Predicate::At(path, value) => {
                // JSON string syntax is what the query language expects
                let quoted = serde_json::to_string(value).map_err(|_| fmt::Error)?;
                write!(f, "[at({}, {})]", path, quoted)
            }
        }
    }
}

/// Paging and projection options for [`Client::query`].
#[derive(Clone, Debug, Default)]
pub struct QueryOptions<'a> {
    /// Fully-qualified field names to return (e.g. `posts.title`). Empty
    /// means every field.
    pub fetch: &'a [&'a str],
    pub page_size: Option<u32>,
    pub page: Option<u32>,
    /// A preview reference. `None` means the master reference.
    pub reference: Option<&'a str>,
}

/// Reads documents from a Prismic repository.
#[derive(Debug)]
pub struct Client<T> {
    transport: T,

    /// The API root, e.g. `https://my-repo.cdn.prismic.io/api/v2`.
    endpoint: Url,

    access_token: Option<String>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, endpoint: Url, access_token: Option<String>) -> Client<T> {
        Client {
            transport,
            endpoint,
            access_token,
        }
    }

    async fn get_json<D: DeserializeOwned>(&self, url: &Url) -> Result<D> {
        let body = self.transport.get(url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn with_access_token(&self, mut url: Url) -> Url {
        if let Some(token) = &self.access_token {
            url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
        }
        url
    }

    /// Reads the master content reference from the API root.
    pub async fn master_ref(&self) -> Result<String> {
        let url = self.with_access_token(self.endpoint.clone());
        let root: ApiRoot = self.get_json(&url).await?;
        root.refs
            .into_iter()
            .find(|r| r.is_master_ref)
            .map(|r| r.reference)
            .ok_or(Error::NoMasterRef)
    }

    async fn resolve_ref(&self, reference: Option<&str>) -> Result<String> {
        match reference {
            Some(reference) => Ok(reference.to_owned()),
            None => self.master_ref().await,
        }
    }

    fn search_url(
        &self,
        reference: &str,
        predicates: &[Predicate<'_>],
        options: &QueryOptions<'_>,
    ) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::CannotBeABase(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(&["documents", "search"]);

        let q: String = predicates.iter().map(|p| p.to_string()).collect();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ref", reference);
            query.append_pair("q", &format!("[{}]", q));
            if !options.fetch.is_empty() {
                query.append_pair("fetch", &options.fetch.join(","));
            }
            if let Some(page_size) = options.page_size {
                query.append_pair("pageSize", &page_size.to_string());
            }
            if let Some(page) = options.page {
                query.append_pair("page", &page.to_string());
            }
        }
        Ok(self.with_access_token(url))
    }

    /// Runs a search and deserializes each document's `data` as `D`.
    pub async fn query<D: DeserializeOwned>(
        &self,
        predicates: &[Predicate<'_>],
        options: &QueryOptions<'_>,
    ) -> Result<SearchResponse<D>> {
        let reference = self.resolve_ref(options.reference).await?;
        let url = self.search_url(&reference, predicates, options)?;
        self.get_json(&url).await
    }

    /// Fetches one page of post summaries. Pages are numbered from 1.
    pub async fn list_posts(
        &self,
        page: u32,
        page_size: u32,
        reference: Option<&str>,
    ) -> Result<PageOfPosts> {
        let response = self
            .query::<SummaryFields>(
                &[Predicate::At("document.type", DOCUMENT_TYPE)],
                &QueryOptions {
                    fetch: &SUMMARY_FIELDS,
                    page_size: Some(page_size),
                    page: Some(page),
                    reference,
                },
            )
            .await?;
        debug!(
            "listed page {} of {} ({} posts)",
            response.page,
            response.total_pages,
            response.results.len()
        );
        page_from(response)
    }

    /// Fetches the page behind a `next_page` cursor. The access token, if
    /// any, is added back to the cursor.
    pub async fn fetch_page(&self, next_page: &str) -> Result<PageOfPosts> {
        let url = self.with_access_token(without_access_token(&Url::parse(next_page)?));
        page_from(self.get_json(&url).await?)
    }

    /// Looks up a single post by uid. Returns [`Error::NotFound`] when no post
    /// has that uid.
    pub async fn get_post_by_uid(&self, uid: &str) -> Result<PostDetail> {
        let uid_path = format!("my.{}.uid", DOCUMENT_TYPE);
        let response = self
            .query::<DetailFields>(
                &[Predicate::At(&uid_path, uid)],
                &QueryOptions {
                    page_size: Some(1),
                    ..QueryOptions::default()
                },
            )
            .await?;
        match response.results.into_iter().next() {
            Some(doc) => PostDetail::from_document(doc),
            None => Err(Error::NotFound(uid.to_owned())),
        }
    }

    /// Enumerates the uid of every post, following the backend's pagination
    /// to the end. Documents without a uid are skipped.
    pub async fn list_all_uids(&self) -> Result<Vec<String>> {
        let mut response = self
            .query::<Ignored>(
                &[Predicate::At("document.type", DOCUMENT_TYPE)],
                &QueryOptions {
                    // `fetch` can't be empty without meaning "everything"
                    fetch: &SUMMARY_FIELDS[..1],
                    page_size: Some(MAX_PAGE_SIZE),
                    page: Some(1),
                    reference: None,
                },
            )
            .await?;

        let mut uids = Vec::new();
        loop {
            for doc in response.results {
                match doc.uid {
                    Some(uid) if !uid.is_empty() => uids.push(uid),
                    _ => warn!("skipping document `{}`: missing uid", doc.id),
                }
            }
            match response.next_page.filter(|url| !url.is_empty()) {
                Some(next_page) => {
                    let url = without_access_token(&Url::parse(&next_page)?);
                    response = self.get_json(&self.with_access_token(url)).await?;
                }
                None => break,
            }
        }
        Ok(uids)
    }
}

// The backend echoes the access token back in `next_page`. Cursors end up in
// published pages, so they're handed out without it.
fn page_from(response: SearchResponse<SummaryFields>) -> Result<PageOfPosts> {
    let mut page = PageOfPosts::from_response(response)?;
    if let Some(next_page) = page.next_page.take().filter(|url| !url.is_empty()) {
        page.next_page = Some(without_access_token(&Url::parse(&next_page)?).to_string());
    }
    Ok(page)
}

fn without_access_token(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != ACCESS_TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut clean = url.clone();
    if pairs.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(pairs);
    }
    clean
}

/// The result of a fallible backend operation.
pub type Result<T> = std::result::Result<T, Error>;

/// An error talking to the backend. Everything except [`Error::NotFound`] is
/// a fetch failure: the backend was unreachable or sent something unexpected.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("`{url}` responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Malformed document `{id}`: {reason}")]
    InvalidDocument { id: String, reason: String },

    #[error("The API did not advertise a master ref")]
    NoMasterRef,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Endpoint `{0}` cannot be used as a base URL")]
    CannotBeABase(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No post with uid `{0}`")]
    NotFound(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
