//! Serves the blog over HTTP. Pages rendered at startup are served as-is,
//! except that the list page is refreshed in the background once it's older
//! than the revalidation interval. A post that wasn't rendered at startup is
//! generated on its first request; until that finishes, requests for it get
//! the loading placeholder. A slug with no post answers 404 for one
//! revalidation interval and is looked up again after that.

use crate::build::Error;
use crate::generate::{DetailPage, DetailState, Generator, Stamped};
use crate::prismic::Transport;
use crate::write::{is_safe_slug, Renderer};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type Pages = HashMap<String, DetailState<Arc<String>>>;

// Slugs found to have no post, and when that was found.
type Missing = HashMap<String, Instant>;

/// Shared server state.
pub struct AppState<T> {
    generator: Generator<T>,
    renderer: Arc<Renderer>,
    static_dir: Arc<PathBuf>,
    list: Arc<RwLock<Stamped<Arc<String>>>>,
    posts: Arc<RwLock<Pages>>,
    missing: Arc<RwLock<Missing>>,
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        AppState {
            generator: self.generator.clone(),
            renderer: Arc::clone(&self.renderer),
            static_dir: Arc::clone(&self.static_dir),
            list: Arc::clone(&self.list),
            posts: Arc::clone(&self.posts),
            missing: Arc::clone(&self.missing),
        }
    }
}

impl<T: Transport + 'static> AppState<T> {
    /// Builds the state from already-rendered pages. `posts` pairs each slug
    /// with its rendered page.
    pub fn new(
        generator: Generator<T>,
        renderer: Arc<Renderer>,
        static_dir: PathBuf,
        list_html: String,
        posts: Vec<(String, String)>,
    ) -> AppState<T> {
        let posts: Pages = posts
            .into_iter()
            .map(|(slug, html)| (slug, DetailState::Ready(Arc::new(html))))
            .collect();
        AppState {
            generator,
            renderer,
            static_dir: Arc::new(static_dir),
            list: Arc::new(RwLock::new(Stamped::new(Arc::new(list_html), Instant::now()))),
            posts: Arc::new(RwLock::new(posts)),
            missing: Arc::new(RwLock::new(Missing::new())),
        }
    }

    /// Renders the list page and every known post, then builds the state.
    pub async fn prerender(
        generator: Generator<T>,
        renderer: Arc<Renderer>,
        static_dir: PathBuf,
    ) -> Result<AppState<T>, Error> {
        let list_html = renderer.render_list(&generator.list_page(None).await?)?;
        let paths = generator.static_paths().await?;
        let mut posts = Vec::with_capacity(paths.slugs.len());
        for slug in paths.slugs {
            match generator.detail_page(&slug).await? {
                DetailPage::Ready(post) => posts.push((slug, renderer.render_post(&post)?)),
                DetailPage::NotFound => warn!("post `{}` vanished while pre-rendering", slug),
            }
        }
        info!("pre-rendered {} post pages", posts.len());
        Ok(AppState::new(generator, renderer, static_dir, list_html, posts))
    }

    /// Returns a copy of a post page's state, if it has one.
    pub async fn page_state(&self, slug: &str) -> Option<DetailState<Arc<String>>> {
        self.posts.read().await.get(slug).cloned()
    }

    /// Serves the list page, kicking off a background refresh when it's stale.
    pub async fn list_response(&self) -> Response {
        let (html, refresh) = {
            let mut list = self.list.write().await;
            let refresh = list.begin_refresh(self.generator.revalidate(), Instant::now());
            (Arc::clone(list.value()), refresh)
        };
        if refresh {
            let state = self.clone();
            tokio::spawn(async move { state.refresh_list().await });
        }
        Html(html.as_str().to_owned()).into_response()
    }

    async fn refresh_list(&self) {
        let rendered = match self.generator.list_page(None).await {
            Ok(props) => self.renderer.render_list(&props).map_err(Error::from),
            Err(e) => Err(Error::from(e)),
        };
        let mut list = self.list.write().await;
        match rendered {
            Ok(html) => {
                debug!("list page refreshed");
                list.replace(Arc::new(html), Instant::now());
            }
            Err(e) => {
                warn!("refreshing list page: {}", e);
                list.refresh_failed();
            }
        }
    }

    /// Serves a post page, generating it on first request if needed.
    pub async fn post_response(&self, slug: &str) -> Response {
        if !is_safe_slug(slug) || self.recently_missing(slug).await {
            return not_found();
        }
        let start = {
            let mut posts = self.posts.write().await;
            match posts.entry(slug.to_owned()).or_default() {
                DetailState::Ready(html) => return Html(html.as_str().to_owned()).into_response(),
                DetailState::NotFound => return not_found(),
                // only an `Unbuilt` page starts generating
                state => state.begin(),
            }
        };
        if start {
            debug!("generating post `{}` on demand", slug);
            let state = self.clone();
            let slug = slug.to_owned();
            tokio::spawn(async move { state.generate_post(slug).await });
        }
        match self.renderer.render_fallback(Some(slug), true) {
            Ok(html) => Html(html).into_response(),
            Err(e) => internal_error(&e.to_string()),
        }
    }

    async fn generate_post(&self, slug: String) {
        let outcome: Result<Option<Arc<String>>, Error> =
            match self.generator.detail_page(&slug).await {
                Ok(DetailPage::Ready(post)) => self
                    .renderer
                    .render_post(&post)
                    .map(|html| Some(Arc::new(html)))
                    .map_err(Error::from),
                Ok(DetailPage::NotFound) => Ok(None),
                Err(e) => Err(Error::from(e)),
            };

        match outcome {
            Ok(Some(page)) => {
                let mut posts = self.posts.write().await;
                posts.entry(slug).or_default().finish(Some(page));
            }
            Ok(None) => {
                self.remember_missing(&slug).await;
                self.posts.write().await.remove(&slug);
            }
            Err(e) => {
                warn!("generating post `{}`: {}", slug, e);
                let mut posts = self.posts.write().await;
                posts.entry(slug).or_default().abandon();
            }
        }
    }

    // Whether `slug` was found to have no post within the last revalidation
    // interval. Expired entries are dropped.
    async fn recently_missing(&self, slug: &str) -> bool {
        let interval = self.generator.revalidate();
        let now = Instant::now();
        let mut missing = self.missing.write().await;
        let fresh = match missing.get(slug) {
            Some(at) => now.saturating_duration_since(*at) < interval,
            None => return false,
        };
        if !fresh {
            missing.remove(slug);
        }
        fresh
    }

    async fn remember_missing(&self, slug: &str) {
        let interval = self.generator.revalidate();
        let now = Instant::now();
        let mut missing = self.missing.write().await;
        missing.retain(|_, at| now.saturating_duration_since(*at) < interval);
        missing.insert(slug.to_owned(), now);
    }

    /// Serves a file from the theme's static directory.
    pub async fn static_response(&self, path: &str) -> Response {
        let relative = std::path::Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return not_found();
        }
        match tokio::fs::read(self.static_dir.join(relative)).await {
            Ok(bytes) => ([(header::CONTENT_TYPE, content_type(path))], bytes).into_response(),
            Err(_) => not_found(),
        }
    }
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("<h1>404</h1>")).into_response()
}

fn internal_error(message: &str) -> Response {
    warn!("rendering: {}", message);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

async fn list_page<T: Transport + 'static>(State(state): State<AppState<T>>) -> Response {
    state.list_response().await
}

async fn post_page<T: Transport + 'static>(
    State(state): State<AppState<T>>,
    Path(file): Path<String>,
) -> Response {
    let slug = file.strip_suffix(".html").unwrap_or(&file);
    state.post_response(slug).await
}

async fn static_file<T: Transport + 'static>(
    State(state): State<AppState<T>>,
    Path(path): Path<String>,
) -> Response {
    state.static_response(&path).await
}

pub fn router<T: Transport + 'static>(state: AppState<T>) -> Router {
    Router::new()
        .route("/", get(list_page::<T>))
        .route("/index.html", get(list_page::<T>))
        .route("/posts/:file", get(post_page::<T>))
        .route("/static/*path", get(static_file::<T>))
        .with_state(state)
}

/// Serves `state` on `listen` (e.g. `127.0.0.1:3000`) until the process is
/// stopped.
pub async fn serve<T: Transport + 'static>(state: AppState<T>, listen: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("serving on http://{}", listen);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::generate::DEFAULT_PAGE_SIZE;
    use crate::prismic::testing::*;
    use crate::prismic::Client;
    use crate::write::test::renderer;
    use std::time::Duration;
    use url::Url;

    fn generator(backend: &Arc<FakeBackend>, revalidate: Duration) -> Generator<Arc<FakeBackend>> {
        let client = Client::new(Arc::clone(backend), Url::parse(ENDPOINT).unwrap(), None);
        Generator::new(Arc::new(client), DEFAULT_PAGE_SIZE, revalidate)
    }

    fn empty_state(backend: &Arc<FakeBackend>, revalidate: Duration) -> AppState<Arc<FakeBackend>> {
        AppState::new(
            generator(backend, revalidate),
            Arc::new(renderer()),
            PathBuf::from("/nonexistent"),
            String::from("initial list"),
            Vec::new(),
        )
    }

    async fn body(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn settle(state: &AppState<Arc<FakeBackend>>, slug: &str) {
        for _ in 0..100 {
            match state.page_state(slug).await {
                Some(DetailState::Generating) => tokio::time::sleep(Duration::from_millis(5)).await,
                _ => return,
            }
        }
        panic!("`{}` never left Generating", slug);
    }

    #[tokio::test]
    async fn test_prerendered_post_is_served() {
        let backend = Arc::new(FakeBackend::new(post_docs(2)));
        let state = AppState::prerender(
            generator(&backend, Duration::from_secs(60)),
            Arc::new(renderer()),
            PathBuf::from("/nonexistent"),
        )
        .await
        .unwrap();

        let resp = state.post_response("post-1").await;
        assert_eq!(StatusCode::OK, resp.status());
        assert!(body(resp).await.contains("<h1>Title post-1</h1>"));
    }

    #[tokio::test]
    async fn test_fallback_generates_post() {
        let backend = Arc::new(FakeBackend::new(post_docs(2)));
        let state = empty_state(&backend, Duration::from_secs(60));

        let first = state.post_response("post-1").await;
        assert_eq!(StatusCode::OK, first.status());
        assert!(body(first).await.contains("Carregando"));

        settle(&state, "post-1").await;
        let second = state.post_response("post-1").await;
        assert!(body(second).await.contains("<h1>Title post-1</h1>"));
    }

    #[tokio::test]
    async fn test_fallback_missing_slug_is_not_found() {
        let backend = Arc::new(FakeBackend::new(post_docs(2)));
        let state = empty_state(&backend, Duration::from_secs(60));

        assert_eq!(StatusCode::OK, state.post_response("missing-slug").await.status());
        settle(&state, "missing-slug").await;
        assert_eq!(None, state.page_state("missing-slug").await);
        assert_eq!(
            StatusCode::NOT_FOUND,
            state.post_response("missing-slug").await.status()
        );
    }

    #[tokio::test]
    async fn test_missing_slug_is_looked_up_again_later() {
        let backend = Arc::new(FakeBackend::new(post_docs(1)));
        let state = empty_state(&backend, Duration::from_millis(50));

        state.post_response("late").await;
        settle(&state, "late").await;
        assert_eq!(StatusCode::NOT_FOUND, state.post_response("late").await.status());

        backend.publish(post_doc("late"));
        assert_eq!(StatusCode::NOT_FOUND, state.post_response("late").await.status());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(body(state.post_response("late").await).await.contains("Carregando"));
        settle(&state, "late").await;
        assert!(body(state.post_response("late").await).await.contains("<h1>Title late</h1>"));
    }

    #[tokio::test]
    async fn test_missing_slugs_do_not_accumulate() {
        let backend = Arc::new(FakeBackend::new(post_docs(1)));
        let state = empty_state(&backend, Duration::from_millis(20));

        for i in 0..50 {
            let slug = format!("junk-{}", i);
            state.post_response(&slug).await;
            settle(&state, &slug).await;
        }
        assert!(state.posts.read().await.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        state.post_response("junk-last").await;
        settle(&state, "junk-last").await;
        assert_eq!(1, state.missing.read().await.len());
        assert!(state.posts.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_failure_retries() {
        let backend = Arc::new(FakeBackend::new(post_docs(2)));
        backend.set_failing(true);
        let state = empty_state(&backend, Duration::from_secs(60));

        state.post_response("post-0").await;
        settle(&state, "post-0").await;
        assert_eq!(Some(DetailState::Unbuilt), state.page_state("post-0").await);

        backend.set_failing(false);
        state.post_response("post-0").await;
        settle(&state, "post-0").await;
        assert!(matches!(
            state.page_state("post-0").await,
            Some(DetailState::Ready(_))
        ));
    }

    #[tokio::test]
    async fn test_unsafe_slug_is_not_found() {
        let backend = Arc::new(FakeBackend::new(post_docs(1)));
        let state = empty_state(&backend, Duration::from_secs(60));
        assert_eq!(StatusCode::NOT_FOUND, state.post_response("..").await.status());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stale_list_is_served_then_refreshed() {
        let backend = Arc::new(FakeBackend::new(post_docs(3)));
        let state = empty_state(&backend, Duration::ZERO);

        // the stale page is served while the refresh runs
        assert_eq!("initial list", body(state.list_response().await).await);

        for _ in 0..100 {
            let html = body(state.list_response().await).await;
            if html != "initial list" {
                assert!(html.contains("Title post-2"));
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("list page was never refreshed");
    }

    #[tokio::test]
    async fn test_fresh_list_is_not_refetched() {
        let backend = Arc::new(FakeBackend::new(post_docs(3)));
        let state = empty_state(&backend, Duration::from_secs(60));
        state.list_response().await;
        state.list_response().await;
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_static_file_is_served() -> std::io::Result<()> {
        let dir = std::env::temp_dir().join(format!("ogham-serve-static-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("css"))?;
        std::fs::write(dir.join("css").join("style.css"), "body {}")?;
        let backend = Arc::new(FakeBackend::new(Vec::new()));
        let mut state = empty_state(&backend, Duration::from_secs(60));
        state.static_dir = Arc::new(dir.clone());

        let resp = state.static_response("css/style.css").await;
        assert_eq!(StatusCode::OK, resp.status());
        assert_eq!("text/css", resp.headers()[header::CONTENT_TYPE]);
        assert_eq!("body {}", body(resp).await);
        assert_eq!(
            StatusCode::NOT_FOUND,
            state.static_response("../style.css").await.status()
        );
        std::fs::remove_dir_all(&dir)
    }

    #[test]
    fn test_content_type() {
        assert_eq!("text/css", content_type("css/style.css"));
        assert_eq!("application/octet-stream", content_type("LICENSE"));
    }
}
