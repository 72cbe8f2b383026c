//! Exports the [`build_site`] function which stitches together the high-level
//! steps of building the output static site: fetching the list page and every
//! post through a [`Generator`] ([`crate::generate`]), rendering and writing
//! pages ([`crate::write`]), and copying the theme's static assets into the
//! output directory.

use crate::config::Config;
use crate::generate::{DetailPage, Generator};
use crate::prismic::{Error as FetchError, Transport};
use crate::write::{is_safe_slug, Error as WriteError, Renderer, Writer};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Builds the site into `output_directory`. Any fetch failure aborts the
/// build. A post that disappears between enumeration and rendering is
/// skipped.
pub async fn build_site<T: Transport>(
    generator: &Generator<T>,
    renderer: &Renderer,
    static_source_directory: &Path,
    output_directory: &Path,
) -> Result<Summary> {
    // Fetch everything before touching the output directory so a failed
    // build leaves the previous output in place.
    let list = generator.list_page(None).await?;
    let paths = generator.static_paths().await?;
    let mut posts = Vec::with_capacity(paths.slugs.len());
    for slug in &paths.slugs {
        match generator.detail_page(slug).await? {
            DetailPage::Ready(post) => posts.push(post),
            DetailPage::NotFound => warn!("post `{}` vanished during the build", slug),
        }
    }

    if let Some(post) = posts.iter().find(|post| !is_safe_slug(&post.uid)) {
        return Err(Error::Write(WriteError::UnsafeSlug(post.uid.clone())));
    }

    rmdir(output_directory)?;
    let writer = Writer {
        renderer,
        output_directory,
    };
    writer.write_list(&list)?;
    for post in &posts {
        writer.write_post(post)?;
    }
    writer.write_fallback()?;

    if static_source_directory.is_dir() {
        copy_dir(static_source_directory, &output_directory.join("static"))?;
    }

    info!(
        "wrote {} post pages and the list page to {}",
        posts.len(),
        output_directory.display()
    );
    Ok(Summary {
        list_posts: list.posts_pagination.results.len(),
        post_pages: posts.len(),
    })
}

/// Builds the site described by a [`Config`].
pub async fn build_from_config<T: Transport>(
    config: &Config,
    generator: &Generator<T>,
    renderer: &Renderer,
) -> Result<Summary> {
    build_site(
        generator,
        renderer,
        &config.static_source_directory,
        &config.output_directory,
    )
    .await
}

/// What a build produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summary {
    /// Posts shown on the first list page.
    pub list_posts: usize,

    /// Post pages written.
    pub post_pages: usize,
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    use walkdir::WalkDir;
    for result in WalkDir::new(src) {
        let entry = result?;
        // strip_prefix() can't fail since `src` is an ancestor of every entry
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for building a site. Errors can be during fetching,
/// writing, cleaning the output directory, copying static assets, and other
/// I/O.
#[derive(Debug)]
pub enum Error {
    /// Returned when the content backend fails.
    Fetch(FetchError),

    /// Returned for errors rendering or writing pages.
    Write(WriteError),

    /// Returned for I/O problems while cleaning the output directory.
    Clean { path: PathBuf, err: std::io::Error },

    /// Returned for errors walking the static directory.
    WalkDir(walkdir::Error),

    /// Returned for other I/O errors.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Fetch(err) => write!(f, "Fetching content: {}", err),
            Error::Write(err) => err.fmt(f),
            Error::Clean { path, err } => {
                write!(f, "Cleaning directory '{}': {}", path.display(), err)
            }
            Error::WalkDir(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fetch(err) => Some(err),
            Error::Write(err) => Some(err),
            Error::Clean { path: _, err } => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<FetchError> for Error {
    /// Converts [`FetchError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: FetchError) -> Error {
        Error::Fetch(err)
    }
}

impl From<WriteError> for Error {
    /// Converts [`WriteError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: WriteError) -> Error {
        Error::Write(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts [`walkdir::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

fn rmdir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(x) => Ok(x),
        Err(e) => match e.kind() {
            std::io::ErrorKind::NotFound => Ok(()),
            _ => Err(Error::Clean {
                path: dir.to_owned(),
                err: e,
            }),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::generate::{DEFAULT_PAGE_SIZE, DEFAULT_REVALIDATE};
    use crate::prismic::testing::*;
    use crate::prismic::Client;
    use crate::write::test::renderer;
    use std::fs;
    use std::sync::Arc;
    use url::Url;

    fn generator(backend: FakeBackend) -> Generator<FakeBackend> {
        let client = Client::new(backend, Url::parse(ENDPOINT).unwrap(), None);
        Generator::new(Arc::new(client), DEFAULT_PAGE_SIZE, DEFAULT_REVALIDATE)
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ogham-build-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_build_site_writes_every_post() -> Result<()> {
        let root = scratch("every");
        let static_dir = root.join("static-src");
        fs::create_dir_all(static_dir.join("css"))?;
        fs::write(static_dir.join("css").join("style.css"), "body {}")?;
        let out = root.join("out");
        fs::create_dir_all(&out)?;
        fs::write(out.join("stale.html"), "old")?;

        let summary = build_site(
            &generator(FakeBackend::new(post_docs(12))),
            &renderer(),
            &static_dir,
            &out,
        )
        .await?;

        assert_eq!(Summary { list_posts: 10, post_pages: 12 }, summary);
        for i in 0..12 {
            assert!(out.join("posts").join(format!("post-{}.html", i)).is_file());
        }
        assert!(out.join("posts").join(".fallback.html").is_file());
        assert!(out.join("index.json").is_file());
        assert!(out.join("static").join("css").join("style.css").is_file());
        assert!(!out.join("stale.html").exists());
        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_build_site_post_named_fallback() -> Result<()> {
        let root = scratch("named-fallback");
        let out = root.join("out");
        let mut docs = post_docs(1);
        docs.push(post_doc("fallback"));

        let generator = generator(FakeBackend::new(docs));
        let summary = build_site(&generator, &renderer(), &root.join("none"), &out).await?;

        assert_eq!(2, summary.post_pages);
        let post = fs::read_to_string(out.join("posts").join("fallback.html"))?;
        assert!(post.contains("<h1>Title fallback</h1>"));
        assert!(out.join("posts").join(".fallback.html").is_file());
        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_build_site_unsafe_uid_keeps_old_output() -> Result<()> {
        let root = scratch("unsafe-uid");
        let out = root.join("out");
        fs::create_dir_all(&out)?;
        fs::write(out.join("index.html"), "old")?;
        let mut docs = post_docs(1);
        docs.push(post_doc(".hidden"));

        let generator = generator(FakeBackend::new(docs));
        let result = build_site(&generator, &renderer(), &root.join("none"), &out).await;

        assert!(matches!(result, Err(Error::Write(WriteError::UnsafeSlug(_)))));
        assert_eq!("old", fs::read_to_string(out.join("index.html"))?);
        fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_build_site_fetch_failure_keeps_old_output() -> Result<()> {
        let root = scratch("failure");
        let out = root.join("out");
        fs::create_dir_all(&out)?;
        fs::write(out.join("index.html"), "old")?;

        let backend = FakeBackend::new(post_docs(2));
        backend.set_failing(true);
        let result = build_site(&generator(backend), &renderer(), &root.join("none"), &out).await;

        assert!(matches!(result, Err(Error::Fetch(_))));
        assert_eq!("old", fs::read_to_string(out.join("index.html"))?);
        fs::remove_dir_all(&root)?;
        Ok(())
    }
}
