use crate::comments::CommentsWidget;
use crate::date::DateFormat;
use crate::generate::ListProps;
use crate::post::PostDetail;
use gtmpl::{Template, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// The file name of the loading placeholder for post pages that weren't
/// rendered at build time. It starts with a dot so no post uid can collide
/// with it.
pub const FALLBACK_FILE_NAME: &str = ".fallback.html";

/// The template sources for each kind of page. Sources are validated when
/// loaded and parsed again for each render, so a [`Renderer`] can be shared
/// freely between tasks.
#[derive(Clone, Debug)]
pub struct Templates {
    pub list: String,
    pub post: String,
    pub fallback: String,
}

impl Templates {
    /// Loads and validates the templates. Each template may be split over
    /// several files, which are concatenated in order.
    pub fn load(list: &[PathBuf], post: &[PathBuf], fallback: &[PathBuf]) -> Result<Templates> {
        let templates = Templates {
            list: read_template(list)?,
            post: read_template(post)?,
            fallback: read_template(fallback)?,
        };
        parse_template(&templates.list)?;
        parse_template(&templates.post)?;
        parse_template(&templates.fallback)?;
        Ok(templates)
    }
}

// Loads the template file contents and joins them into one source.
fn read_template<P: AsRef<Path>>(template_files: &[P]) -> Result<String> {
    let mut contents = String::new();
    for template_file in template_files {
        use std::io::Read;
        let template_file = template_file.as_ref();
        File::open(template_file)
            .map_err(|e| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err: e,
            })?
            .read_to_string(&mut contents)?;
        contents.push(' ');
    }
    Ok(contents)
}

fn parse_template(source: &str) -> Result<Template> {
    let mut template = Template::default();
    template.parse(source).map_err(Error::ParseTemplate)?;
    Ok(template)
}

/// Site-wide values available to every template.
#[derive(Clone, Debug)]
pub struct Site {
    /// The URL prefix for links between pages, ending in a slash.
    pub site_root: String,

    /// The URL prefix for theme assets, ending in a slash.
    pub static_url: String,

    pub date_format: DateFormat,
    pub comments: CommentsWidget,
}

/// Turns page data into HTML.
#[derive(Clone, Debug)]
pub struct Renderer {
    pub templates: Templates,
    pub site: Site,
}

impl Renderer {
    pub fn new(templates: Templates, site: Site) -> Renderer {
        Renderer { templates, site }
    }

    /// Templates a single page. `fields` are merged with the site-wide
    /// `home_page` and `static_url` values.
    fn render(&self, source: &str, fields: HashMap<String, Value>) -> Result<String> {
        let mut fields = fields;
        fields.insert(
            "home_page".to_owned(),
            Value::String(self.site.site_root.clone()),
        );
        fields.insert(
            "static_url".to_owned(),
            Value::String(self.site.static_url.clone()),
        );

        let template = parse_template(source)?;
        let mut out: Vec<u8> = Vec::new();
        template.execute(&mut out, &gtmpl::Context::from(Value::Object(fields))?)?;
        String::from_utf8(out).map_err(|e| Error::Template(e.to_string()))
    }

    /// Renders the list page. Its template sees `posts` (see
    /// [`crate::post::PostSummary::to_value`]), `next_page` (nil on the last
    /// page), `has_more` and `revalidate` (seconds).
    pub fn render_list(&self, props: &ListProps) -> Result<String> {
        let page = &props.posts_pagination;
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert(
            "posts".to_owned(),
            Value::Array(
                page.results
                    .iter()
                    .map(|p| p.to_value(&self.site.site_root, &self.site.date_format))
                    .collect(),
            ),
        );
        m.insert(
            "next_page".to_owned(),
            match page.next_page() {
                Some(url) => Value::String(crate::util::escape(url)),
                None => Value::Nil,
            },
        );
        m.insert("has_more".to_owned(), Value::Bool(page.has_more()));
        m.insert(
            "revalidate".to_owned(),
            Value::String(props.revalidate.as_secs().to_string()),
        );
        self.render(&self.templates.list, m)
    }

    /// Renders a post page. Its template sees `post` (see
    /// [`PostDetail::to_value`]) and `comments`, the widget's script element.
    pub fn render_post(&self, post: &PostDetail) -> Result<String> {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert(
            "post".to_owned(),
            post.to_value(&self.site.site_root, &self.site.date_format),
        );
        m.insert(
            "comments".to_owned(),
            Value::String(self.site.comments.script()),
        );
        self.render(&self.templates.post, m)
    }

    /// Renders the loading placeholder. When `refresh` is set the page asks
    /// the browser to reload it shortly, picking up the generated post.
    pub fn render_fallback(&self, slug: Option<&str>, refresh: bool) -> Result<String> {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert(
            "slug".to_owned(),
            match slug {
                Some(slug) => Value::String(crate::util::escape(slug)),
                None => Value::Nil,
            },
        );
        m.insert("refresh".to_owned(), Value::Bool(refresh));
        self.render(&self.templates.fallback, m)
    }
}

/// Writes rendered pages into the output directory:
///
/// * `{output_directory}/index.html` and `index.json` for the list page
/// * `{output_directory}/posts/{uid}.html` for each post
/// * `{output_directory}/posts/.fallback.html` for the loading placeholder
pub struct Writer<'a> {
    pub renderer: &'a Renderer,
    pub output_directory: &'a Path,
}

impl Writer<'_> {
    fn posts_directory(&self) -> PathBuf {
        self.output_directory.join("posts")
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Writes the list page and its props.
    pub fn write_list(&self, props: &ListProps) -> Result<()> {
        self.write_file(
            &self.output_directory.join("index.html"),
            &self.renderer.render_list(props)?,
        )?;
        let json = serde_json::to_string_pretty(props).map_err(Error::Json)?;
        self.write_file(&self.output_directory.join("index.json"), &json)
    }

    /// Writes one post page and returns its path.
    pub fn write_post(&self, post: &PostDetail) -> Result<PathBuf> {
        if !is_safe_slug(&post.uid) {
            return Err(Error::UnsafeSlug(post.uid.clone()));
        }
        let path = self.posts_directory().join(format!("{}.html", post.uid));
        self.write_file(&path, &self.renderer.render_post(post)?)?;
        Ok(path)
    }

    /// Writes the loading placeholder.
    pub fn write_fallback(&self) -> Result<()> {
        self.write_file(
            &self.posts_directory().join(FALLBACK_FILE_NAME),
            &self.renderer.render_fallback(None, false)?,
        )
    }
}

/// Returns whether `slug` can be used as a file name inside the posts
/// directory. Dot-prefixed names are reserved for [`FALLBACK_FILE_NAME`].
pub fn is_safe_slug(slug: &str) -> bool {
    !slug.is_empty() && !slug.starts_with('.') && !slug.contains(|c: char| c == '/' || c == '\\')
}

/// The result of a fallible page-writing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error in a page-writing operation.
#[derive(Debug)]
pub enum Error {
    /// An error during templating.
    Template(String),

    /// Returned for errors parsing template files.
    ParseTemplate(String),

    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: io::Error },

    /// Returned when a post's uid can't be used as a file name.
    UnsafeSlug(String),

    /// Returned when the list props can't be serialized.
    Json(serde_json::Error),

    /// An error writing the output files.
    Io(io::Error),
}

impl From<io::Error> for Error {
    /// Converts an [`io::Error`] into an [`Error`]. This allows us to use the
    /// `?` operator for fallible I/O operations.
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<String> for Error {
    /// Converts a template error message ([`String`]) into an [`Error`]. This
    /// allows us to use the `?` operator for fallible template operations.
    fn from(err: String) -> Error {
        Error::Template(err)
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as presentable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Template(err) => err.fmt(f),
            Error::ParseTemplate(err) => write!(f, "Parsing template: {}", err),
            Error::OpenTemplateFile { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
            Error::UnsafeSlug(slug) => write!(f, "Refusing to write post with uid '{}'", slug),
            Error::Json(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Template(_) => None,
            Error::ParseTemplate(_) => None,
            Error::OpenTemplateFile { path: _, err } => Some(err),
            Error::UnsafeSlug(_) => None,
            Error::Json(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::post::{Banner, PageOfPosts, PostSummary, Section};
    use crate::richtext::Block;
    use std::time::Duration;

    const LIST: &str = r#"{{ range .posts }}<a href="{{ .url }}">{{ .title }}</a>|{{ end }}{{ if .has_more }}<button data-next="{{ .next_page }}">more</button>{{ end }}"#;
    const POST: &str = r#"<h1>{{ .post.title }}</h1><span>{{ .post.reading_time }}</span>{{ range .post.sections }}<h2 id="{{ .id }}">{{ .heading }}</h2>{{ range .paragraphs }}<p>{{ . }}</p>{{ end }}{{ end }}{{ .comments }}"#;
    const FALLBACK: &str = r#"{{ if .refresh }}<meta http-equiv="refresh" content="1">{{ end }}<p>Carregando...</p>"#;

    pub fn renderer() -> Renderer {
        Renderer::new(
            Templates {
                list: LIST.to_owned(),
                post: POST.to_owned(),
                fallback: FALLBACK.to_owned(),
            },
            Site {
                site_root: String::from("/"),
                static_url: String::from("/static/"),
                date_format: DateFormat::default(),
                comments: CommentsWidget::new(Some(String::from("ana/comments"))),
            },
        )
    }

    fn summary(uid: &str) -> PostSummary {
        PostSummary {
            uid: uid.to_owned(),
            first_publication_date: None,
            title: format!("Title {}", uid),
            subtitle: String::new(),
            author: String::from("Ana"),
        }
    }

    pub fn detail(uid: &str) -> PostDetail {
        PostDetail {
            uid: uid.to_owned(),
            first_publication_date: Some(String::from("2021-03-15T19:25:28+0000")),
            title: format!("Title {}", uid),
            subtitle: String::new(),
            author: String::from("Ana"),
            banner: Banner::default(),
            content: vec![Section {
                id: String::from("section-0-intro"),
                heading: String::from("Intro"),
                body: vec![Block {
                    kind: String::from("paragraph"),
                    text: String::from("Fish & chips"),
                }],
            }],
        }
    }

    fn props(next_page: Option<&str>) -> ListProps {
        ListProps {
            posts_pagination: PageOfPosts {
                next_page: next_page.map(str::to_owned),
                results: vec![summary("a"), summary("b")],
            },
            revalidate: Duration::from_secs(60),
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ogham-write-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_render_list_with_more() -> Result<()> {
        let html = renderer().render_list(&props(Some("https://x.org/s?a=1&page=2")))?;
        assert_eq!(
            r#"<a href="/posts/a.html">Title a</a>|<a href="/posts/b.html">Title b</a>|<button data-next="https://x.org/s?a=1&amp;page=2">more</button>"#,
            html
        );
        Ok(())
    }

    #[test]
    fn test_render_list_last_page_hides_button() -> Result<()> {
        let html = renderer().render_list(&props(None))?;
        assert!(!html.contains("<button"));
        Ok(())
    }

    #[test]
    fn test_render_post() -> Result<()> {
        let html = renderer().render_post(&detail("a"))?;
        assert!(html.starts_with("<h1>Title a</h1><span>1 min</span>"));
        assert!(html.contains(r#"<h2 id="section-0-intro">Intro</h2><p>Fish &amp; chips</p>"#));
        assert!(html.contains(r#"repo="ana/comments""#));
        Ok(())
    }

    #[test]
    fn test_render_fallback() -> Result<()> {
        let r = renderer();
        assert_eq!("<p>Carregando...</p>", r.render_fallback(None, false)?);
        assert!(r.render_fallback(Some("x"), true)?.contains("http-equiv=\"refresh\""));
        Ok(())
    }

    #[test]
    fn test_writer_layout() -> Result<()> {
        let dir = scratch_dir("layout");
        let r = renderer();
        let writer = Writer {
            renderer: &r,
            output_directory: &dir,
        };
        writer.write_list(&props(None))?;
        let post_path = writer.write_post(&detail("a"))?;
        writer.write_fallback()?;

        assert_eq!(dir.join("posts").join("a.html"), post_path);
        assert!(dir.join("index.html").is_file());
        assert!(dir.join("posts").join(FALLBACK_FILE_NAME).is_file());
        let json = std::fs::read_to_string(dir.join("index.json"))?;
        assert!(json.contains("\"postsPagination\""));
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_writer_rejects_unsafe_slug() {
        let dir = scratch_dir("unsafe");
        let r = renderer();
        let writer = Writer {
            renderer: &r,
            output_directory: &dir,
        };
        assert!(matches!(
            writer.write_post(&detail("../escape")),
            Err(Error::UnsafeSlug(_))
        ));
    }

    #[test]
    fn test_placeholder_name_is_not_a_uid() {
        assert!(is_safe_slug("fallback"));
        assert!(!is_safe_slug(FALLBACK_FILE_NAME.trim_end_matches(".html")));
    }

    #[test]
    fn test_load_missing_template() {
        let missing = vec![PathBuf::from("/nonexistent/list.html")];
        assert!(matches!(
            Templates::load(&missing, &missing, &missing),
            Err(Error::OpenTemplateFile { .. })
        ));
    }
}
