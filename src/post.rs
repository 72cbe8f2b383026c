//! Defines the view-ready post shapes ([`PostSummary`], [`PostDetail`] and
//! [`PageOfPosts`]) and the mapping from raw backend documents into them.
//! See [`PostSummary::to_value`] and [`PostDetail::to_value`] for how posts
//! are exposed to templates.

use crate::date::DateFormat;
use crate::prismic::{Document, Error, Result, SearchResponse};
use crate::richtext::{self, Block};
use crate::util::escape;
use gtmpl::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The backend document type holding blog posts.
pub const DOCUMENT_TYPE: &str = "posts";

/// The only fields the list page needs. Requesting these alone keeps list
/// responses small.
pub const SUMMARY_FIELDS: [&str; 3] = ["posts.title", "posts.subtitle", "posts.author"];

/// A post as it appears on the list page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    /// The post's unique identifier. Used as the route slug and as the row key
    /// on the list page.
    pub uid: String,

    /// When the post was first published, as reported by the backend.
    pub first_publication_date: Option<String>,

    pub title: String,
    pub subtitle: String,
    pub author: String,
}

/// The post's banner image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub alt: String,
}

/// A headed section of a post's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Section {
    /// Assigned at ingestion from the section's position and heading, so two
    /// sections sharing a heading still have distinct ids.
    pub id: String,
    pub heading: String,
    pub body: Vec<Block>,
}

/// A post as it appears on its own page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostDetail {
    pub uid: String,
    pub first_publication_date: Option<String>,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub banner: Banner,
    pub content: Vec<Section>,
}

/// One page of the post list plus the cursor for the page after it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOfPosts {
    /// The backend URL for the next page. `None` (or an empty string) means
    /// this is the last page.
    pub next_page: Option<String>,
    pub results: Vec<PostSummary>,
}

impl PageOfPosts {
    /// Returns the next-page cursor, treating an empty string as absent.
    pub fn next_page(&self) -> Option<&str> {
        self.next_page.as_deref().filter(|url| !url.is_empty())
    }

    /// Returns whether another page can be loaded.
    pub fn has_more(&self) -> bool {
        self.next_page().is_some()
    }

    /// Returns the page that results from loading `fetched` after `self`:
    /// `fetched`'s results are appended in order and its cursor replaces
    /// ours. Duplicate uids are kept.
    pub fn merged(self, fetched: PageOfPosts) -> PageOfPosts {
        let mut results = self.results;
        results.extend(fetched.results);
        PageOfPosts {
            next_page: fetched.next_page,
            results,
        }
    }

    /// Maps a raw search response into a [`PageOfPosts`].
    pub fn from_response(response: SearchResponse<SummaryFields>) -> Result<PageOfPosts> {
        Ok(PageOfPosts {
            next_page: response.next_page,
            results: response
                .results
                .into_iter()
                .map(PostSummary::from_document)
                .collect::<Result<Vec<PostSummary>>>()?,
        })
    }
}

/// The `data` of a post document when only [`SUMMARY_FIELDS`] are fetched.
#[derive(Clone, Debug, Deserialize)]
pub struct SummaryFields {
    pub title: String,
    pub subtitle: String,
    pub author: String,
}

/// The full `data` of a post document.
#[derive(Clone, Debug, Deserialize)]
pub struct DetailFields {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    pub author: String,
    #[serde(default)]
    pub banner: Banner,
    #[serde(default)]
    pub content: Vec<SectionFields>,
}

/// A raw content section. Missing or malformed bodies are treated as empty.
#[derive(Clone, Debug, Deserialize)]
pub struct SectionFields {
    #[serde(default)]
    pub heading: String,
    #[serde(default, deserialize_with = "richtext::deserialize_body")]
    pub body: Vec<Block>,
}

fn require_uid(id: &str, uid: Option<String>) -> Result<String> {
    match uid {
        Some(uid) if !uid.is_empty() => Ok(uid),
        _ => Err(Error::InvalidDocument {
            id: id.to_owned(),
            reason: String::from("missing uid"),
        }),
    }
}

impl PostSummary {
    /// Maps a raw summary document. Fails if the document has no uid.
    pub fn from_document(doc: Document<SummaryFields>) -> Result<PostSummary> {
        Ok(PostSummary {
            uid: require_uid(&doc.id, doc.uid)?,
            first_publication_date: doc.first_publication_date,
            title: doc.data.title,
            subtitle: doc.data.subtitle,
            author: doc.data.author,
        })
    }

    /// Converts a [`PostSummary`] into a template [`Value`]. The result is a
    /// [`Value::Object`] with the fields `uid`, `url`, `title`, `subtitle`,
    /// `author` and `date`. Text fields are HTML-escaped.
    pub fn to_value(&self, site_root: &str, date_format: &DateFormat) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("uid".to_owned(), Value::String(escape(&self.uid)));
        m.insert(
            "url".to_owned(),
            Value::String(escape(&post_url(site_root, &self.uid))),
        );
        m.insert("title".to_owned(), Value::String(escape(&self.title)));
        m.insert("subtitle".to_owned(), Value::String(escape(&self.subtitle)));
        m.insert("author".to_owned(), Value::String(escape(&self.author)));
        m.insert(
            "date".to_owned(),
            Value::String(escape(
                &date_format.format(self.first_publication_date.as_deref()),
            )),
        );
        Value::Object(m)
    }
}

impl PostDetail {
    /// Maps a raw detail document, assigning each section its id.
    pub fn from_document(doc: Document<DetailFields>) -> Result<PostDetail> {
        Ok(PostDetail {
            uid: require_uid(&doc.id, doc.uid)?,
            first_publication_date: doc.first_publication_date,
            title: doc.data.title,
            subtitle: doc.data.subtitle,
            author: doc.data.author,
            banner: doc.data.banner,
            content: doc
                .data
                .content
                .into_iter()
                .enumerate()
                .map(|(i, section)| Section {
                    id: section_id(i, &section.heading),
                    heading: section.heading,
                    body: section.body,
                })
                .collect(),
        })
    }

    /// Projects the detail shape down to the list shape.
    pub fn summary(&self) -> PostSummary {
        PostSummary {
            uid: self.uid.clone(),
            first_publication_date: self.first_publication_date.clone(),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            author: self.author.clone(),
        }
    }

    /// Estimated reading time in minutes across all section bodies.
    pub fn reading_time(&self) -> usize {
        richtext::reading_time(self.content.iter().map(|section| section.body.as_slice()))
    }

    /// Converts a [`PostDetail`] into a template [`Value`]. On top of the
    /// summary fields (see [`PostSummary::to_value`]) the object carries
    /// `banner_url`, `banner_alt`, `reading_time` and `sections`, where each
    /// section has an `id`, a `heading` and a list of `paragraphs`.
    pub fn to_value(&self, site_root: &str, date_format: &DateFormat) -> Value {
        let mut value = self.summary().to_value(site_root, date_format);
        if let Value::Object(m) = &mut value {
            m.insert(
                "banner_url".to_owned(),
                Value::String(escape(&self.banner.url)),
            );
            m.insert(
                "banner_alt".to_owned(),
                Value::String(escape(&self.banner.alt)),
            );
            m.insert(
                "reading_time".to_owned(),
                Value::String(format!("{} min", self.reading_time())),
            );
            m.insert(
                "sections".to_owned(),
                Value::Array(self.content.iter().map(Section::to_value).collect()),
            );
        }
        value
    }
}

impl Section {
    fn to_value(&self) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("id".to_owned(), Value::String(escape(&self.id)));
        m.insert("heading".to_owned(), Value::String(escape(&self.heading)));
        m.insert(
            "paragraphs".to_owned(),
            Value::Array(
                self.body
                    .iter()
                    .map(|block| Value::String(escape(&block.text)))
                    .collect(),
            ),
        );
        Value::Object(m)
    }
}

/// Returns the URL of a post page relative to the site root. `site_root`
/// should end in a trailing slash.
pub fn post_url(site_root: &str, uid: &str) -> String {
    format!("{}posts/{}.html", site_root, uid)
}

fn section_id(position: usize, heading: &str) -> String {
    let slug = slug::slugify(heading);
    if slug.is_empty() {
        format!("section-{}", position)
    } else {
        format!("section-{}-{}", position, slug)
    }
}
