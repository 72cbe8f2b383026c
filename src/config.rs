use crate::date::{DateFormat, DEFAULT_LOCALE, DEFAULT_PATTERN};
use crate::generate::{DEFAULT_PAGE_SIZE, DEFAULT_REVALIDATE};
use crate::list::DEFAULT_LOAD_TIMEOUT;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// The project file searched for by [`Config::from_directory`].
pub const PROJECT_FILE_NAME: &str = "ogham.yaml";

/// Overrides `access_token` from the project file.
pub const ACCESS_TOKEN_VAR: &str = "PRISMIC_ACCESS_TOKEN";

/// Overrides `comments_repo` from the project file.
pub const COMMENTS_REPO_VAR: &str = "GITHUB_COMMENTS";

#[derive(Deserialize)]
struct PageSize(u32);
impl Default for PageSize {
    fn default() -> Self {
        PageSize(DEFAULT_PAGE_SIZE)
    }
}

#[derive(Deserialize)]
struct Seconds(u64);
impl Seconds {
    fn or(value: Option<Seconds>, default: Duration) -> Duration {
        match value {
            Some(Seconds(secs)) => Duration::from_secs(secs),
            None => default,
        }
    }
}

#[derive(Deserialize)]
struct Project {
    pub api_endpoint: Url,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub page_size: PageSize,

    #[serde(default)]
    pub revalidate_seconds: Option<Seconds>,

    #[serde(default)]
    pub request_timeout_seconds: Option<Seconds>,

    #[serde(default)]
    pub comments_repo: Option<String>,

    #[serde(default)]
    pub date_format: Option<String>,

    #[serde(default)]
    pub date_locale: Option<String>,

    #[serde(default)]
    pub site_root: Option<String>,
}

#[derive(Deserialize)]
struct Theme {
    list_template: Vec<PathBuf>,
    post_template: Vec<PathBuf>,
    fallback_template: Vec<PathBuf>,
}

pub struct Config {
    pub api_endpoint: Url,
    pub access_token: Option<String>,
    pub page_size: u32,
    pub revalidate: Duration,
    pub request_timeout: Duration,
    pub comments_repo: Option<String>,
    pub date_format: DateFormat,
    pub site_root: String,
    pub list_template: Vec<PathBuf>,
    pub post_template: Vec<PathBuf>,
    pub fallback_template: Vec<PathBuf>,
    pub static_source_directory: PathBuf,
    pub output_directory: PathBuf,
}

impl Config {
    /// Looks for [`PROJECT_FILE_NAME`] in `dir` and then in each of its
    /// ancestors.
    pub fn from_directory(dir: &Path, output_directory: &Path) -> Result<Config> {
        let path = dir.join(PROJECT_FILE_NAME);
        if path.exists() {
            match Config::from_project_file(&path, output_directory) {
                Ok(config) => Ok(config),
                Err(e) => Err(anyhow!("Loading configuration: {:?}", e)),
            }
        } else {
            match dir.parent() {
                Some(dir) => Config::from_directory(dir, output_directory),
                None => Err(anyhow!(
                    "Could not find `{}` in any parent directory",
                    PROJECT_FILE_NAME
                )),
            }
        }
    }

    pub fn from_project_file(path: &Path, output_directory: &Path) -> Result<Config> {
        use crate::util::open;
        let project: Project = serde_yaml::from_reader(open(path, "project")?)?;
        match path.parent() {
            None => Err(anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )),
            Some(project_root) => {
                let theme_dir = project_root.join("theme");
                let theme_file = open(&theme_dir.join("theme.yaml"), "theme")?;
                let theme: Theme = serde_yaml::from_reader(theme_file)?;

                let pattern = project.date_format.as_deref().unwrap_or(DEFAULT_PATTERN);
                let locale = project.date_locale.as_deref().unwrap_or(DEFAULT_LOCALE);
                let date_format = DateFormat::new(pattern, locale)?;

                let mut site_root = project.site_root.unwrap_or_else(|| String::from("/"));
                if !site_root.ends_with('/') {
                    site_root.push('/');
                }

                Ok(Config {
                    api_endpoint: project.api_endpoint,
                    access_token: project.access_token,
                    page_size: project.page_size.0,
                    revalidate: Seconds::or(project.revalidate_seconds, DEFAULT_REVALIDATE),
                    request_timeout: Seconds::or(
                        project.request_timeout_seconds,
                        DEFAULT_LOAD_TIMEOUT,
                    ),
                    comments_repo: project.comments_repo,
                    date_format,
                    site_root,
                    list_template: theme
                        .list_template
                        .iter()
                        .map(|relpath| theme_dir.join(relpath))
                        .collect(),
                    post_template: theme
                        .post_template
                        .iter()
                        .map(|relpath| theme_dir.join(relpath))
                        .collect(),
                    fallback_template: theme
                        .fallback_template
                        .iter()
                        .map(|relpath| theme_dir.join(relpath))
                        .collect(),
                    static_source_directory: theme_dir.join("static"),
                    output_directory: output_directory.to_owned(),
                })
            }
        }
    }

    /// Applies environment overrides. `lookup` is usually
    /// `|name| std::env::var(name).ok()`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Config {
        if let Some(token) = lookup(ACCESS_TOKEN_VAR) {
            self.access_token = Some(token);
        }
        if let Some(repo) = lookup(COMMENTS_REPO_VAR) {
            self.comments_repo = Some(repo);
        }
        self
    }

    /// The URL prefix for theme assets.
    pub fn static_url(&self) -> String {
        format!("{}static/", self.site_root)
    }
}
