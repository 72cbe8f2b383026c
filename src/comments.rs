//! The comment widget embed. Comments are handled entirely by utterances,
//! which stores them as GitHub issues; all we do is emit its `<script>`
//! element on post pages.

use crate::util::escape;

const SCRIPT_SRC: &str = "https://utteranc.es/client.js";
const ISSUE_TERM: &str = "title";
const LABEL: &str = "blog-comment";
const THEME: &str = "github-dark";

/// Renders the comment widget's `<script>` element.
#[derive(Clone, Debug, Default)]
pub struct CommentsWidget {
    /// The GitHub repository (`owner/name`) backing the comments. When
    /// `None`, the `repo` attribute is left out and the widget is embedded
    /// anyway.
    pub repo: Option<String>,
}

impl CommentsWidget {
    pub fn new(repo: Option<String>) -> CommentsWidget {
        CommentsWidget { repo }
    }

    /// Returns the `<script>` element as HTML.
    pub fn script(&self) -> String {
        let mut attributes = vec![
            ("src", SCRIPT_SRC),
            ("crossorigin", "anonymous"),
            ("async", "true"),
        ];
        if let Some(repo) = &self.repo {
            attributes.push(("repo", repo.as_str()));
        }
        attributes.push(("issue-term", ISSUE_TERM));
        attributes.push(("label", LABEL));
        attributes.push(("theme", THEME));

        let rendered: Vec<String> = attributes
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", name, escape(value)))
            .collect();
        format!("<script {}></script>", rendered.join(" "))
    }
}
