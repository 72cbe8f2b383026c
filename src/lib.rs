//! The library code for the `ogham` static blog generator. Posts live in a
//! Prismic repository; `ogham` turns them into a list page and one page per
//! post. The architecture can be generally broken down into three parts:
//!
//! 1. Fetching content from the backend and mapping it into view-ready posts
//!    ([`crate::prismic`], [`crate::post`])
//! 2. Deciding which pages exist and what data they're rendered from
//!    ([`crate::generate`]), then rendering them ([`crate::write`])
//! 3. Growing the post list one page at a time ([`crate::list`])
//!
//! Pages are either written to disk ahead of time ([`crate::build`]) or
//! served over HTTP ([`crate::serve`]). When serving, the list page is
//! refreshed once it goes stale and posts published after startup are
//! rendered on their first request.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod build;
pub mod comments;
pub mod config;
pub mod date;
pub mod generate;
pub mod list;
pub mod post;
pub mod prismic;
pub mod richtext;
pub mod serve;
pub mod write;

mod util;
