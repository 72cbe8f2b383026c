use anyhow::{anyhow, Result};
use pulldown_cmark::escape::escape_html;
use std::fs::File;
use std::path::Path;

pub fn open(path: &Path, kind: &str) -> Result<File> {
    match File::open(path) {
        Err(e) => Err(anyhow!("Opening {} file `{}`: {}", kind, path.display(), e)),
        Ok(file) => Ok(file),
    }
}

/// Escapes `s` for use as HTML text or as a quoted attribute value.
pub fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    // writing into a `String` can't fail
    let _ = escape_html(&mut escaped, s);
    escaped
}
