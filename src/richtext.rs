//! Plain-text handling for Prismic rich-text fields. Post bodies arrive as a
//! list of rich-text nodes (paragraphs, headings, list items, ...). We only
//! ever need their text: for rendering paragraphs and for estimating how long
//! a post takes to read.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The reading speed used by [`reading_time`], in words per minute.
pub const WORDS_PER_MINUTE: usize = 200;

/// A single rich-text node. Formatting spans are dropped on ingestion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The node type as reported by the backend (`paragraph`, `heading2`,
    /// `list-item`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,

    /// The node's text with all formatting removed.
    #[serde(default)]
    pub text: String,
}

/// Deserializes a rich-text body. Anything other than a list of nodes reads as
/// an empty body, and nodes that don't look like nodes are dropped.
pub fn deserialize_body<'de, D>(deserializer: D) -> Result<Vec<Block>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(nodes) => nodes
            .into_iter()
            .filter_map(|node| serde_json::from_value(node).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Concatenates the text of `blocks`, separating nodes with a single space.
pub fn as_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| block.text.as_str())
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Counts the whitespace-separated words in `blocks`.
pub fn word_count(blocks: &[Block]) -> usize {
    blocks
        .iter()
        .map(|block| block.text.split_whitespace().count())
        .sum()
}

/// Estimates the reading time in whole minutes (rounded up) for a sequence of
/// rich-text bodies.
pub fn reading_time<'a>(bodies: impl IntoIterator<Item = &'a [Block]>) -> usize {
    let words: usize = bodies.into_iter().map(word_count).sum();
    (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE
}

#[cfg(test)]
mod test {
    use super::*;

    fn paragraph(text: &str) -> Block {
        Block {
            kind: String::from("paragraph"),
            text: text.to_owned(),
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_as_text_joins_blocks() {
        let blocks = vec![paragraph("Hello,"), paragraph("world!")];
        assert_eq!("Hello, world!", as_text(&blocks));
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        let blocks = vec![paragraph("  one   two\tthree \n"), paragraph("")];
        assert_eq!(3, word_count(&blocks));
    }

    #[test]
    fn test_reading_time_empty() {
        assert_eq!(0, reading_time(Vec::<&[Block]>::new()));
        let empty: Vec<Block> = Vec::new();
        assert_eq!(0, reading_time(vec![empty.as_slice()]));
    }

    #[test]
    fn test_reading_time_rounds_up() {
        let exact = vec![paragraph(&words(200))];
        let over = vec![paragraph(&words(201))];
        let one = vec![paragraph("lonely")];
        assert_eq!(1, reading_time(vec![exact.as_slice()]));
        assert_eq!(2, reading_time(vec![over.as_slice()]));
        assert_eq!(1, reading_time(vec![one.as_slice()]));
    }

    #[test]
    fn test_reading_time_spans_sections() {
        let first = vec![paragraph(&words(150))];
        let second = vec![paragraph(&words(150))];
        assert_eq!(2, reading_time(vec![first.as_slice(), second.as_slice()]));
    }

    #[derive(Deserialize)]
    struct Body {
        #[serde(default, deserialize_with = "deserialize_body")]
        body: Vec<Block>,
    }

    #[test]
    fn test_malformed_body_is_empty() -> serde_json::Result<()> {
        for json in [r#"{"body": "oops"}"#, r#"{"body": null}"#, r#"{"body": {}}"#, "{}"] {
            let body: Body = serde_json::from_str(json)?;
            assert_eq!(0, reading_time(vec![body.body.as_slice()]), "{}", json);
        }
        let body: Body = serde_json::from_str(r#"{"body": [{"text": 7}, {"text": "one two"}]}"#)?;
        assert_eq!(1, body.body.len());
        assert_eq!("one two", body.body[0].text);
        Ok(())
    }

    #[test]
    fn test_block_missing_fields_default() -> serde_json::Result<()> {
        let block: Block = serde_json::from_str(r#"{"spans": []}"#)?;
        assert_eq!(Block::default(), block);
        Ok(())
    }
}
