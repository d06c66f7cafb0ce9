use std::path::Path;

use chrono::FixedOffset;
use toml::{Table, Value};

use crate::error::{Result, StoreError};
use crate::post::{Language, Metadata, Post, CATEGORIES_KEY, DATE_KEY, DRAFT_KEY, TAGS_KEY, TITLE_KEY};
use crate::util::toml_date;

pub const DELIMITER: &str = "+++";

/// Example of post
/// +++
/// title = "Hello World"
/// date = 2024-02-28T10:00:00+09:00
/// draft = false
/// tags = ["rust"]
/// categories = ["Development"]
/// ShowToc = true
/// +++
///
/// Body in markdown
pub fn render_post(post: &Post) -> Result<String> {
    let table = to_table(&post.title, &post.metadata);
    let block = toml::to_string(&table)
        .map_err(|e| StoreError::Validation(format!("cannot encode front matter of {}: {}", post.filename, e)))?;

    let mut buf = String::with_capacity(block.len() + post.body.len() + 16);
    buf.push_str(DELIMITER);
    buf.push('\n');
    buf.push_str(&block);
    if !block.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(DELIMITER);
    buf.push_str("\n\n");
    buf.push_str(&post.body);
    Ok(buf)
}

pub fn parse_post(file_path: &Path, language: Language, content: &str, default_offset: FixedOffset) -> Result<Post> {
    let invalid = |reason: String| StoreError::InvalidPost {
        path: file_path.to_path_buf(),
        reason,
    };

    let (block, body) = split_front_matter(content).ok_or_else(|| invalid("missing +++ front matter".to_string()))?;
    let table: Table = toml::from_str(block).map_err(|e| invalid(format!("front matter is not valid TOML: {}", e)))?;
    let (title, metadata) = from_table(table, default_offset).map_err(invalid)?;

    let filename = file_path.file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| invalid("file name is not valid UTF-8".to_string()))?
        .to_string();

    Ok(Post {
        filename,
        language,
        title,
        body: body.to_string(),
        metadata,
    })
}

/// Returns the TOML block and the body. The single blank line written by
/// [`render_post`] after the closing delimiter is not part of the body.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content.strip_prefix(DELIMITER)?;
    let rest = strip_newline(rest)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            let block = &rest[..offset];
            let after = &rest[offset + line.len()..];
            let body = strip_newline(after).unwrap_or(after);
            return Some((block, body));
        }
        offset += line.len();
    }
    None
}

fn strip_newline(s: &str) -> Option<&str> {
    s.strip_prefix("\r\n").or_else(|| s.strip_prefix('\n'))
}

fn to_table(title: &str, metadata: &Metadata) -> Table {
    let mut table = Table::new();
    for key in metadata.key_order() {
        let value = match key.as_str() {
            TITLE_KEY => Value::String(title.to_string()),
            DATE_KEY => Value::Datetime(toml_date::to_toml(&metadata.date)),
            DRAFT_KEY => Value::Boolean(metadata.draft),
            TAGS_KEY => string_array(&metadata.tags),
            CATEGORIES_KEY => string_array(&metadata.categories),
            other => match metadata.extra.get(other) {
                Some(value) => value.clone(),
                None => continue,
            },
        };
        table.insert(key, value);
    }
    table
}

fn from_table(table: Table, default_offset: FixedOffset) -> std::result::Result<(String, Metadata), String> {
    let order: Vec<String> = table.keys().cloned().collect();

    let mut title = None;
    let mut date = None;
    let mut draft = false;
    let mut tags = vec![];
    let mut categories = vec![];
    let mut extra = Table::new();

    for (key, value) in table {
        match key.as_str() {
            TITLE_KEY => match value {
                Value::String(s) => title = Some(s),
                other => return Err(format!("title must be a string, found {}", other.type_str())),
            },
            DATE_KEY => match value {
                Value::Datetime(d) => date = Some(toml_date::from_toml(&d, default_offset)?),
                Value::String(s) => {
                    let d = s.parse().map_err(|e| format!("invalid date {}: {}", s, e))?;
                    date = Some(toml_date::from_toml(&d, default_offset)?)
                }
                other => return Err(format!("date must be a datetime, found {}", other.type_str())),
            },
            DRAFT_KEY => match value {
                Value::Boolean(b) => draft = b,
                other => return Err(format!("draft must be a boolean, found {}", other.type_str())),
            },
            TAGS_KEY => tags = strings(TAGS_KEY, value)?,
            CATEGORIES_KEY => categories = strings(CATEGORIES_KEY, value)?,
            _ => {
                extra.insert(key, value);
            }
        }
    }

    let title = title.ok_or_else(|| "title is missing".to_string())?;
    let date = date.ok_or_else(|| "date is missing".to_string())?;

    let mut metadata = Metadata::new(date).with_order(order);
    metadata.draft = draft;
    metadata.tags = tags;
    metadata.categories = categories;
    metadata.extra = extra;

    Ok((title, metadata))
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
}

fn strings(key: &str, value: Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items.into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(format!("{} must only contain strings, found {}", key, other.type_str())),
            })
            .collect(),
        other => Err(format!("{} must be an array, found {}", key, other.type_str())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::DateTime;

    use super::*;

    const POST_DATA: &str = r#"+++
title = "What I learned after 20+ years of software development"
date = 2022-04-02T12:05:00+09:00
draft = false
tags = ["career", "engineering"]
categories = ["Development"]
ShowToc = true
TocOpen = true
+++

How to be a great software engineer?

Someone asked me this question today and I didn't have an answer.
"#;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn path() -> PathBuf {
        PathBuf::from("content/ko/post/2022-04-02-001-what-i-learned.md")
    }

    #[test]
    fn test_parse_post() {
        let post = parse_post(&path(), Language::Ko, POST_DATA, offset()).unwrap();
        assert_eq!(post.filename, "2022-04-02-001-what-i-learned.md");
        assert_eq!(post.title, "What I learned after 20+ years of software development");
        assert_eq!(post.metadata.date, DateTime::parse_from_rfc3339("2022-04-02T12:05:00+09:00").unwrap());
        assert!(!post.metadata.draft);
        assert_eq!(post.metadata.tags, ["career", "engineering"]);
        assert_eq!(post.metadata.categories, ["Development"]);
        assert_eq!(post.metadata.extra.get("ShowToc"), Some(&Value::Boolean(true)));
        assert!(post.body.starts_with("How to be a great software engineer?"));
    }

    #[test]
    fn test_render_is_byte_identical() {
        let post = parse_post(&path(), Language::Ko, POST_DATA, offset()).unwrap();
        assert_eq!(render_post(&post).unwrap(), POST_DATA);
    }

    #[test]
    fn test_unknown_keys_keep_their_place() {
        let content = "+++\nweight = 3\ntitle = \"T\"\ncustom = \"x\"\ndate = 2024-01-01T00:00:00+09:00\n+++\n\nbody";
        let post = parse_post(&path(), Language::En, content, offset()).unwrap();
        assert_eq!(post.metadata.key_order(), ["weight", "title", "custom", "date", "draft", "tags", "categories"]);

        let rendered = render_post(&post).unwrap();
        let reparsed = parse_post(&path(), Language::En, &rendered, offset()).unwrap();
        assert_eq!(reparsed, post);
        assert_eq!(reparsed.title, "T");
        assert_eq!(reparsed.body, "body");
        assert_eq!(reparsed.metadata.extra.get("custom"), Some(&Value::String("x".to_string())));
        assert!(rendered.starts_with("+++\nweight = 3\ntitle = \"T\"\ncustom = \"x\"\n"));
    }

    #[test]
    fn test_body_with_leading_blank_lines() {
        let mut post = parse_post(&path(), Language::Ko, POST_DATA, offset()).unwrap();
        post.body = "\n\n+++\nnot front matter\n".to_string();
        let rendered = render_post(&post).unwrap();
        let reparsed = parse_post(&path(), Language::Ko, &rendered, offset()).unwrap();
        assert_eq!(reparsed, post);
    }

    #[test]
    fn test_empty_body() {
        let mut post = parse_post(&path(), Language::Ko, POST_DATA, offset()).unwrap();
        post.body = String::new();
        let rendered = render_post(&post).unwrap();
        assert!(rendered.ends_with("+++\n\n"));
        assert_eq!(parse_post(&path(), Language::Ko, &rendered, offset()).unwrap().body, "");
    }

    #[test]
    fn test_crlf() {
        let content = "+++\r\ntitle = \"T\"\r\ndate = 2024-01-01\r\n+++\r\n\r\nbody\r\n";
        let post = parse_post(&path(), Language::Ko, content, offset()).unwrap();
        assert_eq!(post.title, "T");
        assert_eq!(post.body, "body\r\n");
        assert_eq!(post.metadata.date.to_rfc3339(), "2024-01-01T00:00:00+09:00");
    }

    #[test]
    fn test_invalid_posts() {
        let missing = parse_post(&path(), Language::Ko, "# Just markdown", offset());
        assert!(matches!(missing, Err(StoreError::InvalidPost { .. })));

        let unterminated = parse_post(&path(), Language::Ko, "+++\ntitle = \"T\"\n", offset());
        assert!(matches!(unterminated, Err(StoreError::InvalidPost { .. })));

        let no_title = parse_post(&path(), Language::Ko, "+++\ndate = 2024-01-01\n+++\n", offset());
        assert!(matches!(no_title, Err(StoreError::InvalidPost { .. })));

        let bad_tags = parse_post(&path(), Language::Ko, "+++\ntitle = \"T\"\ndate = 2024-01-01\ntags = [1]\n+++\n", offset());
        assert!(matches!(bad_tags, Err(StoreError::InvalidPost { .. })));
    }
}
