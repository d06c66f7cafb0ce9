use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, StoreError};

pub const POST_EXTENSION: &str = "md";
const MAX_SLUG_LEN: usize = 50;
const EMPTY_SLUG: &str = "post";

lazy_static! {
    static ref POST_FILE_REGEX: Regex = Regex::new(
        r"^(?P<date>\d{4}-\d{2}-\d{2})-(?P<seq>\d{3,})-(?P<slug>.+)\.md$"
    ).unwrap();
    static ref SAFE_FILE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*\.md$").unwrap();
}

/// Parts of a generated post file name: `YYYY-MM-DD-NNN-slug.md`.
#[derive(Debug, PartialEq)]
pub struct PostFileName<'a> {
    pub date: NaiveDate,
    pub sequence: u32,
    pub slug: &'a str,
}

pub fn parse_post_file_name(file_name: &str) -> Option<PostFileName<'_>> {
    let caps = POST_FILE_REGEX.captures(file_name)?;
    let date = NaiveDate::parse_from_str(caps.name("date")?.as_str(), "%Y-%m-%d").ok()?;
    let sequence = caps.name("seq")?.as_str().parse::<u32>().ok()?;
    let slug = caps.name("slug")?.as_str();
    Some(PostFileName { date, sequence, slug })
}

pub fn format_post_file_name(date: &NaiveDate, sequence: u32, slug: &str) -> String {
    format!("{}-{:03}-{}.{}", date.format("%Y-%m-%d"), sequence, slug, POST_EXTENSION)
}

/// Lowercase ASCII slug: non-alphanumeric runs become one hyphen, no hyphen
/// at either end, at most 50 characters.
pub fn slug_from_title(title: &str) -> String {
    let ascii = unidecode::unidecode(title);

    let mut slug = String::new();
    let mut prev_hyphen = true;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_hyphen = false;
        } else if !prev_hyphen {
            slug.push('-');
            prev_hyphen = true;
        }
    }

    // Only ASCII is left, so byte truncation is safe
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Rejects anything that is not a bare post file name, so caller supplied
/// names can never escape the language directory.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    if file_name.contains("..") || !SAFE_FILE_REGEX.is_match(file_name) {
        return Err(StoreError::Validation(format!("invalid post file name: {}", file_name)));
    }
    Ok(())
}
