use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::error::{Result, StoreError};

pub const TITLE_KEY: &str = "title";
pub const DATE_KEY: &str = "date";
pub const DRAFT_KEY: &str = "draft";
pub const TAGS_KEY: &str = "tags";
pub const CATEGORIES_KEY: &str = "categories";

/// Keys with a typed field in [`Metadata`], in the order new posts get them.
pub const RESERVED_KEYS: [&str; 5] = [TITLE_KEY, DATE_KEY, DRAFT_KEY, TAGS_KEY, CATEGORIES_KEY];

const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ko,
    En,
}

impl Language {
    /// Declaration order is also the lookup order when no language is given.
    pub const ALL: [Language; 2] = [Language::Ko, Language::En];

    pub fn code(&self) -> &'static str {
        match self {
            Language::Ko => "ko",
            Language::En => "en",
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Language {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ko" => Ok(Language::Ko),
            "en" => Ok(Language::En),
            other => Err(StoreError::Validation(format!(
                "unsupported language: {}. Supported: ko, en",
                other
            ))),
        }
    }
}

/// Front matter of a post.
///
/// The reserved keys have typed fields, everything else lands in `extra`.
/// `order` remembers the key sequence read from disk so that a round trip
/// writes the keys back where they were.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub date: DateTime<FixedOffset>,
    pub draft: bool,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub extra: Table,
    #[serde(skip)]
    order: Vec<String>,
}

impl Metadata {
    pub fn new(date: DateTime<FixedOffset>) -> Self {
        Metadata {
            date,
            draft: false,
            tags: vec![],
            categories: vec![],
            extra: Table::new(),
            order: RESERVED_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub(crate) fn with_order(mut self, order: Vec<String>) -> Self {
        self.order = order;
        self
    }

    /// Sets an unrecognized key. New keys go to the end of the block.
    pub fn set_extra(&mut self, key: &str, value: Value) {
        if !self.order.iter().any(|k| k == key) {
            self.order.push(key.to_string());
        }
        self.extra.insert(key.to_string(), value);
    }

    /// Key sequence used when the block is written: the remembered order,
    /// then reserved keys that were missing from it, then extra keys that
    /// were added without going through [`Metadata::set_extra`].
    pub fn key_order(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.order.iter()
            .filter(|k| RESERVED_KEYS.contains(&k.as_str()) || self.extra.contains_key(k.as_str()))
            .cloned()
            .collect();

        for reserved in RESERVED_KEYS {
            if !keys.iter().any(|k| k == reserved) {
                keys.push(reserved.to_string());
            }
        }

        for key in self.extra.keys() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date
            && self.draft == other.draft
            && self.tags == other.tags
            && self.categories == other.categories
            && self.extra == other.extra
            && self.key_order() == other.key_order()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub filename: String,
    pub language: Language,
    pub title: String,
    pub body: String,
    pub metadata: Metadata,
}

impl Display for Post {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "filename={}, language={}, date={}, draft={}\ntitle={}\ntags={}\n",
               self.filename,
               self.language,
               self.metadata.date,
               self.metadata.draft,
               self.title,
               self.metadata.tags.join(" "),
        )
    }
}

impl Post {
    pub fn summary(&self) -> PostSummary {
        PostSummary {
            filename: self.filename.clone(),
            language: self.language,
            title: self.title.clone(),
            date: self.metadata.date,
            tags: self.metadata.tags.clone(),
            draft: self.metadata.draft,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        if self.metadata.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(StoreError::Validation("tags must not be empty strings".to_string()));
        }
        if self.metadata.categories.iter().any(|c| c.trim().is_empty()) {
            return Err(StoreError::Validation("categories must not be empty strings".to_string()));
        }
        Ok(())
    }

    /// Applies the fields present in `patch` over this post.
    pub fn apply(&mut self, patch: PostPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(body) = patch.body {
            self.body = body;
        }
        if let Some(date) = patch.date {
            self.metadata.date = date;
        }
        if let Some(draft) = patch.draft {
            self.metadata.draft = draft;
        }
        if let Some(tags) = patch.tags {
            self.metadata.tags = tags;
        }
        if let Some(categories) = patch.categories {
            self.metadata.categories = categories;
        }
        for (key, value) in patch.extra {
            self.metadata.set_extra(&key, value);
        }
    }
}

pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(StoreError::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(StoreError::Validation(format!("title is longer than {} characters", MAX_TITLE_LEN)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    pub filename: String,
    pub language: Language,
    pub title: String,
    pub date: DateTime<FixedOffset>,
    pub tags: Vec<String>,
    pub draft: bool,
}

/// Input of a create transaction. Absent fields get the store defaults.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub language: Language,
    pub tags: Vec<String>,
    pub categories: Option<Vec<String>>,
    pub draft: bool,
    pub date: Option<DateTime<FixedOffset>>,
    pub filename: Option<String>,
    pub extra: Table,
}

impl NewPost {
    pub fn new(title: &str, body: &str, language: Language) -> Self {
        NewPost {
            title: title.to_string(),
            body: body.to_string(),
            language,
            ..Default::default()
        }
    }
}

/// Input of an update transaction. Only the provided fields change.
#[derive(Debug, Clone, Default)]
pub struct PostPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub draft: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub extra: Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-02-28T10:00:00+09:00").unwrap()
    }

    fn post() -> Post {
        Post {
            filename: "2024-02-28-001-hello-world.md".to_string(),
            language: Language::Ko,
            title: "Hello World".to_string(),
            body: "Body\n".to_string(),
            metadata: Metadata::new(date()),
        }
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("ko".parse::<Language>().unwrap(), Language::Ko);
        assert_eq!(" EN ".parse::<Language>().unwrap(), Language::En);
        assert!(matches!("fr".parse::<Language>(), Err(StoreError::Validation(_))));
        assert_eq!(Language::default(), Language::Ko);
        assert_eq!(Language::En.to_string(), "en");
    }

    #[test]
    fn test_key_order_new_post() {
        let mut metadata = Metadata::new(date());
        metadata.set_extra("ShowToc", Value::Boolean(true));
        metadata.set_extra("TocOpen", Value::Boolean(true));
        assert_eq!(metadata.key_order(), ["title", "date", "draft", "tags", "categories", "ShowToc", "TocOpen"]);
    }

    #[test]
    fn test_key_order_is_kept() {
        let order = ["ShowToc", "date", "title", "tags"].iter().map(|s| s.to_string()).collect();
        let mut metadata = Metadata::new(date()).with_order(order);
        metadata.extra.insert("ShowToc".to_string(), Value::Boolean(false));
        metadata.extra.insert("weight".to_string(), Value::Integer(3));
        assert_eq!(metadata.key_order(), ["ShowToc", "date", "title", "tags", "draft", "categories", "weight"]);
    }

    #[test]
    fn test_apply_patch() {
        let mut post = post();
        let mut extra = Table::new();
        extra.insert("cover".to_string(), Value::String("hello.png".to_string()));
        post.apply(PostPatch {
            body: Some("New body".to_string()),
            tags: Some(vec!["rust".to_string()]),
            extra,
            ..Default::default()
        });

        assert_eq!(post.title, "Hello World");
        assert_eq!(post.body, "New body");
        assert_eq!(post.metadata.tags, ["rust"]);
        assert_eq!(post.metadata.extra.get("cover"), Some(&Value::String("hello.png".to_string())));
        assert_eq!(post.metadata.key_order().last().map(|s| s.as_str()), Some("cover"));
    }

    #[test]
    fn test_validate() {
        let mut post = post();
        assert!(post.validate().is_ok());

        post.title = "   ".to_string();
        assert!(matches!(post.validate(), Err(StoreError::Validation(_))));

        post.title = "x".repeat(201);
        assert!(post.validate().is_err());

        post.title = "ok".to_string();
        post.metadata.tags = vec!["".to_string()];
        assert!(post.validate().is_err());
    }
}
