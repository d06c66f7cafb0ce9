use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::post::Language;
use crate::repository::ListFilter;

#[derive(PartialEq, Debug)]
pub struct QueryString {
    items: HashMap<String, String>,
}

impl QueryString {
    pub fn from(buf: &str) -> Self {
        let vs: Vec<(String, String)> = serde_urlencoded::from_str(buf).unwrap_or_else(|_| vec![]);
        let items: HashMap<String, String> = vs.into_iter().collect();

        QueryString {
            items,
        }
    }

    /// Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn get_language(&self, key: &str) -> Result<Option<Language>> {
        self.get(key).map(|v| v.parse()).transpose()
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|v| v.parse::<usize>().map_err(|_| StoreError::Validation(format!("{} must be a non-negative integer, got {}", key, v))))
            .transpose()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some("false") | Some("0") | Some("no") => Ok(false),
            Some(other) => Err(StoreError::Validation(format!("{} must be true or false, got {}", key, other))),
        }
    }

    /// `language`, `tag`, `include_drafts`, `limit` and `offset`.
    pub fn list_filter(&self) -> Result<ListFilter> {
        Ok(ListFilter {
            language: self.get_language("language")?,
            tag: self.get("tag").map(|t| t.to_string()),
            include_drafts: self.get_bool("include_drafts", true)?,
            limit: self.get_usize("limit")?,
            offset: self.get_usize("offset")?.unwrap_or(0),
        })
    }
}
