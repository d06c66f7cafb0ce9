use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use spdlog::{debug, warn};

use crate::error::{Result, StoreError};
use crate::front_matter;
use crate::paginator::Paginator;
use crate::post::{Language, Post, PostSummary};
use crate::post_list::PostList;
use crate::text_utils::{format_post_file_name, parse_post_file_name, slug_from_title, validate_file_name};

pub const DEFAULT_CONTENT_DIR: &str = "content";
const POST_DIR: &str = "post";

#[derive(Debug, Clone)]
pub struct ListFilter {
    /// None lists every language
    pub language: Option<Language>,
    pub tag: Option<String>,
    pub include_drafts: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        ListFilter {
            language: None,
            tag: None,
            include_drafts: true,
            limit: None,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostPage {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
    pub posts: Vec<PostSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub post: Post,
    /// Occurrences of the query in title and body
    pub matches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationStatus {
    pub source: Language,
    pub target: Language,
    pub source_count: usize,
    pub target_count: usize,
    /// Posts of the source language with no counterpart in the target one
    pub needs_translation: Vec<String>,
    pub target_only: Vec<String>,
    pub synced: bool,
}

/// Posts stored as files under `<root>/<content_dir>/<language>/post/`.
///
/// Reads need no lock. Writes are only issued by the content store, which
/// holds the repository lock while doing so.
pub struct PostRepository {
    root: PathBuf,
    content_dir: PathBuf,
    default_offset: FixedOffset,
}

impl PostRepository {
    pub fn new(root: &Path, content_dir: &Path, default_offset: FixedOffset) -> Self {
        PostRepository {
            root: root.to_path_buf(),
            content_dir: content_dir.to_path_buf(),
            default_offset,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_offset(&self) -> FixedOffset {
        self.default_offset
    }

    pub fn language_dir(&self, language: Language) -> PathBuf {
        self.root.join(&self.content_dir).join(language.code()).join(POST_DIR)
    }

    pub fn post_path(&self, filename: &str, language: Language) -> Result<PathBuf> {
        validate_file_name(filename)?;
        Ok(self.language_dir(language).join(filename))
    }

    /// Path of the post relative to the working tree, with `/` separators,
    /// as git reports it.
    pub fn relative_path(&self, filename: &str, language: Language) -> String {
        let mut parts: Vec<String> = self.content_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        parts.push(language.code().to_string());
        parts.push(POST_DIR.to_string());
        parts.push(filename.to_string());
        parts.join("/")
    }

    pub fn exists(&self, filename: &str, language: Language) -> Result<bool> {
        Ok(self.post_path(filename, language)?.is_file())
    }

    /// Language directory holding `filename`, without parsing the file.
    pub fn locate(&self, filename: &str, language: Option<Language>) -> Result<Language> {
        for language in languages(language) {
            if self.exists(filename, language)? {
                return Ok(language);
            }
        }
        Err(StoreError::not_found(filename, language))
    }

    pub fn list(&self, filter: &ListFilter) -> Result<PostPage> {
        let mut summaries: Vec<PostSummary> = self.load_all(filter.language)?
            .iter()
            .filter(|p| filter.include_drafts || !p.metadata.draft)
            .filter(|p| match filter.tag {
                Some(ref tag) => p.metadata.tags.iter().any(|t| t == tag),
                None => true,
            })
            .map(|p| p.summary())
            .collect();
        summaries.sort_by(|a, b| newest_first(&a.date, &a.filename, &b.date, &b.filename));

        let paginator = Paginator::from(&summaries, filter.limit);
        Ok(PostPage {
            total: paginator.total(),
            offset: filter.offset,
            limit: paginator.limit(),
            has_more: paginator.has_more(filter.offset),
            posts: paginator.get_window(filter.offset).to_vec(),
        })
    }

    /// Looks the post up in `language`, or in every language in declaration
    /// order when none is given.
    pub fn get(&self, filename: &str, language: Option<Language>) -> Result<Post> {
        validate_file_name(filename)?;
        for language in languages(language) {
            let path = self.language_dir(language).join(filename);
            match fs::read_to_string(&path) {
                Ok(content) => return front_matter::parse_post(&path, language, &content, self.default_offset),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Err(StoreError::not_found(filename, language))
    }

    /// Case insensitive substring search over titles and bodies.
    pub fn search(&self, query: &str, language: Option<Language>) -> Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(StoreError::Validation("search query must not be empty".to_string()));
        }

        let mut hits: Vec<SearchHit> = self.load_all(language)?
            .into_iter()
            .filter_map(|post| {
                let matches = post.title.to_lowercase().matches(&needle).count()
                    + post.body.to_lowercase().matches(&needle).count();
                (matches > 0).then_some(SearchHit { post, matches })
            })
            .collect();
        hits.sort_by(|a, b| newest_first(&a.post.metadata.date, &a.post.filename, &b.post.metadata.date, &b.post.filename));
        Ok(hits)
    }

    /// Writes through a temp file in the same directory and renames it over
    /// the target, so readers see either the old or the new file.
    pub fn write(&self, post: &Post) -> Result<PathBuf> {
        post.validate()?;
        let path = self.post_path(&post.filename, post.language)?;
        let content = front_matter::render_post(post)?;

        let dir = self.language_dir(post.language);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", post.filename, uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, content.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(path, e));
        }

        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Removes `.<name>.<uuid>.tmp` files a crashed `write` left behind, so
    /// the next commit does not pick them up. Must be called with the
    /// repository lock held.
    pub fn remove_stale_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        for language in Language::ALL {
            let dir = self.language_dir(language);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir, e)),
            };
            for entry in entries {
                let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
                if !is_temp_file(&path) {
                    continue;
                }
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                warn!("Removed stale temp file {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn delete(&self, filename: &str, language: Language) -> Result<PathBuf> {
        let path = self.post_path(filename, language)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(filename, Some(language))),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Raw bytes of a post file, None when there is no such file.
    pub fn read_raw(&self, filename: &str, language: Language) -> Result<Option<Vec<u8>>> {
        let path = self.post_path(filename, language)?;
        match fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Puts a file back to a previous state read with [`Self::read_raw`].
    pub fn restore(&self, filename: &str, language: Language, content: Option<&[u8]>) -> Result<()> {
        let path = self.post_path(filename, language)?;
        match content {
            Some(content) => {
                let dir = self.language_dir(language);
                fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
                fs::write(&path, content).map_err(|e| StoreError::io(&path, e))
            }
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::io(path, e)),
            },
        }
    }

    /// `YYYY-MM-DD-NNN-slug.md` with NNN one above the highest sequence
    /// already used on `date`. Must be called with the repository lock held.
    pub fn next_filename(&self, title: &str, date: NaiveDate, language: Language) -> Result<String> {
        let slug = slug_from_title(title);
        let names = self.file_names(language)?;
        let last = names.iter()
            .filter_map(|name| parse_post_file_name(name))
            .filter(|parsed| parsed.date == date)
            .map(|parsed| parsed.sequence)
            .max()
            .unwrap_or(0);
        Ok(format_post_file_name(&date, last + 1, &slug))
    }

    /// Files of `language` generated on `date` from a title with `slug`.
    pub fn same_slug_files(&self, date: NaiveDate, slug: &str, language: Language) -> Result<Vec<String>> {
        Ok(self.file_names(language)?
            .into_iter()
            .filter(|name| match parse_post_file_name(name) {
                Some(parsed) => parsed.date == date && parsed.slug == slug,
                None => false,
            })
            .collect())
    }

    /// Compares file stems of two language directories.
    pub fn translation_status(&self, source: Language, target: Language) -> Result<TranslationStatus> {
        let source_stems = self.stems(source)?;
        let target_stems = self.stems(target)?;

        let needs_translation: Vec<String> = source_stems.iter()
            .filter(|s| !target_stems.contains(s))
            .cloned()
            .collect();
        let target_only: Vec<String> = target_stems.iter()
            .filter(|s| !source_stems.contains(s))
            .cloned()
            .collect();

        Ok(TranslationStatus {
            source,
            target,
            source_count: source_stems.len(),
            target_count: target_stems.len(),
            synced: needs_translation.is_empty() && target_only.is_empty(),
            needs_translation,
            target_only,
        })
    }

    fn file_names(&self, language: Language) -> Result<Vec<String>> {
        let dir = self.language_dir(language);
        PostList::new(&dir).file_names().map_err(|e| StoreError::io(dir, e))
    }

    fn stems(&self, language: Language) -> Result<Vec<String>> {
        let dir = self.language_dir(language);
        PostList::new(&dir).retrieve_stems().map_err(|e| StoreError::io(dir, e))
    }

    /// Every readable post; malformed files are logged and skipped.
    fn load_all(&self, language: Option<Language>) -> Result<Vec<Post>> {
        let mut posts = vec![];
        for language in languages(language) {
            let dir = self.language_dir(language);
            let files = PostList::new(&dir).retrieve_files().map_err(|e| StoreError::io(&dir, e))?;
            for path in files {
                let content = match fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!("Skipping unreadable post {}: {}", path.display(), e);
                        continue;
                    }
                };
                match front_matter::parse_post(&path, language, &content, self.default_offset) {
                    Ok(post) => posts.push(post),
                    Err(e) => warn!("Skipping {}", e),
                }
            }
        }
        Ok(posts)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.is_file() && path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

fn languages(language: Option<Language>) -> Vec<Language> {
    match language {
        Some(language) => vec![language],
        None => Language::ALL.to_vec(),
    }
}

fn newest_first<D: Ord>(a_date: &D, a_name: &str, b_date: &D, b_name: &str) -> Ordering {
    b_date.cmp(a_date).then_with(|| b_name.cmp(a_name))
}
