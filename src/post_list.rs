use std::{fs, io};
use std::path::{Path, PathBuf};

use crate::text_utils::POST_EXTENSION;

/// Post files of one language directory.
pub struct PostList {
    pub root_dir: PathBuf,
}

impl PostList {
    pub fn new(root_dir: &Path) -> Self {
        PostList {
            root_dir: root_dir.to_path_buf(),
        }
    }

    /// Every `*.md` regular file directly inside the directory, sorted by
    /// file name. A missing directory has no posts.
    pub fn retrieve_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.root_dir.as_path()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut posts = vec![];
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str() {
                // Temp files of an interrupted write start with a dot
                if !file_name.starts_with('.') && file_name.ends_with(&format!(".{}", POST_EXTENSION)) {
                    posts.push(entry.path());
                }
            }
        }
        posts.sort();
        Ok(posts)
    }

    /// File names without the extension, as used to pair translations.
    pub fn retrieve_stems(&self) -> io::Result<Vec<String>> {
        Ok(self.retrieve_files()?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()))
            .collect())
    }

    pub fn file_names(&self) -> io::Result<Vec<String>> {
        Ok(self.retrieve_files()?
            .iter()
            .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(|s| s.to_string()))
            .collect())
    }
}
