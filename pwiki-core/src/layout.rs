//! On-disk layout shared by the working store and the persistent store
//!
//! Layout:
//! ```text
//! {root}/
//!   {title}.txt               page body
//!   {title}.files.txt         attachment listing, one filename per line
//!   files/{title}/{filename}  attachment blobs
//! ```

use crate::error::{IoContext, Result, StoreError};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

/// Suffix of a page body file.
pub const BODY_SUFFIX: &str = ".txt";
/// Suffix of an attachment listing file.
pub const LISTING_SUFFIX: &str = ".files.txt";
/// Directory (under the root) holding one attachment directory per page.
pub const ATTACHMENTS_DIR: &str = "files";

fn title_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[a-zA-Z0-9]+$").expect("static title pattern"))
}

/// Check a page title against the `[a-zA-Z0-9]+` grammar.
pub fn validate_title(title: &str) -> Result<()> {
    if title_pattern().is_match(title) {
        Ok(())
    } else {
        Err(StoreError::InvalidTitle(title.to_string()))
    }
}

/// Check that an attachment filename is a single plain path component.
pub fn validate_filename(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0', '\n', '\r']);
    if bad {
        Err(StoreError::InvalidFilename(name.to_string()))
    } else {
        Ok(())
    }
}

/// Parse a metadata listing.
///
/// Empty lines (including the one a trailing newline produces) and repeated
/// names are dropped; first occurrence order is kept.
pub fn parse_listing(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// Render a metadata listing: names joined by `\n`, no trailing newline.
pub fn render_listing(names: &[String]) -> String {
    names.join("\n")
}

/// Path helpers and enumeration for one store root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn body_path(&self, title: &str) -> PathBuf {
        self.root.join(format!("{}{}", title, BODY_SUFFIX))
    }

    pub fn listing_path(&self, title: &str) -> PathBuf {
        self.root.join(format!("{}{}", title, LISTING_SUFFIX))
    }

    pub fn attachments_root(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    pub fn attachment_dir(&self, title: &str) -> PathBuf {
        self.attachments_root().join(title)
    }

    pub fn blob_path(&self, title: &str, filename: &str) -> PathBuf {
        self.attachment_dir(title).join(filename)
    }

    /// Titles of every page body in the root, sorted.
    ///
    /// A missing root yields `DirectoryUnavailable`.
    pub fn titles(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::DirectoryUnavailable(self.root.clone()));
            }
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut titles = Vec::new();
        for entry in entries {
            let entry = entry.at(&self.root)?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry_name(&entry) else { continue };
            if name.ends_with(LISTING_SUFFIX) {
                continue;
            }
            if let Some(title) = name.strip_suffix(BODY_SUFFIX) {
                if !title.is_empty() {
                    titles.push(title.to_string());
                }
            }
        }
        titles.sort();
        Ok(titles)
    }

    /// Titles that have a listing file, sorted.
    ///
    /// A missing root is simply empty.
    pub fn listing_titles(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut titles = Vec::new();
        for entry in entries {
            let entry = entry.at(&self.root)?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry_name(&entry) else { continue };
            if let Some(title) = name.strip_suffix(LISTING_SUFFIX) {
                if !title.is_empty() {
                    titles.push(title.to_string());
                }
            }
        }
        titles.sort();
        Ok(titles)
    }

    /// Titles that have an attachment directory, sorted.
    ///
    /// A missing `files/` root is simply empty.
    pub fn attachment_titles(&self) -> Result<Vec<String>> {
        let dir = self.attachments_root();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut titles = Vec::new();
        for entry in entries {
            let entry = entry.at(&dir)?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry_name(&entry) {
                titles.push(name);
            }
        }
        titles.sort();
        Ok(titles)
    }

    /// Blob filenames in a page's attachment directory, sorted.
    ///
    /// Subdirectories are ignored; a missing directory is empty.
    pub fn blob_names(&self, title: &str) -> Result<Vec<String>> {
        let dir = self.attachment_dir(title);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.at(&dir)?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            if let Some(name) = entry_name(&entry) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a page body. A missing file is `NotFound(title)`.
    pub fn read_body(&self, title: &str) -> Result<Vec<u8>> {
        let path = self.body_path(title);
        match fs::read(&path) {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(title.to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Read a page's listing; absent means no attachments.
    pub fn read_listing(&self, title: &str) -> Result<Option<Vec<String>>> {
        let path = self.listing_path(title);
        match fs::read(&path) {
            Ok(content) => Ok(Some(parse_listing(&String::from_utf8_lossy(&content)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Write a page's listing; an empty set removes the listing file.
    pub fn write_listing(&self, title: &str, names: &[String]) -> Result<()> {
        let path = self.listing_path(title);
        if names.is_empty() {
            return remove_file_if_exists(&path);
        }
        write_durable(&path, render_listing(names).as_bytes())
    }
}

/// Name of a directory entry; names that are not UTF-8 are logged and skipped.
fn entry_name(entry: &fs::DirEntry) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) => Some(name),
        Err(_) => {
            warn!("Skipping {:?}: name is not valid UTF-8", entry.path());
            None
        }
    }
}

/// Copy `src` over `dst` byte for byte and force it to disk.
///
/// Returns the number of bytes copied.
pub fn copy_durable(src: &Path, dst: &Path) -> Result<u64> {
    let mut source = File::open(src).at(src)?;
    let mut dest = File::create(dst).at(dst)?;
    let copied = io::copy(&mut source, &mut dest).at(dst)?;
    dest.sync_all().at(dst)?;
    Ok(copied)
}

/// Write `data` over `path` and force it to disk.
pub fn write_durable(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut file = File::create(path).at(path)?;
    file.write_all(data).at(path)?;
    file.sync_all().at(path)?;
    Ok(())
}

/// Remove a file; already gone counts as removed.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Remove a directory tree; already gone counts as removed.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
