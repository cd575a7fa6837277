//! Page operations used by the serving layer.
//!
//! Every mutation writes the working store under the title's lock, then
//! queues a backup. Page deletion and attachment removal also reach into the
//! persistent store synchronously, since a backup pass only ever adds files.

use crate::config::StoreConfig;
use crate::error::{IoContext, Result, StoreError};
use crate::layout::{
    StoreLayout, remove_dir_if_exists, remove_file_if_exists, validate_filename,
    validate_title, write_durable,
};
use crate::sync::SyncEngine;
use crate::trigger::{BackupTicket, StartupReport, TriggerPolicy};
use std::fs;
use std::sync::Arc;
use tracing::{info, warn};

/// A wiki page as served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub body: Vec<u8>,
    /// Attachment filenames, duplicate-free, in listing order.
    pub files: Vec<String>,
}

impl Page {
    /// An empty page for a title that does not exist yet.
    pub fn blank(title: &str) -> Self {
        Self {
            title: title.to_string(),
            body: Vec::new(),
            files: Vec::new(),
        }
    }
}

pub struct Wiki {
    triggers: TriggerPolicy,
}

impl Wiki {
    /// Run the startup sequence, then start the backup worker.
    ///
    /// Blocks on filesystem I/O; must be called inside a tokio runtime.
    pub fn open(config: &StoreConfig) -> Result<(Self, StartupReport)> {
        let engine = Arc::new(SyncEngine::new(config));
        let report = TriggerPolicy::startup(config, &engine)?;
        Ok((Self::with_engine(engine), report))
    }

    /// Wrap an engine without running startup.
    pub fn with_engine(engine: Arc<SyncEngine>) -> Self {
        Self {
            triggers: TriggerPolicy::start(engine),
        }
    }

    pub fn triggers(&self) -> &TriggerPolicy {
        &self.triggers
    }

    fn engine(&self) -> &SyncEngine {
        self.triggers.engine()
    }

    fn working(&self) -> &StoreLayout {
        self.engine().working()
    }

    /// Titles of all pages in the working store, sorted.
    pub fn list_pages(&self) -> Result<Vec<String>> {
        match self.working().titles() {
            Err(StoreError::DirectoryUnavailable(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Load a page, pulling it from the persistent store if the working copy
    /// is missing.
    pub fn load_page(&self, title: &str) -> Result<Page> {
        validate_title(title)?;
        match self.read_page(title) {
            Err(StoreError::NotFound(_)) => {
                self.triggers.on_missing(title)?;
                self.read_page(title)
            }
            other => other,
        }
    }

    fn read_page(&self, title: &str) -> Result<Page> {
        let working = self.working();
        self.engine().locks().with(title, || {
            let body = working.read_body(title)?;
            let files = working.read_listing(title)?.unwrap_or_default();
            Ok(Page {
                title: title.to_string(),
                body,
                files,
            })
        })
    }

    /// Replace a page's body, creating the page if needed.
    pub fn save_page(&self, title: &str, body: &[u8]) -> Result<BackupTicket> {
        validate_title(title)?;
        let path = self.working().body_path(title);
        self.engine()
            .locks()
            .with(title, || write_durable(&path, body))?;
        Ok(self.triggers.after_mutation())
    }

    /// Store an attachment and add it to the page's listing.
    ///
    /// A page with no body anywhere gets an empty one.
    pub fn add_attachment(&self, title: &str, filename: &str, blob: &[u8]) -> Result<BackupTicket> {
        validate_title(title)?;
        validate_filename(filename)?;
        let working = self.working();

        self.engine().locks().with(title, || {
            // before the blob write, so a restore cannot clobber the new upload
            self.ensure_body(title)?;

            let dir = working.attachment_dir(title);
            fs::create_dir_all(&dir).at(&dir)?;
            write_durable(&working.blob_path(title, filename), blob)?;

            let mut files = working.read_listing(title)?.unwrap_or_default();
            if !files.iter().any(|f| f == filename) {
                files.push(filename.to_string());
            }
            working.write_listing(title, &files)
        })?;

        info!("Stored attachment {} for page {}", filename, title);
        Ok(self.triggers.after_mutation())
    }

    /// Read an attachment's bytes from the working store.
    pub fn read_attachment(&self, title: &str, filename: &str) -> Result<Vec<u8>> {
        validate_title(title)?;
        validate_filename(filename)?;
        let path = self.working().blob_path(title, filename);
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}/{}", title, filename)))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Remove an attachment from both stores and from the listing.
    ///
    /// The page itself must exist (possibly only in the persistent store).
    pub fn remove_attachment(&self, title: &str, filename: &str) -> Result<BackupTicket> {
        validate_title(title)?;
        validate_filename(filename)?;
        let working = self.working();
        let persistent = self.engine().persistent();

        self.engine().locks().with(title, || {
            if !working.body_path(title).is_file() {
                self.engine().restore_one_unlocked(title)?;
            }

            remove_file_if_exists(&working.blob_path(title, filename))?;
            remove_file_if_exists(&persistent.blob_path(title, filename))?;

            let files: Vec<String> = working
                .read_listing(title)?
                .unwrap_or_default()
                .into_iter()
                .filter(|f| f != filename)
                .collect();
            working.write_listing(title, &files)
        })?;

        info!("Removed attachment {} from page {}", filename, title);
        Ok(self.triggers.after_mutation())
    }

    /// Delete a page's body, listing and attachments from both stores.
    ///
    /// Files that are already gone count as deleted. Every removal is
    /// attempted; the first real failure is returned.
    pub fn delete_page(&self, title: &str) -> Result<BackupTicket> {
        validate_title(title)?;
        let engine = self.engine();

        engine.locks().with(title, || {
            let mut first_error = None;
            for layout in [engine.working(), engine.persistent()] {
                let removals = [
                    remove_file_if_exists(&layout.body_path(title)),
                    remove_file_if_exists(&layout.listing_path(title)),
                    remove_dir_if_exists(&layout.attachment_dir(title)),
                ];
                for result in removals {
                    if let Err(e) = result {
                        warn!("Error deleting page {}: {}", title, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            first_error.map_or(Ok(()), Err)
        })?;

        info!("Deleted page {}", title);
        Ok(self.triggers.after_mutation())
    }

    /// Caller holds the title's lock.
    fn ensure_body(&self, title: &str) -> Result<()> {
        let path = self.working().body_path(title);
        if path.is_file() {
            return Ok(());
        }
        match self.engine().restore_one_unlocked(title) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => write_durable(&path, b""),
            Err(e) => Err(e),
        }
    }
}
