//! Mirroring between the working store and the persistent store.
//!
//! Both directions use whole-file overwrites and a whole-tree rescan on every
//! pass. A failure on one file is logged and counted, never fatal to the pass.

use crate::config::StoreConfig;
use crate::error::{IoContext, Result, StoreError};
use crate::layout::{StoreLayout, copy_durable};
use crate::locks::TitleLocks;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which way a copy goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Working store → persistent store.
    Backup,
    /// Persistent store → working store.
    Restore,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Backup => "Backed up",
            Direction::Restore => "Restored",
        }
    }
}

/// Outcome of one backup or restore pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Titles whose body was copied.
    pub titles: Vec<String>,
    /// Files (bodies, listings, blobs) copied.
    pub files_copied: u64,
    /// Files skipped because of an error.
    pub files_failed: u64,
    pub bytes_copied: u64,
    pub duration_ms: u64,
    /// Unix seconds when the pass finished.
    pub finished_at: i64,
}

impl SyncReport {
    fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self.finished_at = chrono::Utc::now().timestamp();
        self
    }

    fn copied(&mut self, bytes: u64) {
        self.files_copied += 1;
        self.bytes_copied += bytes;
    }

    pub(crate) fn absorb(&mut self, other: SyncReport) {
        self.files_copied += other.files_copied;
        self.files_failed += other.files_failed;
        self.bytes_copied += other.bytes_copied;
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} pages, {} files copied ({} bytes), {} failed in {}ms",
            self.titles.len(),
            self.files_copied,
            self.bytes_copied,
            self.files_failed,
            self.duration_ms
        )
    }
}

/// Copies content between the working store and the persistent store.
pub struct SyncEngine {
    working: StoreLayout,
    persistent: StoreLayout,
    locks: Arc<TitleLocks>,
}

impl SyncEngine {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            working: StoreLayout::new(&config.working_root),
            persistent: StoreLayout::new(&config.persistent_root),
            locks: Arc::new(TitleLocks::new()),
        }
    }

    pub fn working(&self) -> &StoreLayout {
        &self.working
    }

    pub fn persistent(&self) -> &StoreLayout {
        &self.persistent
    }

    pub fn locks(&self) -> &TitleLocks {
        &self.locks
    }

    fn stores(&self, direction: Direction) -> (&StoreLayout, &StoreLayout) {
        match direction {
            Direction::Backup => (&self.working, &self.persistent),
            Direction::Restore => (&self.persistent, &self.working),
        }
    }

    /// Mirror every page body and attachment blob into the persistent store.
    ///
    /// Listings are derived data and are not mirrored. A missing working root
    /// means there is nothing to back up.
    pub fn backup(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let titles = match self.working.titles() {
            Ok(titles) => titles,
            Err(StoreError::DirectoryUnavailable(path)) => {
                debug!("Working root {:?} missing, nothing to back up", path);
                return Ok(report.finish(started));
            }
            Err(e) => return Err(e),
        };

        let root = self.persistent.root();
        fs::create_dir_all(root).at(root)?;

        for title in titles {
            let copied = self
                .locks
                .with(&title, || self.copy_body(Direction::Backup, &title, &mut report));
            if copied {
                report.titles.push(title);
            }
        }

        match self.working.attachment_titles() {
            Ok(dirs) => {
                for title in dirs {
                    self.locks.with(&title, || {
                        self.copy_attachments(Direction::Backup, &title, &mut report)
                    });
                }
            }
            Err(e) => {
                warn!("Error listing working attachment directories: {}", e);
                report.files_failed += 1;
            }
        }

        let report = report.finish(started);
        info!("Backup complete: {}", report.summary());
        Ok(report)
    }

    /// Copy every page in the persistent store back into the working store.
    ///
    /// Overwrites working bodies, restores persistent listings when present,
    /// then the page's blobs. Never deletes anything from the working store.
    /// `report.titles` lists the pages whose body was restored.
    pub fn restore(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        info!("Starting restoration from {:?}", self.persistent.root());

        let titles = match self.persistent.titles() {
            Ok(titles) => titles,
            Err(StoreError::DirectoryUnavailable(path)) => {
                info!("Persistent root {:?} missing, nothing to restore", path);
                return Ok(report.finish(started));
            }
            Err(e) => return Err(e),
        };

        let root = self.working.root();
        fs::create_dir_all(root).at(root)?;

        for title in titles {
            let restored = self.locks.with(&title, || {
                if !self.copy_body(Direction::Restore, &title, &mut report) {
                    return false;
                }
                self.copy_listing(Direction::Restore, &title, &mut report);
                self.copy_attachments(Direction::Restore, &title, &mut report);
                true
            });
            if restored {
                report.titles.push(title);
            }
        }

        let report = report.finish(started);
        info!("Restore complete: {}", report.summary());
        Ok(report)
    }

    /// Bring a single page back from the persistent store.
    ///
    /// Fails with `NotFound` when the persistent store has no body for `title`.
    pub fn restore_one(&self, title: &str) -> Result<SyncReport> {
        self.locks.with(title, || self.restore_one_unlocked(title))
    }

    /// `restore_one` for callers already holding the title's lock.
    pub(crate) fn restore_one_unlocked(&self, title: &str) -> Result<SyncReport> {
        let started = Instant::now();
        let src = self.persistent.body_path(title);
        if !src.is_file() {
            return Err(StoreError::NotFound(title.to_string()));
        }

        let root = self.working.root();
        fs::create_dir_all(root).at(root)?;

        let mut report = SyncReport::default();
        let dst = self.working.body_path(title);
        let bytes = copy_durable(&src, &dst)?;
        report.copied(bytes);
        report.titles.push(title.to_string());

        self.copy_attachments(Direction::Restore, title, &mut report);

        if self.working.read_listing(title)?.is_none() {
            let names = self.working.blob_names(title)?;
            self.working.write_listing(title, &names)?;
        }

        info!("Restored {} from persistent storage", title);
        Ok(report.finish(started))
    }

    /// Copy one page body. Returns whether the copy happened.
    pub(crate) fn copy_body(
        &self,
        direction: Direction,
        title: &str,
        report: &mut SyncReport,
    ) -> bool {
        let (from, to) = self.stores(direction);
        let src = from.body_path(title);
        let dst = to.body_path(title);

        // deleted since the scan
        if !src.is_file() {
            debug!("Skipping {:?}: no longer present", src);
            return false;
        }

        match copy_durable(&src, &dst) {
            Ok(bytes) => {
                debug!("{} {:?} to {:?}", direction.verb(), src, dst);
                report.copied(bytes);
                true
            }
            Err(e) => {
                warn!("Error copying {:?}: {}", src, e);
                report.files_failed += 1;
                false
            }
        }
    }

    /// Copy a page's listing if the source store has one.
    pub(crate) fn copy_listing(&self, direction: Direction, title: &str, report: &mut SyncReport) {
        let (from, to) = self.stores(direction);
        let src = from.listing_path(title);
        if !src.is_file() {
            return;
        }
        let dst = to.listing_path(title);
        match copy_durable(&src, &dst) {
            Ok(bytes) => {
                debug!("{} metadata file {:?}", direction.verb(), dst);
                report.copied(bytes);
            }
            Err(e) => {
                warn!("Error copying metadata file {:?}: {}", src, e);
                report.files_failed += 1;
            }
        }
    }

    /// Copy every blob in a page's attachment directory, overwriting.
    pub(crate) fn copy_attachments(
        &self,
        direction: Direction,
        title: &str,
        report: &mut SyncReport,
    ) {
        let (from, to) = self.stores(direction);
        let src_dir = from.attachment_dir(title);
        if !src_dir.is_dir() {
            return;
        }

        let names = match from.blob_names(title) {
            Ok(names) => names,
            Err(e) => {
                warn!("Error reading files for page {}: {}", title, e);
                report.files_failed += 1;
                return;
            }
        };

        let dst_dir = to.attachment_dir(title);
        if let Err(e) = fs::create_dir_all(&dst_dir) {
            warn!("Error creating directory {:?} for page {}: {}", dst_dir, title, e);
            report.files_failed += 1;
            return;
        }

        for name in names {
            let src = src_dir.join(&name);
            let dst = dst_dir.join(&name);
            match copy_durable(&src, &dst) {
                Ok(bytes) => {
                    debug!("{} attachment {:?} to {:?}", direction.verb(), src, dst);
                    report.copied(bytes);
                }
                Err(e) => {
                    warn!("Error copying attachment {:?}: {}", src, e);
                    report.files_failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncEngine) {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("work"), tmp.path().join("persist"));
        config.ensure_dirs().unwrap();
        let engine = SyncEngine::new(&config);
        (tmp, engine)
    }

    fn put(layout: &StoreLayout, title: &str, body: &str, blobs: &[(&str, &str)]) {
        fs::write(layout.body_path(title), body).unwrap();
        if !blobs.is_empty() {
            fs::create_dir_all(layout.attachment_dir(title)).unwrap();
        }
        for (name, data) in blobs {
            fs::write(layout.blob_path(title, name), data).unwrap();
        }
    }

    #[test]
    fn test_backup_copies_bodies_and_blobs() {
        let (_tmp, engine) = setup();
        put(engine.working(), "alpha", "hello", &[("doc.pdf", "%PDF")]);
        put(engine.working(), "beta", "world", &[]);
        fs::write(engine.working().listing_path("alpha"), "doc.pdf").unwrap();

        let report = engine.backup().unwrap();
        assert_eq!(report.titles, vec!["alpha", "beta"]);
        assert_eq!(report.files_copied, 3);
        assert_eq!(report.files_failed, 0);

        let p = engine.persistent();
        assert_eq!(fs::read_to_string(p.body_path("alpha")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(p.body_path("beta")).unwrap(), "world");
        assert_eq!(fs::read(p.blob_path("alpha", "doc.pdf")).unwrap(), b"%PDF");
        // listings are derived, not mirrored
        assert!(!p.listing_path("alpha").exists());
    }

    #[test]
    fn test_backup_overwrites_stale_copy() {
        let (_tmp, engine) = setup();
        put(engine.persistent(), "alpha", "a much older and longer body", &[]);
        put(engine.working(), "alpha", "new", &[]);

        engine.backup().unwrap();
        assert_eq!(
            fs::read_to_string(engine.persistent().body_path("alpha")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_backup_missing_working_root_is_noop() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("absent"), tmp.path().join("persist"));
        let engine = SyncEngine::new(&config);

        let report = engine.backup().unwrap();
        assert!(report.titles.is_empty());
        assert_eq!(report.files_copied, 0);
    }

    #[test]
    fn test_backup_creates_persistent_root() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("work"), tmp.path().join("p/q"));
        fs::create_dir_all(&config.working_root).unwrap();
        let engine = SyncEngine::new(&config);
        put(engine.working(), "alpha", "x", &[]);

        engine.backup().unwrap();
        assert!(engine.persistent().body_path("alpha").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_failure_does_not_abort_pass() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, engine) = setup();
        put(engine.working(), "alpha", "a", &[]);
        put(engine.working(), "beta", "b", &[]);
        put(engine.working(), "gamma", "g", &[]);
        let locked = engine.working().body_path("beta");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits, in which case nothing fails
        let readable = fs::File::open(&locked).is_ok();
        let report = engine.backup().unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(engine.persistent().body_path("alpha").is_file());
        assert!(engine.persistent().body_path("gamma").is_file());
        if !readable {
            assert_eq!(report.files_failed, 1);
            assert_eq!(report.titles, vec!["alpha", "gamma"]);
        }
    }

    #[test]
    fn test_restore_never_deletes_working_only_pages() {
        let (_tmp, engine) = setup();
        put(engine.working(), "local", "not yet backed up", &[("a.txt", "a")]);
        put(engine.persistent(), "alpha", "hello", &[]);

        let report = engine.restore().unwrap();
        assert_eq!(report.titles, vec!["alpha"]);
        assert_eq!(
            fs::read_to_string(engine.working().body_path("local")).unwrap(),
            "not yet backed up"
        );
        assert!(engine.working().blob_path("local", "a.txt").is_file());
    }

    #[test]
    fn test_restore_brings_back_persistent_listing() {
        let (_tmp, engine) = setup();
        put(engine.persistent(), "alpha", "hello", &[("doc.pdf", "1")]);
        fs::write(engine.persistent().listing_path("alpha"), "doc.pdf\n").unwrap();

        engine.restore().unwrap();
        assert_eq!(
            engine.working().read_listing("alpha").unwrap(),
            Some(vec!["doc.pdf".to_string()])
        );
    }

    #[test]
    fn test_restore_missing_persistent_root_is_noop() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path().join("work"), tmp.path().join("absent"));
        let engine = SyncEngine::new(&config);

        let report = engine.restore().unwrap();
        assert!(report.titles.is_empty());
    }

    #[test]
    fn test_restore_one_not_found() {
        let (_tmp, engine) = setup();
        assert!(matches!(
            engine.restore_one("ghost"),
            Err(StoreError::NotFound(t)) if t == "ghost"
        ));
        assert!(!engine.working().body_path("ghost").exists());
    }

    #[test]
    fn test_restore_one_restores_body_blobs_and_listing() {
        let (_tmp, engine) = setup();
        put(
            engine.persistent(),
            "alpha",
            "hello",
            &[("doc.pdf", "1"), ("img.png", "2")],
        );

        let report = engine.restore_one("alpha").unwrap();
        assert_eq!(report.files_copied, 3);

        let w = engine.working();
        assert_eq!(fs::read_to_string(w.body_path("alpha")).unwrap(), "hello");
        assert_eq!(fs::read(w.blob_path("alpha", "img.png")).unwrap(), b"2");
        assert_eq!(
            w.read_listing("alpha").unwrap(),
            Some(vec!["doc.pdf".to_string(), "img.png".to_string()])
        );
    }

    #[test]
    fn test_report_summary() {
        let report = SyncReport {
            titles: vec!["a".into(), "b".into()],
            files_copied: 3,
            files_failed: 1,
            bytes_copied: 42,
            duration_ms: 7,
            finished_at: 0,
        };
        assert_eq!(
            report.summary(),
            "2 pages, 3 files copied (42 bytes), 1 failed in 7ms"
        );
    }
}
