//! Attachment metadata reconciliation
//!
//! A listing is a projection of the blobs actually present in a page's
//! attachment directory. When the two disagree (a crash between copying
//! blobs and writing the listing, or a lost listing), the directory wins.

use crate::error::Result;
use crate::layout::write_durable;
use crate::sync::{Direction, SyncEngine, SyncReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Titles whose working listing was rewritten.
    pub repaired: Vec<String>,
    /// Titles that got an empty body because none existed in either store.
    pub bodies_created: Vec<String>,
    /// Copies made while pulling bodies and blobs from the persistent store.
    pub sync: SyncReport,
}

/// Repairs drift between attachment directories and their listings.
pub struct Reconciler<'a> {
    engine: &'a SyncEngine,
}

impl<'a> Reconciler<'a> {
    pub fn new(engine: &'a SyncEngine) -> Self {
        Self { engine }
    }

    /// Reconcile every page that has an attachment directory in either store
    /// or a listing in the working store.
    ///
    /// `restored` are the titles the preceding restore pass already pulled
    /// in; their bodies and blobs are not copied again.
    pub fn reconcile(&self, restored: &[String]) -> Result<ReconcileReport> {
        let restored: BTreeSet<&str> = restored.iter().map(String::as_str).collect();
        let mut candidates: BTreeSet<String> =
            self.engine.persistent().attachment_titles()?.into_iter().collect();
        candidates.extend(self.engine.working().attachment_titles()?);
        candidates.extend(self.engine.working().listing_titles()?);

        let mut report = ReconcileReport::default();
        for title in candidates {
            let outcome = self.engine.locks().with(&title, || {
                self.reconcile_title(&title, restored.contains(title.as_str()))
            });
            match outcome {
                Ok(Some(result)) => {
                    if result.body_created {
                        report.bodies_created.push(title.clone());
                    }
                    if result.listing_rewritten {
                        report.repaired.push(title);
                    }
                    report.sync.absorb(result.sync);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Error reconciling attachments for {}: {}", title, e);
                    report.sync.files_failed += 1;
                }
            }
        }

        if !report.repaired.is_empty() {
            info!(
                "Reconciled attachment listings for {} pages: {:?}",
                report.repaired.len(),
                report.repaired
            );
        }
        Ok(report)
    }

    /// Caller holds the title's lock. `None` means nothing to reconcile.
    fn reconcile_title(&self, title: &str, already_restored: bool) -> Result<Option<TitleOutcome>> {
        let working = self.engine.working();
        let persistent = self.engine.persistent();

        let persisted_blobs = persistent.blob_names(title)?;
        if persisted_blobs.is_empty() && working.blob_names(title)?.is_empty() {
            // no blobs anywhere: a leftover listing names files that are gone
            if working.read_listing(title)?.is_none() {
                return Ok(None);
            }
            working.write_listing(title, &[])?;
            return Ok(Some(TitleOutcome {
                listing_rewritten: true,
                ..TitleOutcome::default()
            }));
        }

        let mut outcome = TitleOutcome::default();
        if !already_restored && !persisted_blobs.is_empty() {
            if !working.body_path(title).exists()
                && !self.engine.copy_body(Direction::Restore, title, &mut outcome.sync)
            {
                write_durable(&working.body_path(title), b"")?;
                outcome.body_created = true;
            }
            self.engine
                .copy_attachments(Direction::Restore, title, &mut outcome.sync);
        } else if !working.body_path(title).exists() {
            write_durable(&working.body_path(title), b"")?;
            outcome.body_created = true;
        }

        let present = working.blob_names(title)?;
        let mut listed = working.read_listing(title)?.unwrap_or_default();
        listed.sort();
        if listed != present {
            working.write_listing(title, &present)?;
            outcome.listing_rewritten = true;
        }
        Ok(Some(outcome))
    }
}

#[derive(Default)]
struct TitleOutcome {
    body_created: bool,
    listing_rewritten: bool,
    sync: SyncReport,
}
