//! When mirroring runs.
//!
//! - Startup: restore-all → reconcile → backup-all, synchronously, before
//!   anything is served.
//! - After every mutation: a backup request goes onto a single-worker queue.
//!   Requests that pile up while a pass runs are served by the next pass, so
//!   passes never overlap and the caller never waits.
//! - On a load miss: restore that one page from the persistent store.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::sync::{SyncEngine, SyncReport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Result of the startup sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    pub restore: SyncReport,
    pub reconcile: ReconcileReport,
    pub backup: SyncReport,
}

/// Handle for one queued backup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackupTicket(u64);

impl BackupTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Runs backup passes one at a time on a background task.
pub struct BackupScheduler {
    requests: mpsc::UnboundedSender<u64>,
    issued: AtomicU64,
    completed: watch::Receiver<u64>,
    last_report: Arc<Mutex<Option<SyncReport>>>,
}

impl BackupScheduler {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<SyncEngine>) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let (done_tx, completed) = watch::channel(0u64);
        let last_report = Arc::new(Mutex::new(None));

        tokio::spawn(backup_worker(engine, rx, done_tx, last_report.clone()));

        Self {
            requests,
            issued: AtomicU64::new(0),
            completed,
            last_report,
        }
    }

    /// Queue a backup pass. Never blocks.
    pub fn request(&self) -> BackupTicket {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        if self.requests.send(ticket).is_err() {
            error!("Backup worker is gone, request {} dropped", ticket);
        }
        BackupTicket(ticket)
    }

    /// Wait until a pass that started after `ticket` was issued has finished.
    pub async fn wait_for(&self, ticket: BackupTicket) -> Result<()> {
        let mut completed = self.completed.clone();
        if completed.wait_for(|done| *done >= ticket.0).await.is_err() {
            return Err(StoreError::BackupWorkerStopped);
        }
        Ok(())
    }

    /// Wait for every request issued so far.
    pub async fn flush(&self) -> Result<()> {
        match self.issued.load(Ordering::SeqCst) {
            0 => Ok(()),
            last => self.wait_for(BackupTicket(last)).await,
        }
    }

    /// Highest ticket covered by a finished pass.
    pub fn completed(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Report of the most recent successful pass.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn backup_worker(
    engine: Arc<SyncEngine>,
    mut rx: mpsc::UnboundedReceiver<u64>,
    done: watch::Sender<u64>,
    last_report: Arc<Mutex<Option<SyncReport>>>,
) {
    while let Some(mut ticket) = rx.recv().await {
        // one pass rescans the whole tree, so it covers everything queued so far
        while let Ok(next) = rx.try_recv() {
            ticket = ticket.max(next);
        }
        debug!("Running backup pass for requests up to {}", ticket);

        let pass_engine = engine.clone();
        match tokio::task::spawn_blocking(move || pass_engine.backup()).await {
            Ok(Ok(report)) => {
                *last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
            }
            Ok(Err(e)) => error!("Background backup failed: {}", e),
            Err(e) => error!("Background backup task panicked: {}", e),
        }

        done.send_modify(|completed| *completed = (*completed).max(ticket));
    }
    debug!("Backup worker stopped");
}

/// Decides when the sync engine and reconciler run.
pub struct TriggerPolicy {
    engine: Arc<SyncEngine>,
    scheduler: BackupScheduler,
}

impl TriggerPolicy {
    /// Start the background backup worker. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<SyncEngine>) -> Self {
        let scheduler = BackupScheduler::start(engine.clone());
        Self { engine, scheduler }
    }

    /// Ensure both roots exist, then restore → reconcile → backup.
    pub fn startup(config: &StoreConfig, engine: &SyncEngine) -> Result<StartupReport> {
        config.ensure_dirs()?;

        let restore = engine.restore()?;
        info!("Initial restoration completed.");

        let reconcile = Reconciler::new(engine).reconcile(&restore.titles)?;

        let backup = engine.backup()?;
        info!("Initial backup completed. Automatic backups will occur after file modifications.");

        Ok(StartupReport {
            restore,
            reconcile,
            backup,
        })
    }

    /// A mutation succeeded in the working store.
    pub fn after_mutation(&self) -> BackupTicket {
        self.scheduler.request()
    }

    /// A load found no working copy of `title`.
    pub fn on_missing(&self, title: &str) -> Result<()> {
        debug!("Page {} missing from working store, trying persistent store", title);
        self.engine.restore_one(title).map(|_| ())
    }

    pub fn scheduler(&self) -> &BackupScheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }
}
