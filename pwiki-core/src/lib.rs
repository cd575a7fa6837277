//! pwiki Core Library
//!
//! Storage and mirroring for a file-backed wiki:
//! - Store layout (page bodies, attachment listings, attachment blobs)
//! - Sync engine mirroring the working store into a persistent store
//! - Reconciler deriving attachment listings from the blobs on disk
//! - Trigger policy (startup sequence, queued backups, on-demand restore)
//! - Page operations for the serving layer

pub mod config;
pub mod error;
pub mod layout;
pub mod locks;
pub mod reconcile;
pub mod sync;
pub mod trigger;
pub mod wiki;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use layout::{StoreLayout, parse_listing, render_listing, validate_filename, validate_title};
pub use locks::TitleLocks;
pub use reconcile::{ReconcileReport, Reconciler};
pub use sync::{Direction, SyncEngine, SyncReport};
pub use trigger::{BackupScheduler, BackupTicket, StartupReport, TriggerPolicy};
pub use wiki::{Page, Wiki};
