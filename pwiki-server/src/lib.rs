//! pwiki HTTP serving layer
//!
//! Thin routing over [`pwiki_core::Wiki`]; all persistence policy lives in
//! the core crate.
//!
//! Endpoints:
//!   GET  /                        → JSON list of page titles
//!   GET  /api/page?title=T        → JSON page
//!   GET  /api/status              → last background backup
//!   GET  /view/T                  → page body (302 to /edit/T when missing)
//!   GET  /edit/T                  → JSON page, blank when missing
//!   POST /save/T                  → replace body
//!   POST /upload/T?filename=N     → store attachment
//!   POST /delete/T                → delete page
//!   POST /delete-file/T?filename=N → remove attachment
//!   GET  /files/T/N               → attachment bytes

pub mod error;
pub mod query;
pub mod routes;

pub use error::ServerError;
pub use routes::WikiHandler;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Value of `Access-Control-Allow-Origin`
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10 MB
            cors_origin: "*".to_string(),
        }
    }
}
