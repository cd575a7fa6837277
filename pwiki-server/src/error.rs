//! Serving-layer errors and their HTTP mapping

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use pwiki_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> u16 {
        match self {
            ServerError::Store(StoreError::NotFound(_)) => 404,
            ServerError::Store(StoreError::InvalidTitle(_))
            | ServerError::Store(StoreError::InvalidFilename(_)) => 400,
            ServerError::Store(_) => 500,
            ServerError::BadRequest(_) => 400,
            ServerError::PayloadTooLarge(_) => 413,
            ServerError::MethodNotAllowed => 405,
            ServerError::NotFound(_) => 404,
            ServerError::Internal(_) => 500,
        }
    }

    /// JSON `{"error": ...}` response with the mapped status.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        json_error(self.status(), &self.to_string())
    }
}

pub(crate) fn json_error(status: u16, message: &str) -> Response<Full<Bytes>> {
    #[derive(serde::Serialize)]
    struct ErrorBody<'a> {
        error: &'a str,
    }
    let body = serde_json::to_vec(&ErrorBody { error: message }).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
