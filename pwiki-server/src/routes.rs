//! Request routing and handlers

use crate::ServerConfig;
use crate::error::ServerError;
use crate::query::parse_query;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use pwiki_core::{Page, SyncReport, Wiki};
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::Arc;

type HttpResult = Result<Response<Full<Bytes>>, ServerError>;

/// JSON form of a page.
#[derive(Debug, Serialize)]
struct PageView<'a> {
    title: &'a str,
    body: String,
    files: &'a [String],
}

impl<'a> From<&'a Page> for PageView<'a> {
    fn from(page: &'a Page) -> Self {
        Self {
            title: &page.title,
            body: String::from_utf8_lossy(&page.body).into_owned(),
            files: &page.files,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    backups_completed: u64,
    last_backup: Option<SyncReport>,
}

/// HTTP request handler wrapping a [`Wiki`].
pub struct WikiHandler {
    wiki: Arc<Wiki>,
    config: ServerConfig,
}

impl WikiHandler {
    pub fn new(wiki: Arc<Wiki>) -> Self {
        Self::with_config(wiki, ServerConfig::default())
    }

    pub fn with_config(wiki: Arc<Wiki>, config: ServerConfig) -> Self {
        Self { wiki, config }
    }

    pub fn wiki(&self) -> &Arc<Wiki> {
        &self.wiki
    }

    /// Handle a request; errors become JSON error responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let mut response = match self.route(req).await {
            Ok(resp) => resp,
            Err(e) => {
                if e.status() >= 500 {
                    tracing::error!("Request error: {}", e);
                }
                e.into_response()
            }
        };
        self.add_cors(&mut response);
        response
    }

    async fn route<B>(&self, req: Request<B>) -> HttpResult
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();

        tracing::debug!("Request: {} {}", method, path);

        if method == Method::OPTIONS {
            return Ok(empty(200));
        }
        if path == "/" {
            return self.handle_index(&method).await;
        }
        if path == "/api/page" {
            return self.handle_api_page(&method, &query).await;
        }
        if path == "/api/status" {
            return self.handle_status(&method);
        }
        if let Some(rest) = path.strip_prefix("/files/") {
            let (title, filename) = rest
                .split_once('/')
                .ok_or_else(|| ServerError::NotFound(path.clone()))?;
            let filename = crate::query::urldecode(filename);
            return self.handle_file(&method, title, &filename).await;
        }

        let (action, title) = path
            .strip_prefix('/')
            .and_then(|p| p.split_once('/'))
            .ok_or_else(|| ServerError::NotFound(path.clone()))?;
        let title = title.to_string();

        match (action, method) {
            ("view", Method::GET) => self.handle_view(title).await,
            ("edit", Method::GET) => self.handle_edit(title).await,
            ("save", Method::POST) => self.handle_save(req, title).await,
            ("upload", Method::POST) => self.handle_upload(req, title, &query).await,
            ("delete", Method::POST) => self.handle_delete(title).await,
            ("delete-file", Method::POST) => self.handle_delete_file(req, title, &query).await,
            ("view" | "edit" | "save" | "upload" | "delete" | "delete-file", _) => {
                Err(ServerError::MethodNotAllowed)
            }
            _ => Err(ServerError::NotFound(path.clone())),
        }
    }

    async fn handle_index(&self, method: &Method) -> HttpResult {
        if method != Method::GET {
            return Err(ServerError::MethodNotAllowed);
        }
        let titles = self.blocking(|wiki| wiki.list_pages()).await?;
        Ok(json_ok(&titles))
    }

    async fn handle_api_page(&self, method: &Method, query: &str) -> HttpResult {
        if method != Method::GET {
            return Err(ServerError::MethodNotAllowed);
        }
        let title = parse_query(query)
            .remove("title")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServerError::BadRequest("Missing title parameter".into()))?;
        self.handle_edit(title).await
    }

    fn handle_status(&self, method: &Method) -> HttpResult {
        if method != Method::GET {
            return Err(ServerError::MethodNotAllowed);
        }
        let scheduler = self.wiki.triggers().scheduler();
        Ok(json_ok(&StatusView {
            backups_completed: scheduler.completed(),
            last_backup: scheduler.last_report(),
        }))
    }

    async fn handle_view(&self, title: String) -> HttpResult {
        let lookup = title.clone();
        match self.blocking(move |wiki| wiki.load_page(&lookup)).await {
            Ok(page) => Ok(Response::builder()
                .status(200)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(Full::new(Bytes::from(page.body)))
                .unwrap()),
            Err(ServerError::Store(e)) if e.is_not_found() => {
                Ok(redirect(&format!("/edit/{}", title)))
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_edit(&self, title: String) -> HttpResult {
        let lookup = title.clone();
        let page = match self.blocking(move |wiki| wiki.load_page(&lookup)).await {
            Ok(page) => page,
            Err(ServerError::Store(e)) if e.is_not_found() => Page::blank(&title),
            Err(e) => return Err(e),
        };
        Ok(json_ok(&PageView::from(&page)))
    }

    async fn handle_save<B>(&self, req: Request<B>, title: String) -> HttpResult
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let is_form = is_form(&req);
        let raw = self.read_body(req).await?;
        let body = if is_form {
            let form = String::from_utf8_lossy(&raw);
            parse_query(&form)
                .remove("body")
                .unwrap_or_default()
                .into_bytes()
        } else {
            raw.to_vec()
        };

        let target = format!("/view/{}", title);
        self.blocking(move |wiki| wiki.save_page(&title, &body)).await?;
        Ok(redirect(&target))
    }

    async fn handle_upload<B>(&self, req: Request<B>, title: String, query: &str) -> HttpResult
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let filename = parse_query(query)
            .remove("filename")
            .ok_or_else(|| ServerError::BadRequest("Missing filename parameter".into()))?;
        let blob = self.read_body(req).await?;

        self.blocking(move |wiki| wiki.add_attachment(&title, &filename, &blob))
            .await?;
        Ok(Response::builder()
            .status(200)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from("File uploaded successfully")))
            .unwrap())
    }

    async fn handle_delete(&self, title: String) -> HttpResult {
        self.blocking(move |wiki| wiki.delete_page(&title)).await?;
        Ok(redirect("/"))
    }

    async fn handle_delete_file<B>(&self, req: Request<B>, title: String, query: &str) -> HttpResult
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let mut params = parse_query(query);
        if is_form(&req) {
            let raw = self.read_body(req).await?;
            params.extend(parse_query(&String::from_utf8_lossy(&raw)));
        }
        let filename = params
            .remove("filename")
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ServerError::BadRequest("Missing filename parameter".into()))?;

        let target = format!("/view/{}", title);
        self.blocking(move |wiki| wiki.remove_attachment(&title, &filename))
            .await?;
        Ok(redirect(&target))
    }

    async fn handle_file(&self, method: &Method, title: &str, filename: &str) -> HttpResult {
        if method != Method::GET {
            return Err(ServerError::MethodNotAllowed);
        }
        let (title, filename) = (title.to_string(), filename.to_string());
        let data = self
            .blocking(move |wiki| wiki.read_attachment(&title, &filename))
            .await?;
        Ok(Response::builder()
            .status(200)
            .header("Content-Type", "application/octet-stream")
            .body(Full::new(Bytes::from(data)))
            .unwrap())
    }

    /// Collect a request body, enforcing `max_body_size`.
    async fn read_body<B>(&self, req: Request<B>) -> Result<Bytes, ServerError>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let limit = self.config.max_body_size;
        match Limited::new(req.into_body(), limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(ServerError::PayloadTooLarge(limit))
            }
            Err(e) => Err(ServerError::BadRequest(format!("Failed to read body: {}", e))),
        }
    }

    /// Run a blocking wiki operation off the async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Wiki) -> pwiki_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let wiki = self.wiki.clone();
        tokio::task::spawn_blocking(move || f(&wiki))
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?
            .map_err(ServerError::from)
    }

    fn add_cors(&self, response: &mut Response<Full<Bytes>>) {
        let headers = response.headers_mut();
        if let Ok(origin) = self.config.cors_origin.parse::<hyper::header::HeaderValue>() {
            headers.insert("Access-Control-Allow-Origin", origin);
        }
        headers.insert(
            "Access-Control-Allow-Methods",
            hyper::header::HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            hyper::header::HeaderValue::from_static("Content-Type"),
        );
    }
}

fn is_form<B>(req: &Request<B>) -> bool {
    req.headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

fn json_ok<T: Serialize>(data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();
    Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn redirect(location: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(302)
        .header("Location", location)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn empty(status: u16) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
