use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use tera::Context;
use thiserror::Error;

use crate::convert::GatewayError;
use crate::db::StoreError;
use crate::ingest::IngestError;
use crate::records::RecordsError;
use crate::templates;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub level: String,
    pub message: String,
}

/// Errors grouped by the component that raised them, e.g.
/// `{"Converter": [{"level": "error", "message": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorGroups(pub BTreeMap<String, Vec<ErrorEntry>>);

impl ErrorGroups {
    pub fn single(group: &str, message: impl Into<String>) -> Self {
        let mut groups = Self::default();
        groups.push(group, message);
        groups
    }

    pub fn push(&mut self, group: &str, message: impl Into<String>) {
        self.0.entry(group.to_string()).or_default().push(ErrorEntry {
            level: "error".to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All messages of one group, in insertion order.
    pub fn messages(&self, group: &str) -> Vec<&str> {
        self.0
            .get(group)
            .map(|entries| entries.iter().map(|e| e.message.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A user-facing error rendered with `error_page.html`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPage {
    pub message: String,
    pub errors: ErrorGroups,
}

impl ErrorPage {
    pub fn new(message: impl Into<String>, errors: ErrorGroups) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }

    pub fn converter(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, ErrorGroups::single("Converter", description))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad input from the user; rendered as an error page with status 200.
    #[error("{}", .0.message)]
    Page(ErrorPage),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("login required")]
    Unauthorized,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Records(#[from] RecordsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

impl From<ErrorPage> for AppError {
    fn from(page: ErrorPage) -> Self {
        AppError::Page(page)
    }
}

pub fn render_error_page(page: &ErrorPage) -> Response {
    let mut ctx = Context::new();
    ctx.insert("message", &page.message);
    ctx.insert("errors", &page.errors);
    match templates::render("error_page.html", &ctx) {
        Ok(html) => html.into_response(),
        Err(e) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn plain_error(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Page(page) => render_error_page(&page),
            AppError::NotFound(what) => {
                let mut ctx = Context::new();
                ctx.insert("message", &what);
                match templates::render("404.html", &ctx) {
                    Ok(html) => (StatusCode::NOT_FOUND, html).into_response(),
                    Err(_) => plain_error(StatusCode::NOT_FOUND, &what),
                }
            }
            AppError::Unauthorized => plain_error(StatusCode::UNAUTHORIZED, "Login required."),
            AppError::Ingest(IngestError::Store(e)) => AppError::Store(e).into_response(),
            AppError::Ingest(e) => {
                tracing::warn!("Upload rejected: {}", e);
                render_error_page(&e.to_page())
            }
            other => {
                tracing::error!("Request failed: {}", other);
                let body: Html<String> = Html(format!(
                    "<h1>Internal error</h1><p>{}</p>",
                    tera::escape_html(&other.to_string())
                ));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
