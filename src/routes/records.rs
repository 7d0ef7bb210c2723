use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tera::Context;

use super::{attachment, json_error, LoggedIn, Viewer};
use crate::error::{AppError, ErrorGroups, ErrorPage};
use crate::ids::{resolve_record_ref, PublicationId, RecordRef, TableId, Version};
use crate::records::{self, RecordMode, RecordPage, RecordRequest, ResourceContent};
use crate::search;
use crate::state::AppState;
use crate::templates;

#[derive(Debug, Default, Deserialize)]
pub struct RecordQuery {
    pub version: Option<i32>,
    pub table: Option<String>,
    pub format: Option<String>,
}

impl RecordQuery {
    fn request(&self, viewer: Viewer) -> RecordRequest {
        RecordRequest {
            version: self.version.filter(|v| *v > 0).map(Version),
            table: self.table.clone(),
            viewer: viewer.0,
        }
    }
}

pub(crate) fn render_record(page: &RecordPage) -> Result<Response, AppError> {
    let template = match page.mode {
        RecordMode::Record => "record.html",
        RecordMode::DataRecord => "data_record.html",
        RecordMode::Sandbox => "sandbox.html",
    };
    let mut ctx = Context::new();
    ctx.insert("ctx", page);
    Ok(templates::render(template, &ctx)?.into_response())
}

/// `/record/<id>` and `/record/<id>/metadata`: a publication, an `ins<n>`
/// alias, or a data table shown inside its publication.
pub async fn record_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecordQuery>,
    viewer: Viewer,
) -> Result<Response, AppError> {
    let request = query.request(viewer);
    let page = records::assemble_by_id(state.store.as_ref(), &id, &request)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No record with id {}", id)))?;

    if query.format.as_deref() == Some("json") {
        return Ok(Json(page).into_response());
    }
    render_record(&page)
}

/// Enriched search document of a publication.
pub async fn record_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let Some(reference) = resolve_record_ref(store, &id).await? else {
        return Ok(json_error(StatusCode::NOT_FOUND, "record not found"));
    };
    let doc =
        search::enriched_publication_document(store, &state.config, reference.publication()).await?;
    match doc {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Ok(json_error(StatusCode::NOT_FOUND, "record not found")),
    }
}

pub async fn record_count(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(Json(records::count(state.store.as_ref()).await?).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    pub n: Option<i64>,
}

pub async fn latest_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> Result<Response, AppError> {
    let n = query.n.unwrap_or(records::LATEST_DEFAULT);
    Ok(Json(records::latest(state.store.as_ref(), n).await?).into_response())
}

pub async fn table_details(
    State(state): State<Arc<AppState>>,
    Path((publication, table, version)): Path<(i64, i64, i32)>,
) -> Result<Response, AppError> {
    let details = records::table_details(
        state.store.as_ref(),
        PublicationId(publication),
        TableId(table),
        Version(version),
    )
    .await?;
    Ok(match details {
        Some(details) => Json(details).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "data table not found"),
    })
}

pub async fn data_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    _user: LoggedIn,
) -> Result<Response, AppError> {
    Ok(match records::data_file(state.store.as_ref(), id).await? {
        Some(file) => Json(file).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "data file not found"),
    })
}

pub async fn publication_resources(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let resources = records::publication_resources(state.store.as_ref(), PublicationId(id)).await?;
    Ok(Json(resources).into_response())
}

pub async fn resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    Ok(match records::resource_content(state.store.as_ref(), id).await? {
        Some(ResourceContent::Html(html)) => Html(html).into_response(),
        Some(ResourceContent::Location(location)) => {
            Json(serde_json::json!({ "location": location })).into_response()
        }
        None => json_error(StatusCode::NOT_FOUND, "Unable to find resource."),
    })
}

pub async fn download_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let Some((path, filename)) = records::resource_file(state.store.as_ref(), id).await? else {
        return Ok(json_error(StatusCode::NOT_FOUND, "Unable to find resource."));
    };
    let content = tokio::fs::read(&path).await?;
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    Ok(attachment(content, &filename, mime.essence_str()))
}

pub async fn coordinator_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    _user: LoggedIn,
) -> Result<Response, AppError> {
    let view = records::coordinator_view(state.store.as_ref(), PublicationId(id)).await?;
    Ok(Json(view).into_response())
}

pub async fn sandbox_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<RecordQuery>,
    viewer: Viewer,
) -> Result<Response, AppError> {
    let request = query.request(viewer);
    let reference = RecordRef::Publication(PublicationId(id));
    match records::assemble(state.store.as_ref(), reference, RecordMode::Sandbox, &request).await? {
        Some(page) => render_record(&page),
        None => {
            Err(ErrorPage::new("No submission exists with that ID.", ErrorGroups::default()).into())
        }
    }
}

pub async fn sandbox_list(
    State(state): State<Arc<AppState>>,
    LoggedIn(user): LoggedIn,
) -> Result<Response, AppError> {
    let submissions = state.store.sandbox_submissions(user).await?;
    let mut ctx = Context::new();
    ctx.insert("submissions", &submissions);
    Ok(templates::render("sandbox_list.html", &ctx)?.into_response())
}
