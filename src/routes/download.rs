use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{attachment, json_error};
use crate::convert::{spawn_submission_conversion, Download, DownloadOptions, Gateway};
use crate::db::{DataSubmission, Store, StoreError, Submission};
use crate::error::{render_error_page, AppError};
use crate::ids::{PublicationId, TableId, Version};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub force: bool,
    /// Schedule the conversion and answer immediately.
    #[serde(default)]
    pub offline: bool,
}

/// Finds a submission by `ins<n>` or record id, at `version` or the latest.
async fn find_submission(
    store: &dyn Store,
    id: &str,
    version: Option<Version>,
) -> Result<Option<Submission>, StoreError> {
    let latest = match id.strip_prefix("ins") {
        Some(inspire) => store.latest_submission_by_inspire_id(inspire).await?,
        None => match id.parse::<i64>() {
            Ok(n) => store.latest_submission(PublicationId(n)).await?,
            Err(_) => None,
        },
    };
    match (latest, version) {
        (Some(latest), Some(version)) if version != latest.version => {
            store.submission(latest.publication_recid, version).await
        }
        (latest, _) => Ok(latest),
    }
}

pub(crate) async fn download_response(download: Download) -> Result<Response, AppError> {
    Ok(match download {
        Download::Redirect(to) => Redirect::to(&to).into_response(),
        Download::Error(page) => render_error_page(&page),
        Download::File {
            path,
            filename,
            content_type,
        } => attachment(tokio::fs::read(&path).await?, &filename, &content_type),
        Download::Bytes {
            payload,
            filename,
            content_type,
        } => attachment(payload, &filename, &content_type),
        Download::Degraded { payload, filename } => attachment(payload, &filename, "text/html"),
        Download::Prepared(path) => {
            Json(serde_json::json!({ "path": path.display().to_string() })).into_response()
        }
    })
}

async fn submission_download(
    state: Arc<AppState>,
    id: String,
    version: Option<i32>,
    format: String,
    query: DownloadQuery,
) -> Result<Response, AppError> {
    let found = find_submission(state.store.as_ref(), &id, version.map(Version)).await?;
    let Some(submission) = found else {
        return Err(AppError::NotFound(format!("No submission with id {}", id)));
    };

    if query.offline {
        info!("Scheduling conversion of {} v{} to {}", id, submission.version, format);
        spawn_submission_conversion(
            state.config.clone(),
            state.store.clone(),
            state.converter.clone(),
            submission,
            format,
            query.force,
        );
        let body = Json(serde_json::json!({ "status": "scheduled" }));
        return Ok((StatusCode::ACCEPTED, body).into_response());
    }

    let gateway = Gateway::new(&state.config, state.store.as_ref(), state.converter.as_ref());
    let opts = DownloadOptions {
        force: query.force,
        offline: false,
    };
    download_response(gateway.download_submission(&submission, &format, opts).await?).await
}

pub async fn download_submission_with_version(
    State(state): State<Arc<AppState>>,
    Path((id, version, format)): Path<(String, i32, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    submission_download(state, id, Some(version), format, query).await
}

pub async fn download_submission(
    State(state): State<Arc<AppState>>,
    Path((id, format)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    submission_download(state, id, None, format, query).await
}

/// Looks a table up by name in the submission, then as a table id. Names
/// written without a space (`Table1`) also match `Table 1`.
async fn find_table(
    store: &dyn Store,
    submission: &Submission,
    table: &str,
) -> Result<Option<DataSubmission>, StoreError> {
    let mut names = vec![table.to_string()];
    if !table.contains(' ') && table.contains("Table") {
        names.push(table.replace("Table", "Table "));
    }
    for name in &names {
        if let Some(found) = store
            .data_table_by_name(submission.publication_recid, submission.version, name)
            .await?
        {
            return Ok(Some(found));
        }
    }
    match table.parse::<i64>() {
        Ok(n) => Ok(store
            .data_table(TableId(n))
            .await?
            .filter(|t| t.publication_recid == submission.publication_recid)),
        Err(_) => Ok(None),
    }
}

async fn table_download(
    state: Arc<AppState>,
    id: String,
    table: String,
    version: Option<i32>,
    format: String,
    query: DownloadQuery,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let Some(submission) = find_submission(store, &id, version.map(Version)).await? else {
        return Err(AppError::NotFound(format!("No submission with id {}", id)));
    };
    let Some(data_table) = find_table(store, &submission, &table).await? else {
        return Ok(json_error(StatusCode::NOT_FOUND, "data table not found"));
    };

    let gateway = Gateway::new(&state.config, store, state.converter.as_ref());
    let opts = DownloadOptions {
        force: query.force,
        offline: false,
    };
    let ident = submission.file_identifier();
    let download = gateway
        .download_table(&data_table, &format, &ident, Some(&data_table.name), opts)
        .await?;
    download_response(download).await
}

pub async fn download_table_with_version(
    State(state): State<Arc<AppState>>,
    Path((id, table, version, format)): Path<(String, String, i32, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    table_download(state, id, table, Some(version), format, query).await
}

pub async fn download_table(
    State(state): State<Arc<AppState>>,
    Path((id, table, format)): Path<(String, String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    table_download(state, id, table, None, format, query).await
}

/// `/download/table/<table id>/<format>`: the file is named after the table
/// id rather than the record.
pub async fn download_table_by_id(
    State(state): State<Arc<AppState>>,
    Path((data_id, format)): Path<(i64, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let Some(data_table) = store.data_table(TableId(data_id)).await? else {
        return Ok(json_error(StatusCode::NOT_FOUND, "data table not found"));
    };

    let gateway = Gateway::new(&state.config, store, state.converter.as_ref());
    let opts = DownloadOptions {
        force: query.force,
        offline: false,
    };
    let download = gateway
        .download_table(&data_table, &format, &data_id.to_string(), None, opts)
        .await?;
    download_response(download).await
}

/// Converts an uploaded archive without storing it. Fields: `file`, `from`,
/// `to`.
pub async fn convert_archive(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut filename = String::new();
    let mut archive = Vec::new();
    let mut from = "yaml".to_string();
    let mut to = "root".to_string();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().unwrap_or("").to_string();
                if let Ok(data) = field.bytes().await {
                    archive = data.to_vec();
                }
            }
            "from" => {
                if let Ok(text) = field.text().await {
                    from = text;
                }
            }
            "to" => {
                if let Ok(text) = field.text().await {
                    to = text;
                }
            }
            _ => {}
        }
    }

    let gateway = Gateway::new(&state.config, state.store.as_ref(), state.converter.as_ref());
    download_response(gateway.convert_ad_hoc(&archive, &filename, &from, &to).await?).await
}
