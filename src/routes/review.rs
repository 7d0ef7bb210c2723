use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{json_error, LoggedIn};
use crate::db::ReviewStatus;
use crate::error::AppError;
use crate::ids::{PublicationId, TableId, Version};
use crate::review::Reviews;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub publication_recid: i64,
    pub data_recid: i64,
    pub status: String,
    pub version: i32,
}

pub async fn set_review_status(
    State(state): State<Arc<AppState>>,
    _user: LoggedIn,
    Form(form): Form<StatusForm>,
) -> Result<Response, AppError> {
    let Ok(status) = form.status.parse::<ReviewStatus>() else {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            &format!("unknown review status {}", form.status),
        ));
    };

    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    let review = reviews
        .set_status(
            TableId(form.data_recid),
            PublicationId(form.publication_recid),
            Version(form.version),
            status,
        )
        .await?;

    Ok(Json(json!({
        "recid": review.publication_recid,
        "data_id": review.data_recid,
        "status": review.status,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TableQuery {
    pub data_recid: i64,
}

pub async fn review_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TableQuery>,
) -> Result<Response, AppError> {
    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    Ok(match reviews.status_for_table(TableId(query.data_recid)).await? {
        Some(review) => Json(json!({
            "publication_recid": review.publication_recid,
            "data_recid": review.data_recid,
            "status": review.status,
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "no review found."),
    })
}

#[derive(Debug, Deserialize)]
pub struct PublicationQuery {
    pub publication_recid: i64,
}

pub async fn reviews_for_record(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PublicationQuery>,
) -> Result<Response, AppError> {
    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    let summaries = reviews
        .reviews_for_publication(PublicationId(query.publication_recid))
        .await?;
    let body: Vec<Value> = summaries
        .iter()
        .map(|r| {
            json!({
                "data_recid": r.table,
                "status": r.status,
                "last_updated": r.last_updated,
            })
        })
        .collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct MessageForm {
    pub message: String,
    pub version: i32,
}

pub async fn add_review_message(
    State(state): State<Arc<AppState>>,
    Path((publication, table)): Path<(i64, i64)>,
    LoggedIn(user): LoggedIn,
    Form(form): Form<MessageForm>,
) -> Result<Response, AppError> {
    if form.message.trim().is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "message is empty"));
    }

    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    let (review, message) = reviews
        .append_message(
            TableId(table),
            PublicationId(publication),
            Version(form.version),
            user,
            &form.message,
        )
        .await?;
    let email = state
        .store
        .user(user)
        .await?
        .map(|u| u.email)
        .unwrap_or_default();

    Ok(Json(json!({
        "publication_recid": review.publication_recid,
        "data_recid": review.data_recid,
        "status": review.status,
        "message": message.message,
        "post_time": message.creation_date,
        "user": email,
    }))
    .into_response())
}

pub async fn table_review_messages(
    State(state): State<Arc<AppState>>,
    Path((_publication, table, version)): Path<(i64, i64, i32)>,
    _user: LoggedIn,
) -> Result<Response, AppError> {
    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    Ok(match reviews.messages(TableId(table), Version(version)).await? {
        Some(messages) => Json(messages).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "there are no messages!"),
    })
}

pub async fn all_review_messages(
    State(state): State<Arc<AppState>>,
    Path(publication): Path<i64>,
    _user: LoggedIn,
) -> Result<Response, AppError> {
    let reviews = Reviews::new(state.store.as_ref(), &state.notifier);
    let mut body = Map::new();
    for group in reviews.all_messages(PublicationId(publication)).await? {
        body.insert(group.table_name, json!(group.messages));
    }
    Ok(Json(Value::Object(body)).into_response())
}
