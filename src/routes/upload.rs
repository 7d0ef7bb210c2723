use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use tracing::{info, warn};

use super::LoggedIn;
use crate::db::ParticipantRole;
use crate::error::AppError;
use crate::ids::{PublicationId, UserId};
use crate::ingest::{self, IngestError, UploadTarget};
use crate::notify::Notification;
use crate::state::AppState;

/// Name of the multipart field carrying the archive.
const ARCHIVE_FIELD: &str = "hep_archive";

async fn read_archive(mut multipart: Multipart) -> Result<(String, Vec<u8>), IngestError> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some(ARCHIVE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        return match field.bytes().await {
            Ok(data) if !data.is_empty() => Ok((filename, data.to_vec())),
            _ => Err(IngestError::NotAnArchive),
        };
    }
    Err(IngestError::NotAnArchive)
}

async fn process_payload(
    state: &AppState,
    multipart: Multipart,
    target: UploadTarget,
    redirect_to: String,
) -> Result<Response, AppError> {
    let (filename, bytes) = read_archive(multipart).await?;

    let ingested = ingest::process_zip_archive(
        &state.config,
        state.store.as_ref(),
        state.converter.as_ref(),
        &filename,
        &bytes,
        target,
    )
    .await?;

    let stamped = state
        .store
        .record_participant_action(
            target.publication,
            target.uploader,
            ParticipantRole::Uploader,
            Utc::now(),
        )
        .await?;
    if stamped == 0 {
        info!(
            "User {} uploaded to {} without an uploader role",
            target.uploader, target.publication
        );
    }

    state.notifier.send(Notification::NewUpload {
        publication: ingested.submission.publication_recid,
        version: ingested.submission.version,
        uploader: target.uploader,
    });

    Ok(Redirect::to(&redirect_to).into_response())
}

pub async fn consume_redirect(Path(id): Path<i64>) -> Redirect {
    Redirect::to(&format!("/record/{}", id))
}

/// Upload of a new or replacement version of a publication.
pub async fn consume_data_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    LoggedIn(user): LoggedIn,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let target = UploadTarget {
        publication: PublicationId(id),
        uploader: user,
        sandbox: false,
    };
    process_payload(&state, multipart, target, format!("/record/{}", id)).await
}

/// Upload into a freshly allocated sandbox record.
pub async fn consume_sandbox_payload(
    State(state): State<Arc<AppState>>,
    LoggedIn(user): LoggedIn,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let publication = state.store.allocate_publication_id().await?;
    let target = UploadTarget {
        publication,
        uploader: user,
        sandbox: true,
    };
    process_payload(&state, multipart, target, format!("/record/sandbox/{}", publication)).await
}

/// Re-upload into an existing sandbox record owned by the user.
pub async fn update_sandbox_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    LoggedIn(user): LoggedIn,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let publication = PublicationId(id);
    if !is_sandbox_owner(&state, publication, user).await? {
        warn!("User {} may not update sandbox {}", user, id);
        return Err(AppError::Unauthorized);
    }
    let target = UploadTarget {
        publication,
        uploader: user,
        sandbox: true,
    };
    process_payload(&state, multipart, target, format!("/record/sandbox/{}", id)).await
}

async fn is_sandbox_owner(
    state: &AppState,
    publication: PublicationId,
    user: UserId,
) -> Result<bool, AppError> {
    Ok(state.store.is_coordinator(publication, user).await?)
}
