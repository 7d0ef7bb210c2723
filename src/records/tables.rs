use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::db::{Author, ParticipantRole, ParticipantStatus, Store, StoreError};
use crate::ids::{PublicationId, TableId, Version};

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("data file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Parsed data file of one table plus its metadata, associated files and
/// review flag. Creates the review row when it is missing.
pub async fn table_details(
    store: &dyn Store,
    publication: PublicationId,
    table: TableId,
    version: Version,
) -> Result<Option<Value>, RecordsError> {
    let Some(data_table) = store.data_table(table).await?.filter(|t| t.version == version) else {
        return Ok(None);
    };

    let mut contents = json!({});
    if let Some(resource) = match data_table.data_file {
        Some(id) => store.resource(id).await?,
        None => None,
    } {
        let text = tokio::fs::read_to_string(&resource.file_location).await?;
        let parsed: Value = serde_yaml::from_str(&text)?;
        if parsed.is_object() {
            contents = parsed;
        }
        contents["name"] = json!(data_table.name);
        contents["title"] = json!(data_table.description);
        contents["keywords"] = json!(data_table.keywords);
    }

    let associated: Vec<Value> = store
        .resources(&data_table.additional_file_ids)
        .await?
        .into_iter()
        .filter(|r| !r.file_description.to_lowercase().contains("thumbnail"))
        .map(|r| {
            let alt_location = if r.file_type == "github" {
                r.file_location.clone()
            } else {
                String::new()
            };
            json!({
                "description": r.file_description,
                "type": r.file_type,
                "id": r.id,
                "alt_location": alt_location,
            })
        })
        .collect();
    contents["associated_files"] = Value::Array(associated);

    let review = store.get_or_create_review(table, publication, version).await?;
    let has_messages = !store.review_messages(review.id).await?.is_empty();
    contents["review"] = json!({
        "review_flag": review.status,
        "messages": has_messages,
    });

    Ok(Some(contents))
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    pub id: i64,
    pub file_type: String,
    pub file_description: String,
    pub location: String,
}

/// References attached to the latest submission of a publication.
pub async fn publication_resources(
    store: &dyn Store,
    publication: PublicationId,
) -> Result<Vec<ResourceView>, StoreError> {
    let Some(submission) = store.latest_submission(publication).await? else {
        return Ok(Vec::new());
    };
    Ok(store
        .resources(&submission.reference_ids)
        .await?
        .into_iter()
        .map(|r| ResourceView {
            id: r.id,
            file_type: r.file_type,
            file_description: r.file_description,
            location: r.file_location,
        })
        .collect())
}

fn is_remote(location: &str) -> bool {
    location.contains("http") || location.contains("www")
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    /// A local HTML file, served inline.
    Html(String),
    Location(String),
}

pub async fn resource_content(
    store: &dyn Store,
    id: i64,
) -> Result<Option<ResourceContent>, RecordsError> {
    let Some(resource) = store.resource(id).await? else {
        return Ok(None);
    };
    if resource.file_location.contains("html") && !resource.file_location.contains("http") {
        let html = tokio::fs::read_to_string(&resource.file_location).await?;
        return Ok(Some(ResourceContent::Html(html)));
    }
    Ok(Some(ResourceContent::Location(resource.file_location)))
}

#[derive(Debug, Clone, Serialize)]
pub struct DataFileView {
    pub file_type: String,
    pub file_description: String,
    pub file_contents: String,
}

/// Contents of a resource file; remote resources report their location.
pub async fn data_file(store: &dyn Store, id: i64) -> Result<Option<DataFileView>, RecordsError> {
    let Some(resource) = store.resource(id).await? else {
        return Ok(None);
    };
    let path = Path::new(&resource.file_location);
    let file_contents = if path.is_file() {
        tokio::fs::read_to_string(path).await?
    } else if is_remote(&resource.file_location) {
        resource.file_location.clone()
    } else {
        String::new()
    };
    Ok(Some(DataFileView {
        file_type: resource.file_type,
        file_description: resource.file_description,
        file_contents,
    }))
}

/// Local path and attachment name of a downloadable resource.
pub async fn resource_file(
    store: &dyn Store,
    id: i64,
) -> Result<Option<(PathBuf, String)>, StoreError> {
    Ok(store.resource(id).await?.and_then(|r| {
        let path = PathBuf::from(&r.file_location);
        let name = path.file_name()?.to_string_lossy().to_string();
        path.is_file().then_some((path, name))
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub full_name: String,
    pub email: String,
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorView {
    pub recid: i64,
    #[serde(rename = "primary-reviewers")]
    pub primary_reviewers: Vec<ParticipantView>,
    #[serde(rename = "reserve-reviewers")]
    pub reserve_reviewers: Vec<ParticipantView>,
    #[serde(rename = "primary-uploaders")]
    pub primary_uploaders: Vec<ParticipantView>,
    #[serde(rename = "reserve-uploaders")]
    pub reserve_uploaders: Vec<ParticipantView>,
}

pub async fn coordinator_view(
    store: &dyn Store,
    publication: PublicationId,
) -> Result<CoordinatorView, StoreError> {
    let mut view = CoordinatorView {
        recid: publication.0,
        ..CoordinatorView::default()
    };
    for p in store.participants(publication).await? {
        let bucket = match (p.role, p.status) {
            (ParticipantRole::Reviewer, ParticipantStatus::Primary) => &mut view.primary_reviewers,
            (ParticipantRole::Reviewer, ParticipantStatus::Reserve) => &mut view.reserve_reviewers,
            (ParticipantRole::Uploader, ParticipantStatus::Primary) => &mut view.primary_uploaders,
            (ParticipantRole::Uploader, ParticipantStatus::Reserve) => &mut view.reserve_uploaders,
        };
        bucket.push(ParticipantView {
            full_name: p.full_name,
            email: p.email,
            id: p.id,
        });
    }
    Ok(view)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordCount {
    pub data: i64,
    pub publications: i64,
}

pub async fn count(store: &dyn Store) -> Result<RecordCount, StoreError> {
    Ok(RecordCount {
        data: store.count_data_tables().await?,
        publications: store.count_publications().await?,
    })
}

pub const LATEST_DEFAULT: i64 = 3;

/// One entry of the front page's "recently updated" list.
#[derive(Debug, Clone, Serialize)]
pub struct LatestRecord {
    pub id: PublicationId,
    pub inspire_id: Option<String>,
    pub title: String,
    pub collaborations: Vec<String>,
    pub journal: Option<String>,
    pub first_author: Option<Author>,
    pub creation_date: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestRecords {
    pub latest: Vec<LatestRecord>,
}

/// The `n` most recently updated finished records. Records without
/// publication metadata are left out.
pub async fn latest(store: &dyn Store, n: i64) -> Result<LatestRecords, StoreError> {
    let mut latest = Vec::new();
    for submission in store.latest_finished_submissions(n.max(0)).await? {
        let Some(publication) = store.publication(submission.publication_recid).await? else {
            continue;
        };
        latest.push(LatestRecord {
            id: publication.id,
            inspire_id: submission.inspire_id.or(publication.inspire_id),
            title: publication.title,
            collaborations: publication.collaborations,
            journal: publication.journal_info,
            first_author: publication.authors.into_iter().next(),
            creation_date: publication.creation_date.format("%Y-%m-%d").to_string(),
            last_updated: submission.last_updated.format("%Y-%m-%d").to_string(),
        });
    }
    Ok(LatestRecords { latest })
}
