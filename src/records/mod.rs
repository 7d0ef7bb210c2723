//! Record pages: the publication view model and the read endpoints around it.

mod tables;

pub use tables::*;

use serde::Serialize;

use crate::db::{
    Author, OverallStatus, ParticipantRole, Publication, ReviewStatus, Store, StoreError,
    Submission,
};
use crate::ids::{resolve_record_ref, PublicationId, RecordRef, TableId, UserId, Version};

pub const AUTHOR_LIMIT: usize = 10;
const DESCRIPTION_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    Record,
    DataRecord,
    Sandbox,
}

/// What the viewer may do with a publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Privileges {
    pub show_review_widget: bool,
    pub show_upload_widget: bool,
    pub is_submission_coordinator_or_admin: bool,
}

impl Privileges {
    pub fn any(&self) -> bool {
        self.show_review_widget
            || self.show_upload_widget
            || self.is_submission_coordinator_or_admin
    }
}

pub async fn determine_privileges(
    store: &dyn Store,
    publication: PublicationId,
    viewer: Option<UserId>,
) -> Result<Privileges, StoreError> {
    let Some(viewer) = viewer else {
        return Ok(Privileges::default());
    };

    let mut privileges = Privileges::default();
    for participant in store.participants(publication).await? {
        if participant.user_account != Some(viewer) {
            continue;
        }
        match participant.role {
            ParticipantRole::Reviewer => privileges.show_review_widget = true,
            ParticipantRole::Uploader => privileges.show_upload_widget = true,
        }
    }

    let admin = store.user(viewer).await?.map_or(false, |u| u.admin);
    privileges.is_submission_coordinator_or_admin =
        admin || store.is_coordinator(publication, viewer).await?;
    privileges.show_upload_widget |= privileges.is_submission_coordinator_or_admin;

    Ok(privileges)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub title: String,
    pub inspire_id: Option<String>,
    pub authors: Vec<Author>,
    pub collaborations: Vec<String>,
    pub year: Option<i32>,
    pub journal_info: Option<String>,
}

impl From<Publication> for RecordSummary {
    fn from(publication: Publication) -> Self {
        Self {
            title: publication.title,
            inspire_id: publication.inspire_id,
            authors: publication.authors.into_iter().take(AUTHOR_LIMIT).collect(),
            collaborations: split_collaborations(&publication.collaborations),
            year: publication.year,
            journal_info: publication.journal_info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub id: TableId,
    pub name: String,
    pub processed_name: String,
    pub location: Option<String>,
    pub description: String,
    pub review_flag: ReviewStatus,
    pub review_status: &'static str,
    pub messages: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub recid: PublicationId,
    pub mode: RecordMode,
    pub record: Option<RecordSummary>,
    pub breadcrumb_text: Option<String>,
    pub version: i32,
    pub version_count: i32,
    pub status: OverallStatus,
    pub data_abstract: Option<String>,
    pub coordinator: UserId,
    pub additional_resources: bool,
    #[serde(flatten)]
    pub privileges: Privileges,
    pub show_upload_area: bool,
    pub data_tables: Vec<TableSummary>,
    pub table_to_show: Option<TableId>,
    /// Set when the page was requested through a data table id.
    pub table_name: Option<String>,
    pub related_publication_id: Option<PublicationId>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordRequest {
    pub version: Option<Version>,
    /// Explicit `table` query parameter: a table id or name.
    pub table: Option<String>,
    pub viewer: Option<UserId>,
}

pub fn processed_name(name: &str) -> String {
    name.split_whitespace().collect()
}

pub fn truncate_description(description: &str) -> String {
    if description.chars().count() <= DESCRIPTION_LIMIT {
        return description.to_string();
    }
    let mut short: String = description.chars().take(DESCRIPTION_LIMIT).collect();
    short.push_str("...");
    short
}

pub fn split_collaborations(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|c| c.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn breadcrumb_text(authors: &[Author]) -> Option<String> {
    authors.first().map(|a| format!("{} et al.", a.full_name))
}

/// Resolves `raw_id` and assembles the page, `None` when nothing matches.
pub async fn assemble_by_id(
    store: &dyn Store,
    raw_id: &str,
    request: &RecordRequest,
) -> Result<Option<RecordPage>, StoreError> {
    match resolve_record_ref(store, raw_id).await? {
        Some(reference) => assemble(store, reference, RecordMode::Record, request).await,
        None => Ok(None),
    }
}

/// Builds the view model of a publication, or of the publication owning a
/// table when `reference` points at one.
pub async fn assemble(
    store: &dyn Store,
    reference: RecordRef,
    mode: RecordMode,
    request: &RecordRequest,
) -> Result<Option<RecordPage>, StoreError> {
    let publication = reference.publication();
    let Some(latest) = store.latest_submission(publication).await? else {
        return Ok(None);
    };

    let (mode, focus) = match reference {
        RecordRef::Table { table, .. } => {
            let name = store.data_table(table).await?.map(|t| t.name);
            (RecordMode::DataRecord, name)
        }
        RecordRef::Publication(_) => (mode, None),
    };

    // an explicit version that was never uploaded is not found
    let submission: Submission = match request.version {
        Some(version) if version != latest.version => {
            match store.submission(publication, version).await? {
                Some(requested) => requested,
                None => return Ok(None),
            }
        }
        _ => latest.clone(),
    };

    let record = store.publication(publication).await?.map(RecordSummary::from);
    let mut privileges = determine_privileges(store, publication, request.viewer).await?;
    if mode == RecordMode::Sandbox {
        // sandboxes never carry publication metadata
        privileges.show_upload_widget = true;
        privileges.show_review_widget = false;
    }

    let mut version = submission.version.0;
    let mut version_count = latest.version.0;
    if submission.overall_status != OverallStatus::Finished
        && version_count > 0
        && !privileges.any()
    {
        version -= 1;
        version_count -= 1;
    }

    let tables = if version > 0 {
        store.data_tables(publication, Version(version)).await?
    } else {
        Vec::new()
    };

    let mut data_tables = Vec::with_capacity(tables.len());
    let mut table_to_show = tables.first().map(|t| t.id);
    for table in &tables {
        if focus.as_deref() == Some(table.name.as_str()) {
            table_to_show = Some(table.id);
        }
        let review = store
            .get_or_create_review(table.id, publication, Version(version))
            .await?;
        let has_messages = !store.review_messages(review.id).await?.is_empty();
        data_tables.push(TableSummary {
            id: table.id,
            name: table.name.clone(),
            processed_name: processed_name(&table.name),
            location: table.location_in_publication.clone(),
            description: truncate_description(&table.description),
            review_flag: review.status,
            review_status: review.status.plain_text(),
            messages: has_messages,
        });
    }

    if let Some(explicit) = request.table.as_deref().filter(|t| !t.is_empty()) {
        let by_id = explicit.parse::<i64>().ok().map(TableId);
        if let Some(found) = tables
            .iter()
            .find(|t| {
                Some(t.id) == by_id || t.name == explicit || processed_name(&t.name) == explicit
            })
        {
            table_to_show = Some(found.id);
        }
    }

    let show_upload_area = privileges.show_upload_widget && tables.is_empty();
    let breadcrumb_text = record.as_ref().and_then(|r| breadcrumb_text(&r.authors));
    let related_publication_id = focus.as_ref().map(|_| publication);

    Ok(Some(RecordPage {
        recid: publication,
        mode,
        record,
        breadcrumb_text,
        version,
        version_count,
        status: submission.overall_status,
        data_abstract: submission.data_abstract.clone(),
        coordinator: submission.coordinator,
        additional_resources: !submission.reference_ids.is_empty(),
        privileges,
        show_upload_area,
        data_tables,
        table_to_show,
        table_name: focus,
        related_publication_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_descriptions() {
        assert_eq!(processed_name("Table 1 (a)"), "Table1(a)");
        assert_eq!(truncate_description("short"), "short");
        assert_eq!(
            truncate_description("Differential cross section in pT"),
            "Differential cross s..."
        );
    }

    #[test]
    fn collaborations_are_split() {
        let raw = vec!["ATLAS, CMS".to_string(), "LHCb".to_string()];
        assert_eq!(split_collaborations(&raw), vec!["ATLAS", "CMS", "LHCb"]);
    }

    #[test]
    fn breadcrumb_uses_first_author() {
        let authors = vec![
            Author {
                full_name: "Doe, Jane".into(),
                affiliation: None,
            },
            Author {
                full_name: "Roe, Rick".into(),
                affiliation: None,
            },
        ];
        assert_eq!(breadcrumb_text(&authors).as_deref(), Some("Doe, Jane et al."));
        assert_eq!(breadcrumb_text(&[]), None);
    }
}
