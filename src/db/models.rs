use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PublicationId, TableId, UserId, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Sandbox,
    Todo,
    #[serde(rename = "review")]
    InReview,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Todo,
    Attention,
    Passed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Uploader,
    Reviewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Primary,
    Reserve,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),* $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)*
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)*
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(OverallStatus, "submission status", {
    Sandbox => "sandbox",
    Todo => "todo",
    InReview => "review",
    Finished => "finished",
});

text_enum!(ReviewStatus, "review status", {
    Todo => "todo",
    Attention => "attention",
    Passed => "passed",
});

text_enum!(ParticipantRole, "participant role", {
    Uploader => "uploader",
    Reviewer => "reviewer",
});

text_enum!(ParticipantStatus, "participant status", {
    Primary => "primary",
    Reserve => "reserve",
});

impl ReviewStatus {
    pub fn plain_text(&self) -> &'static str {
        match self {
            ReviewStatus::Passed => "passed review",
            ReviewStatus::Attention => "attention required",
            ReviewStatus::Todo => "to be reviewed",
        }
    }
}

/// Bibliographic metadata of a publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    pub title: String,
    pub inspire_id: Option<String>,
    pub authors: Vec<Author>,
    pub collaborations: Vec<String>,
    pub year: Option<i32>,
    pub journal_info: Option<String>,
    pub creation_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub publication_recid: PublicationId,
    pub inspire_id: Option<String>,
    pub version: Version,
    pub overall_status: OverallStatus,
    pub coordinator: UserId,
    pub doi: Option<String>,
    pub data_abstract: Option<String>,
    pub reference_ids: Vec<i64>,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Submission {
    /// `ins<inspire id>` when the publication is known to INSPIRE, else the record id.
    pub fn file_identifier(&self) -> String {
        match &self.inspire_id {
            Some(inspire) => format!("ins{}", inspire),
            None => self.publication_recid.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub publication_recid: PublicationId,
    pub inspire_id: Option<String>,
    pub version: Version,
    pub overall_status: OverallStatus,
    pub coordinator: UserId,
    pub doi: Option<String>,
    pub data_abstract: Option<String>,
}

/// The submission version an upload is written into.
#[derive(Debug, Clone)]
pub enum UploadSlot {
    /// An unfinished version whose tables and reviews are replaced.
    Replace(Submission),
    Create(NewSubmission),
}

impl UploadSlot {
    pub fn publication_recid(&self) -> PublicationId {
        match self {
            UploadSlot::Replace(s) => s.publication_recid,
            UploadSlot::Create(n) => n.publication_recid,
        }
    }

    pub fn inspire_id(&self) -> Option<&str> {
        match self {
            UploadSlot::Replace(s) => s.inspire_id.as_deref(),
            UploadSlot::Create(n) => n.inspire_id.as_deref(),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            UploadSlot::Replace(s) => s.version,
            UploadSlot::Create(n) => n.version,
        }
    }
}

/// Everything one manifest writes, committed as a unit by
/// [`Store::commit_upload`](super::Store::commit_upload).
#[derive(Debug, Clone)]
pub struct SubmissionUpload {
    pub slot: UploadSlot,
    /// Replaces the stored abstract when present.
    pub data_abstract: Option<String>,
    pub reference_ids: Vec<i64>,
    pub tables: Vec<NewDataSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub value: String,
}

/// One data table of one submission version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSubmission {
    pub id: TableId,
    pub publication_recid: PublicationId,
    pub publication_inspire_id: Option<String>,
    pub version: Version,
    pub name: String,
    pub description: String,
    pub location_in_publication: Option<String>,
    pub keywords: Vec<Keyword>,
    pub doi: Option<String>,
    pub data_file: Option<i64>,
    pub additional_file_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewDataSubmission {
    pub publication_recid: PublicationId,
    pub publication_inspire_id: Option<String>,
    pub version: Version,
    pub name: String,
    pub description: String,
    pub location_in_publication: Option<String>,
    pub keywords: Vec<Keyword>,
    pub doi: Option<String>,
    pub data_file: Option<i64>,
    pub additional_file_ids: Vec<i64>,
}

/// A file reference: a local path or a remote URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResource {
    pub id: i64,
    pub file_type: String,
    pub file_description: String,
    pub file_location: String,
}

#[derive(Debug, Clone)]
pub struct NewDataResource {
    pub file_type: String,
    pub file_description: String,
    pub file_location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataReview {
    pub id: i64,
    pub publication_recid: PublicationId,
    pub data_recid: TableId,
    pub version: Version,
    pub status: ReviewStatus,
    pub creation_date: DateTime<Utc>,
    pub modification_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataReviewMessage {
    pub id: i64,
    pub review_id: i64,
    pub user: UserId,
    pub message: String,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionParticipant {
    pub id: i64,
    pub publication_recid: PublicationId,
    pub user_account: Option<UserId>,
    pub full_name: String,
    pub email: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub action_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub publication_recid: PublicationId,
    pub user_account: Option<UserId>,
    pub full_name: String,
    pub email: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub admin: bool,
}
