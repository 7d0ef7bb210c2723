//! Typed identifiers.
//!
//! Publications and data tables used to share one numeric namespace and were
//! told apart by probing the database. Internally every id is typed; the only
//! place a raw number is interpreted is [`resolve_record_ref`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::{Store, StoreError};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PublicationId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TableId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Version(pub i32);

impl Version {
    pub const FIRST: Version = Version(1);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    pub fn previous(self) -> Version {
        Version(self.0 - 1)
    }
}

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        })*
    };
}

display_inner!(PublicationId, TableId, UserId, Version);

/// What a `/record/<id>` URL points at once the id has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    Publication(PublicationId),
    Table {
        publication: PublicationId,
        table: TableId,
    },
}

impl RecordRef {
    pub fn publication(&self) -> PublicationId {
        match *self {
            RecordRef::Publication(id) => id,
            RecordRef::Table { publication, .. } => publication,
        }
    }
}

/// Interprets a public record id: `ins<n>` is an INSPIRE alias, a number is
/// a publication when a submission exists for it, otherwise a data table.
pub async fn resolve_record_ref(
    store: &dyn Store,
    raw: &str,
) -> Result<Option<RecordRef>, StoreError> {
    if let Some(inspire) = raw.strip_prefix("ins") {
        return Ok(store
            .latest_submission_by_inspire_id(inspire)
            .await?
            .map(|s| RecordRef::Publication(s.publication_recid)));
    }

    let Ok(number) = raw.parse::<i64>() else {
        return Ok(None);
    };

    let publication = PublicationId(number);
    if store.latest_submission(publication).await?.is_some() {
        return Ok(Some(RecordRef::Publication(publication)));
    }

    Ok(store.data_table(TableId(number)).await?.map(|t| RecordRef::Table {
        publication: t.publication_recid,
        table: t.id,
    }))
}
