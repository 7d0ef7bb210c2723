mod memory;
mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

use crate::ids::{PublicationId, TableId, UserId, Version};

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("{kind} {id} does not exist")]
    Missing { kind: &'static str, id: i64 },
}

/// Persistence for submissions, tables, resources, reviews and participants.
#[async_trait]
pub trait Store: Send + Sync {
    // publications

    async fn publication(&self, id: PublicationId) -> Result<Option<Publication>, StoreError>;

    async fn upsert_publication(&self, publication: &Publication) -> Result<(), StoreError>;

    /// Hands out a fresh publication id for sandbox uploads.
    async fn allocate_publication_id(&self) -> Result<PublicationId, StoreError>;

    async fn count_publications(&self) -> Result<i64, StoreError>;

    // submissions

    async fn create_submission(&self, new: &NewSubmission) -> Result<Submission, StoreError>;

    async fn submission(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Option<Submission>, StoreError>;

    async fn latest_submission(
        &self,
        publication: PublicationId,
    ) -> Result<Option<Submission>, StoreError>;

    async fn latest_submission_by_inspire_id(
        &self,
        inspire_id: &str,
    ) -> Result<Option<Submission>, StoreError>;

    async fn sandbox_submissions(
        &self,
        coordinator: UserId,
    ) -> Result<Vec<Submission>, StoreError>;

    async fn is_coordinator(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<bool, StoreError>;

    async fn set_submission_references(
        &self,
        submission_id: i64,
        reference_ids: &[i64],
    ) -> Result<(), StoreError>;

    /// The newest finished version of each publication, most recently
    /// updated first.
    async fn latest_finished_submissions(&self, limit: i64) -> Result<Vec<Submission>, StoreError>;

    /// Writes an upload in one transaction. A replaced version loses its old
    /// tables together with their reviews and review messages.
    async fn commit_upload(
        &self,
        upload: &SubmissionUpload,
    ) -> Result<(Submission, Vec<DataSubmission>), StoreError>;

    // data tables

    /// Tables of one version in insertion order.
    async fn data_tables(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Vec<DataSubmission>, StoreError>;

    async fn data_table(&self, id: TableId) -> Result<Option<DataSubmission>, StoreError>;

    async fn data_table_by_name(
        &self,
        publication: PublicationId,
        version: Version,
        name: &str,
    ) -> Result<Option<DataSubmission>, StoreError>;

    async fn insert_data_table(
        &self,
        new: &NewDataSubmission,
    ) -> Result<DataSubmission, StoreError>;

    async fn count_data_tables(&self) -> Result<i64, StoreError>;

    // resources

    async fn insert_resource(&self, new: &NewDataResource) -> Result<DataResource, StoreError>;

    async fn resource(&self, id: i64) -> Result<Option<DataResource>, StoreError>;

    /// Resources for `ids`, in the order given; unknown ids are skipped.
    async fn resources(&self, ids: &[i64]) -> Result<Vec<DataResource>, StoreError>;

    // reviews

    /// Insert-or-ignore on `(data_recid, version)` followed by a read.
    async fn get_or_create_review(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
    ) -> Result<DataReview, StoreError>;

    async fn review(
        &self,
        table: TableId,
        version: Version,
    ) -> Result<Option<DataReview>, StoreError>;

    async fn set_review_status(
        &self,
        review_id: i64,
        status: ReviewStatus,
    ) -> Result<DataReview, StoreError>;

    async fn reviews_for_publication(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<DataReview>, StoreError>;

    async fn latest_review_for_table(
        &self,
        table: TableId,
    ) -> Result<Option<DataReview>, StoreError>;

    async fn append_review_message(
        &self,
        review_id: i64,
        user: UserId,
        message: &str,
    ) -> Result<DataReviewMessage, StoreError>;

    /// Messages of a review in creation order.
    async fn review_messages(&self, review_id: i64) -> Result<Vec<DataReviewMessage>, StoreError>;

    // participants and users

    async fn add_participant(
        &self,
        new: &NewParticipant,
    ) -> Result<SubmissionParticipant, StoreError>;

    async fn participants(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<SubmissionParticipant>, StoreError>;

    /// Stamps `action_date` on the user's participant rows with `role`.
    async fn record_participant_action(
        &self,
        publication: PublicationId,
        user: UserId,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Action date of the first participant ordered by action date.
    async fn earliest_participant_action(
        &self,
        publication: PublicationId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn add_subscriber(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<(), StoreError>;

    async fn subscribers(&self, publication: PublicationId) -> Result<Vec<User>, StoreError>;
}
