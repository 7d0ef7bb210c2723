use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, PgPool};

use super::models::*;
use super::{DbPool, Store, StoreError};
use crate::ids::{PublicationId, TableId, UserId, Version};

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

#[derive(FromRow)]
struct PublicationRow {
    id: i64,
    title: String,
    inspire_id: Option<String>,
    authors: Json<Vec<Author>>,
    collaborations: Vec<String>,
    year: Option<i32>,
    journal_info: Option<String>,
    creation_date: NaiveDate,
}

impl From<PublicationRow> for Publication {
    fn from(r: PublicationRow) -> Self {
        Publication {
            id: PublicationId(r.id),
            title: r.title,
            inspire_id: r.inspire_id,
            authors: r.authors.0,
            collaborations: r.collaborations,
            year: r.year,
            journal_info: r.journal_info,
            creation_date: r.creation_date,
        }
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: i64,
    publication_recid: i64,
    inspire_id: Option<String>,
    version: i32,
    overall_status: String,
    coordinator: i64,
    doi: Option<String>,
    data_abstract: Option<String>,
    reference_ids: Vec<i64>,
    created: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(r: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Submission {
            id: r.id,
            publication_recid: PublicationId(r.publication_recid),
            inspire_id: r.inspire_id,
            version: Version(r.version),
            overall_status: r.overall_status.parse()?,
            coordinator: UserId(r.coordinator),
            doi: r.doi,
            data_abstract: r.data_abstract,
            reference_ids: r.reference_ids,
            created: r.created,
            last_updated: r.last_updated,
        })
    }
}

#[derive(FromRow)]
struct DataSubmissionRow {
    id: i64,
    publication_recid: i64,
    publication_inspire_id: Option<String>,
    version: i32,
    name: String,
    description: String,
    location_in_publication: Option<String>,
    keywords: Json<Vec<Keyword>>,
    doi: Option<String>,
    data_file: Option<i64>,
    additional_file_ids: Vec<i64>,
}

impl From<DataSubmissionRow> for DataSubmission {
    fn from(r: DataSubmissionRow) -> Self {
        DataSubmission {
            id: TableId(r.id),
            publication_recid: PublicationId(r.publication_recid),
            publication_inspire_id: r.publication_inspire_id,
            version: Version(r.version),
            name: r.name,
            description: r.description,
            location_in_publication: r.location_in_publication,
            keywords: r.keywords.0,
            doi: r.doi,
            data_file: r.data_file,
            additional_file_ids: r.additional_file_ids,
        }
    }
}

#[derive(FromRow)]
struct ResourceRow {
    id: i64,
    file_type: String,
    file_description: String,
    file_location: String,
}

impl From<ResourceRow> for DataResource {
    fn from(r: ResourceRow) -> Self {
        DataResource {
            id: r.id,
            file_type: r.file_type,
            file_description: r.file_description,
            file_location: r.file_location,
        }
    }
}

#[derive(FromRow)]
struct ReviewRow {
    id: i64,
    publication_recid: i64,
    data_recid: i64,
    version: i32,
    status: String,
    creation_date: DateTime<Utc>,
    modification_date: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for DataReview {
    type Error = StoreError;

    fn try_from(r: ReviewRow) -> Result<Self, Self::Error> {
        Ok(DataReview {
            id: r.id,
            publication_recid: PublicationId(r.publication_recid),
            data_recid: TableId(r.data_recid),
            version: Version(r.version),
            status: r.status.parse()?,
            creation_date: r.creation_date,
            modification_date: r.modification_date,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    review_id: i64,
    user_id: i64,
    message: String,
    creation_date: DateTime<Utc>,
}

impl From<MessageRow> for DataReviewMessage {
    fn from(r: MessageRow) -> Self {
        DataReviewMessage {
            id: r.id,
            review_id: r.review_id,
            user: UserId(r.user_id),
            message: r.message,
            creation_date: r.creation_date,
        }
    }
}

#[derive(FromRow)]
struct ParticipantRow {
    id: i64,
    publication_recid: i64,
    user_account: Option<i64>,
    full_name: String,
    email: String,
    role: String,
    status: String,
    action_date: Option<DateTime<Utc>>,
}

impl TryFrom<ParticipantRow> for SubmissionParticipant {
    type Error = StoreError;

    fn try_from(r: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(SubmissionParticipant {
            id: r.id,
            publication_recid: PublicationId(r.publication_recid),
            user_account: r.user_account.map(UserId),
            full_name: r.full_name,
            email: r.email,
            role: r.role.parse()?,
            status: r.status.parse()?,
            action_date: r.action_date,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    admin: bool,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: UserId(r.id),
            email: r.email,
            admin: r.admin,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const SUBMISSION_COLUMNS: &str = "id, publication_recid, inspire_id, version, overall_status, coordinator, \
     doi, data_abstract, reference_ids, created, last_updated";

const TABLE_COLUMNS: &str = "id, publication_recid, publication_inspire_id, version, name, description, \
     location_in_publication, keywords, doi, data_file, additional_file_ids";

const REVIEW_COLUMNS: &str =
    "id, publication_recid, data_recid, version, status, creation_date, modification_date";

const PARTICIPANT_COLUMNS: &str =
    "id, publication_recid, user_account, full_name, email, role, status, action_date";

async fn insert_submission<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewSubmission,
) -> Result<Submission, StoreError> {
    let row = sqlx::query_as::<_, SubmissionRow>(&format!(
        r#"
        INSERT INTO submissions (publication_recid, inspire_id, version, overall_status, coordinator, doi, data_abstract)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {}
        "#,
        SUBMISSION_COLUMNS
    ))
    .bind(new.publication_recid.0)
    .bind(&new.inspire_id)
    .bind(new.version.0)
    .bind(new.overall_status.as_str())
    .bind(new.coordinator.0)
    .bind(&new.doi)
    .bind(&new.data_abstract)
    .fetch_one(executor)
    .await?;
    row.try_into()
}

async fn insert_table<'e, E: PgExecutor<'e>>(
    executor: E,
    new: &NewDataSubmission,
) -> Result<DataSubmission, StoreError> {
    let row = sqlx::query_as::<_, DataSubmissionRow>(&format!(
        r#"
        INSERT INTO data_submissions (publication_recid, publication_inspire_id, version, name, description,
            location_in_publication, keywords, doi, data_file, additional_file_ids)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        TABLE_COLUMNS
    ))
    .bind(new.publication_recid.0)
    .bind(&new.publication_inspire_id)
    .bind(new.version.0)
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.location_in_publication)
    .bind(Json(&new.keywords))
    .bind(&new.doi)
    .bind(new.data_file)
    .bind(&new.additional_file_ids)
    .fetch_one(executor)
    .await?;
    Ok(row.into())
}

#[async_trait]
impl Store for PgStore {
    async fn publication(&self, id: PublicationId) -> Result<Option<Publication>, StoreError> {
        let row = sqlx::query_as::<_, PublicationRow>("SELECT * FROM publications WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Publication::from))
    }

    async fn upsert_publication(&self, p: &Publication) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO publications (id, title, inspire_id, authors, collaborations, year, journal_info, creation_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                inspire_id = EXCLUDED.inspire_id,
                authors = EXCLUDED.authors,
                collaborations = EXCLUDED.collaborations,
                year = EXCLUDED.year,
                journal_info = EXCLUDED.journal_info,
                creation_date = EXCLUDED.creation_date
            "#,
        )
        .bind(p.id.0)
        .bind(&p.title)
        .bind(&p.inspire_id)
        .bind(Json(&p.authors))
        .bind(&p.collaborations)
        .bind(p.year)
        .bind(&p.journal_info)
        .bind(p.creation_date)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn allocate_publication_id(&self) -> Result<PublicationId, StoreError> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('publication_recid_seq')")
            .fetch_one(self.pool())
            .await?;
        Ok(PublicationId(id))
    }

    async fn count_publications(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT publication_recid) FROM submissions")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    async fn create_submission(&self, new: &NewSubmission) -> Result<Submission, StoreError> {
        insert_submission(self.pool(), new).await
    }

    async fn submission(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Option<Submission>, StoreError> {
        sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE publication_recid = $1 AND version = $2",
            SUBMISSION_COLUMNS
        ))
        .bind(publication.0)
        .bind(version.0)
        .fetch_optional(self.pool())
        .await?
        .map(Submission::try_from)
        .transpose()
    }

    async fn latest_submission(
        &self,
        publication: PublicationId,
    ) -> Result<Option<Submission>, StoreError> {
        sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE publication_recid = $1 ORDER BY version DESC LIMIT 1",
            SUBMISSION_COLUMNS
        ))
        .bind(publication.0)
        .fetch_optional(self.pool())
        .await?
        .map(Submission::try_from)
        .transpose()
    }

    async fn latest_submission_by_inspire_id(
        &self,
        inspire_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE inspire_id = $1 ORDER BY version DESC LIMIT 1",
            SUBMISSION_COLUMNS
        ))
        .bind(inspire_id)
        .fetch_optional(self.pool())
        .await?
        .map(Submission::try_from)
        .transpose()
    }

    async fn sandbox_submissions(
        &self,
        coordinator: UserId,
    ) -> Result<Vec<Submission>, StoreError> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE coordinator = $1 AND overall_status = 'sandbox' ORDER BY created DESC",
            SUBMISSION_COLUMNS
        ))
        .bind(coordinator.0)
        .fetch_all(self.pool())
        .await?;
        collect(rows)
    }

    async fn is_coordinator(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<bool, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM submissions WHERE publication_recid = $1 AND coordinator = $2",
        )
        .bind(publication.0)
        .bind(user.0)
        .fetch_one(self.pool())
        .await?;
        Ok(n > 0)
    }

    async fn set_submission_references(
        &self,
        submission_id: i64,
        reference_ids: &[i64],
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE submissions SET reference_ids = $2, last_updated = NOW() WHERE id = $1")
            .bind(submission_id)
            .bind(reference_ids)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn latest_finished_submissions(&self, limit: i64) -> Result<Vec<Submission>, StoreError> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"
            SELECT {} FROM (
                SELECT DISTINCT ON (publication_recid) *
                FROM submissions
                WHERE overall_status = 'finished'
                ORDER BY publication_recid, version DESC
            ) newest
            ORDER BY last_updated DESC, id DESC
            LIMIT $1
            "#,
            SUBMISSION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        collect(rows)
    }

    async fn commit_upload(
        &self,
        upload: &SubmissionUpload,
    ) -> Result<(Submission, Vec<DataSubmission>), StoreError> {
        let mut tx = self.pool().begin().await?;

        let id = match &upload.slot {
            UploadSlot::Replace(current) => {
                // review messages follow through ON DELETE CASCADE
                sqlx::query(
                    "DELETE FROM data_reviews WHERE data_recid IN \
                     (SELECT id FROM data_submissions WHERE publication_recid = $1 AND version = $2)",
                )
                .bind(current.publication_recid.0)
                .bind(current.version.0)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "DELETE FROM data_submissions WHERE publication_recid = $1 AND version = $2",
                )
                .bind(current.publication_recid.0)
                .bind(current.version.0)
                .execute(&mut *tx)
                .await?;
                current.id
            }
            UploadSlot::Create(new) => insert_submission(&mut *tx, new).await?.id,
        };

        let mut tables = Vec::with_capacity(upload.tables.len());
        for new in &upload.tables {
            tables.push(insert_table(&mut *tx, new).await?);
        }

        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"
            UPDATE submissions
            SET data_abstract = COALESCE($2, data_abstract), reference_ids = $3, last_updated = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SUBMISSION_COLUMNS
        ))
        .bind(id)
        .bind(&upload.data_abstract)
        .bind(&upload.reference_ids)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::Missing {
            kind: "submission",
            id,
        })?;
        let submission = Submission::try_from(row)?;

        tx.commit().await?;
        Ok((submission, tables))
    }

    async fn data_tables(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Vec<DataSubmission>, StoreError> {
        let rows = sqlx::query_as::<_, DataSubmissionRow>(&format!(
            "SELECT {} FROM data_submissions WHERE publication_recid = $1 AND version = $2 ORDER BY id ASC",
            TABLE_COLUMNS
        ))
        .bind(publication.0)
        .bind(version.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(DataSubmission::from).collect())
    }

    async fn data_table(&self, id: TableId) -> Result<Option<DataSubmission>, StoreError> {
        let row = sqlx::query_as::<_, DataSubmissionRow>(&format!(
            "SELECT {} FROM data_submissions WHERE id = $1",
            TABLE_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(DataSubmission::from))
    }

    async fn data_table_by_name(
        &self,
        publication: PublicationId,
        version: Version,
        name: &str,
    ) -> Result<Option<DataSubmission>, StoreError> {
        let row = sqlx::query_as::<_, DataSubmissionRow>(&format!(
            "SELECT {} FROM data_submissions WHERE publication_recid = $1 AND version = $2 AND name = $3 \
             ORDER BY id ASC LIMIT 1",
            TABLE_COLUMNS
        ))
        .bind(publication.0)
        .bind(version.0)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(DataSubmission::from))
    }

    async fn insert_data_table(
        &self,
        new: &NewDataSubmission,
    ) -> Result<DataSubmission, StoreError> {
        insert_table(self.pool(), new).await
    }

    async fn count_data_tables(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_submissions")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    async fn insert_resource(&self, new: &NewDataResource) -> Result<DataResource, StoreError> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            INSERT INTO data_resources (file_type, file_description, file_location)
            VALUES ($1, $2, $3)
            RETURNING id, file_type, file_description, file_location
            "#,
        )
        .bind(&new.file_type)
        .bind(&new.file_description)
        .bind(&new.file_location)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    async fn resource(&self, id: i64) -> Result<Option<DataResource>, StoreError> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM data_resources WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(DataResource::from))
    }

    async fn resources(&self, ids: &[i64]) -> Result<Vec<DataResource>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT r.* FROM UNNEST($1::BIGINT[]) WITH ORDINALITY AS wanted(id, pos) \
             JOIN data_resources r ON r.id = wanted.id ORDER BY wanted.pos",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(DataResource::from).collect())
    }

    async fn get_or_create_review(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
    ) -> Result<DataReview, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO data_reviews (publication_recid, data_recid, version, status)
            VALUES ($1, $2, $3, 'todo')
            ON CONFLICT (data_recid, version) DO NOTHING
            "#,
        )
        .bind(publication.0)
        .bind(table.0)
        .bind(version.0)
        .execute(self.pool())
        .await?;

        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {} FROM data_reviews WHERE data_recid = $1 AND version = $2",
            REVIEW_COLUMNS
        ))
        .bind(table.0)
        .bind(version.0)
        .fetch_one(self.pool())
        .await?
        .try_into()
    }

    async fn review(
        &self,
        table: TableId,
        version: Version,
    ) -> Result<Option<DataReview>, StoreError> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {} FROM data_reviews WHERE data_recid = $1 AND version = $2",
            REVIEW_COLUMNS
        ))
        .bind(table.0)
        .bind(version.0)
        .fetch_optional(self.pool())
        .await?
        .map(DataReview::try_from)
        .transpose()
    }

    async fn set_review_status(
        &self,
        review_id: i64,
        status: ReviewStatus,
    ) -> Result<DataReview, StoreError> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "UPDATE data_reviews SET status = $2, modification_date = NOW() WHERE id = $1 RETURNING {}",
            REVIEW_COLUMNS
        ))
        .bind(review_id)
        .bind(status.as_str())
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::Missing {
            kind: "review",
            id: review_id,
        })?
        .try_into()
    }

    async fn reviews_for_publication(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<DataReview>, StoreError> {
        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {} FROM data_reviews WHERE publication_recid = $1 ORDER BY id ASC",
            REVIEW_COLUMNS
        ))
        .bind(publication.0)
        .fetch_all(self.pool())
        .await?;
        collect(rows)
    }

    async fn latest_review_for_table(
        &self,
        table: TableId,
    ) -> Result<Option<DataReview>, StoreError> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {} FROM data_reviews WHERE data_recid = $1 ORDER BY version DESC LIMIT 1",
            REVIEW_COLUMNS
        ))
        .bind(table.0)
        .fetch_optional(self.pool())
        .await?
        .map(DataReview::try_from)
        .transpose()
    }

    async fn append_review_message(
        &self,
        review_id: i64,
        user: UserId,
        message: &str,
    ) -> Result<DataReviewMessage, StoreError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO data_review_messages (review_id, user_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, review_id, user_id, message, creation_date
            "#,
        )
        .bind(review_id)
        .bind(user.0)
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE data_reviews SET modification_date = NOW() WHERE id = $1")
            .bind(review_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn review_messages(&self, review_id: i64) -> Result<Vec<DataReviewMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, review_id, user_id, message, creation_date FROM data_review_messages \
             WHERE review_id = $1 ORDER BY creation_date ASC, id ASC",
        )
        .bind(review_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(DataReviewMessage::from).collect())
    }

    async fn add_participant(
        &self,
        new: &NewParticipant,
    ) -> Result<SubmissionParticipant, StoreError> {
        sqlx::query_as::<_, ParticipantRow>(&format!(
            r#"
            INSERT INTO submission_participants (publication_recid, user_account, full_name, email, role, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PARTICIPANT_COLUMNS
        ))
        .bind(new.publication_recid.0)
        .bind(new.user_account.map(|u| u.0))
        .bind(&new.full_name)
        .bind(&new.email)
        .bind(new.role.as_str())
        .bind(new.status.as_str())
        .fetch_one(self.pool())
        .await?
        .try_into()
    }

    async fn participants(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<SubmissionParticipant>, StoreError> {
        let rows = sqlx::query_as::<_, ParticipantRow>(&format!(
            "SELECT {} FROM submission_participants WHERE publication_recid = $1 ORDER BY id ASC",
            PARTICIPANT_COLUMNS
        ))
        .bind(publication.0)
        .fetch_all(self.pool())
        .await?;
        collect(rows)
    }

    async fn record_participant_action(
        &self,
        publication: PublicationId,
        user: UserId,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE submission_participants SET action_date = $4 \
             WHERE publication_recid = $1 AND user_account = $2 AND role = $3",
        )
        .bind(publication.0)
        .bind(user.0)
        .bind(role.as_str())
        .bind(at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn earliest_participant_action(
        &self,
        publication: PublicationId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let first: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT action_date FROM submission_participants WHERE publication_recid = $1 \
             ORDER BY action_date ASC NULLS LAST LIMIT 1",
        )
        .bind(publication.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(first.flatten())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, admin) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, admin = EXCLUDED.admin",
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(user.admin)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, email, admin FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(User::from))
    }

    async fn add_subscriber(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO subscribers (publication_recid, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(publication.0)
        .bind(user.0)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn subscribers(&self, publication: PublicationId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.email, u.admin FROM subscribers s JOIN users u ON u.id = s.user_id \
             WHERE s.publication_recid = $1 ORDER BY u.id",
        )
        .bind(publication.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}
