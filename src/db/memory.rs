use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::*;
use super::{Store, StoreError};
use crate::ids::{PublicationId, TableId, UserId, Version};

const FIRST_SANDBOX_ID: i64 = 1_000_000;

/// In-memory [`Store`] for tests and local runs without Postgres.
///
/// Everything sits behind one mutex so that check-then-insert paths such as
/// [`Store::get_or_create_review`] are atomic, matching the unique
/// constraints of the SQL schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    next_sandbox_id: i64,
    publications: BTreeMap<PublicationId, Publication>,
    submissions: Vec<Submission>,
    tables: Vec<DataSubmission>,
    resources: BTreeMap<i64, DataResource>,
    reviews: Vec<DataReview>,
    messages: Vec<DataReviewMessage>,
    participants: Vec<SubmissionParticipant>,
    users: HashMap<UserId, User>,
    subscribers: BTreeMap<PublicationId, HashSet<UserId>>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_submission(&mut self, new: &NewSubmission) -> Submission {
        let now = Utc::now();
        let submission = Submission {
            id: self.id(),
            publication_recid: new.publication_recid,
            inspire_id: new.inspire_id.clone(),
            version: new.version,
            overall_status: new.overall_status,
            coordinator: new.coordinator,
            doi: new.doi.clone(),
            data_abstract: new.data_abstract.clone(),
            reference_ids: Vec::new(),
            created: now,
            last_updated: now,
        };
        self.submissions.push(submission.clone());
        submission
    }

    fn insert_table(&mut self, new: &NewDataSubmission) -> DataSubmission {
        let table = DataSubmission {
            id: TableId(self.id()),
            publication_recid: new.publication_recid,
            publication_inspire_id: new.publication_inspire_id.clone(),
            version: new.version,
            name: new.name.clone(),
            description: new.description.clone(),
            location_in_publication: new.location_in_publication.clone(),
            keywords: new.keywords.clone(),
            doi: new.doi.clone(),
            data_file: new.data_file,
            additional_file_ids: new.additional_file_ids.clone(),
        };
        self.tables.push(table.clone());
        table
    }

    /// Removes the tables of one version along with their reviews and
    /// review messages.
    fn clear_version(&mut self, publication: PublicationId, version: Version) {
        let dropped: HashSet<TableId> = self
            .tables
            .iter()
            .filter(|d| d.publication_recid == publication && d.version == version)
            .map(|d| d.id)
            .collect();
        let reviews: HashSet<i64> = self
            .reviews
            .iter()
            .filter(|r| dropped.contains(&r.data_recid))
            .map(|r| r.id)
            .collect();
        self.messages.retain(|m| !reviews.contains(&m.review_id));
        self.reviews.retain(|r| !reviews.contains(&r.id));
        self.tables.retain(|d| !dropped.contains(&d.id));
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn review_count(&self) -> usize {
        self.lock().reviews.len()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn publication(&self, id: PublicationId) -> Result<Option<Publication>, StoreError> {
        Ok(self.lock().publications.get(&id).cloned())
    }

    async fn upsert_publication(&self, publication: &Publication) -> Result<(), StoreError> {
        self.lock()
            .publications
            .insert(publication.id, publication.clone());
        Ok(())
    }

    async fn allocate_publication_id(&self) -> Result<PublicationId, StoreError> {
        let mut t = self.lock();
        if t.next_sandbox_id == 0 {
            t.next_sandbox_id = FIRST_SANDBOX_ID;
        }
        let id = t.next_sandbox_id;
        t.next_sandbox_id += 1;
        Ok(PublicationId(id))
    }

    async fn count_publications(&self) -> Result<i64, StoreError> {
        let t = self.lock();
        let distinct: HashSet<_> = t.submissions.iter().map(|s| s.publication_recid).collect();
        Ok(distinct.len() as i64)
    }

    async fn create_submission(&self, new: &NewSubmission) -> Result<Submission, StoreError> {
        Ok(self.lock().insert_submission(new))
    }

    async fn submission(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Option<Submission>, StoreError> {
        Ok(self
            .lock()
            .submissions
            .iter()
            .find(|s| s.publication_recid == publication && s.version == version)
            .cloned())
    }

    async fn latest_submission(
        &self,
        publication: PublicationId,
    ) -> Result<Option<Submission>, StoreError> {
        Ok(self
            .lock()
            .submissions
            .iter()
            .filter(|s| s.publication_recid == publication)
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn latest_submission_by_inspire_id(
        &self,
        inspire_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        Ok(self
            .lock()
            .submissions
            .iter()
            .filter(|s| s.inspire_id.as_deref() == Some(inspire_id))
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn sandbox_submissions(
        &self,
        coordinator: UserId,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut found: Vec<Submission> = self
            .lock()
            .submissions
            .iter()
            .filter(|s| s.coordinator == coordinator && s.overall_status == OverallStatus::Sandbox)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(found)
    }

    async fn is_coordinator(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .submissions
            .iter()
            .any(|s| s.publication_recid == publication && s.coordinator == user))
    }

    async fn set_submission_references(
        &self,
        submission_id: i64,
        reference_ids: &[i64],
    ) -> Result<(), StoreError> {
        let mut t = self.lock();
        let submission = t
            .submissions
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or(StoreError::Missing {
                kind: "submission",
                id: submission_id,
            })?;
        submission.reference_ids = reference_ids.to_vec();
        submission.last_updated = Utc::now();
        Ok(())
    }

    async fn latest_finished_submissions(&self, limit: i64) -> Result<Vec<Submission>, StoreError> {
        let t = self.lock();
        let mut newest: BTreeMap<PublicationId, &Submission> = BTreeMap::new();
        for s in t
            .submissions
            .iter()
            .filter(|s| s.overall_status == OverallStatus::Finished)
        {
            let slot = newest.entry(s.publication_recid).or_insert(s);
            if s.version > slot.version {
                *slot = s;
            }
        }
        let mut latest: Vec<Submission> = newest.into_values().cloned().collect();
        latest.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then(b.id.cmp(&a.id)));
        latest.truncate(limit.max(0) as usize);
        Ok(latest)
    }

    async fn commit_upload(
        &self,
        upload: &SubmissionUpload,
    ) -> Result<(Submission, Vec<DataSubmission>), StoreError> {
        let mut t = self.lock();
        let id = match &upload.slot {
            UploadSlot::Replace(current) => {
                if !t.submissions.iter().any(|s| s.id == current.id) {
                    return Err(StoreError::Missing {
                        kind: "submission",
                        id: current.id,
                    });
                }
                t.clear_version(current.publication_recid, current.version);
                current.id
            }
            UploadSlot::Create(new) => t.insert_submission(new).id,
        };

        let tables: Vec<DataSubmission> =
            upload.tables.iter().map(|new| t.insert_table(new)).collect();

        let submission = t
            .submissions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::Missing {
                kind: "submission",
                id,
            })?;
        if let Some(data_abstract) = &upload.data_abstract {
            submission.data_abstract = Some(data_abstract.clone());
        }
        submission.reference_ids = upload.reference_ids.clone();
        submission.last_updated = Utc::now();
        Ok((submission.clone(), tables))
    }

    async fn data_tables(
        &self,
        publication: PublicationId,
        version: Version,
    ) -> Result<Vec<DataSubmission>, StoreError> {
        let mut tables: Vec<DataSubmission> = self
            .lock()
            .tables
            .iter()
            .filter(|d| d.publication_recid == publication && d.version == version)
            .cloned()
            .collect();
        tables.sort_by_key(|d| d.id);
        Ok(tables)
    }

    async fn data_table(&self, id: TableId) -> Result<Option<DataSubmission>, StoreError> {
        Ok(self.lock().tables.iter().find(|d| d.id == id).cloned())
    }

    async fn data_table_by_name(
        &self,
        publication: PublicationId,
        version: Version,
        name: &str,
    ) -> Result<Option<DataSubmission>, StoreError> {
        Ok(self
            .lock()
            .tables
            .iter()
            .find(|d| d.publication_recid == publication && d.version == version && d.name == name)
            .cloned())
    }

    async fn insert_data_table(
        &self,
        new: &NewDataSubmission,
    ) -> Result<DataSubmission, StoreError> {
        Ok(self.lock().insert_table(new))
    }

    async fn count_data_tables(&self) -> Result<i64, StoreError> {
        Ok(self.lock().tables.len() as i64)
    }

    async fn insert_resource(&self, new: &NewDataResource) -> Result<DataResource, StoreError> {
        let mut t = self.lock();
        let resource = DataResource {
            id: t.id(),
            file_type: new.file_type.clone(),
            file_description: new.file_description.clone(),
            file_location: new.file_location.clone(),
        };
        t.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn resource(&self, id: i64) -> Result<Option<DataResource>, StoreError> {
        Ok(self.lock().resources.get(&id).cloned())
    }

    async fn resources(&self, ids: &[i64]) -> Result<Vec<DataResource>, StoreError> {
        let t = self.lock();
        Ok(ids.iter().filter_map(|id| t.resources.get(id).cloned()).collect())
    }

    async fn get_or_create_review(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
    ) -> Result<DataReview, StoreError> {
        let mut t = self.lock();
        if let Some(existing) = t
            .reviews
            .iter()
            .find(|r| r.data_recid == table && r.version == version)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let review = DataReview {
            id: t.id(),
            publication_recid: publication,
            data_recid: table,
            version,
            status: ReviewStatus::Todo,
            creation_date: now,
            modification_date: now,
        };
        t.reviews.push(review.clone());
        Ok(review)
    }

    async fn review(
        &self,
        table: TableId,
        version: Version,
    ) -> Result<Option<DataReview>, StoreError> {
        Ok(self
            .lock()
            .reviews
            .iter()
            .find(|r| r.data_recid == table && r.version == version)
            .cloned())
    }

    async fn set_review_status(
        &self,
        review_id: i64,
        status: ReviewStatus,
    ) -> Result<DataReview, StoreError> {
        let mut t = self.lock();
        let review = t
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or(StoreError::Missing {
                kind: "review",
                id: review_id,
            })?;
        review.status = status;
        review.modification_date = Utc::now();
        Ok(review.clone())
    }

    async fn reviews_for_publication(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<DataReview>, StoreError> {
        Ok(self
            .lock()
            .reviews
            .iter()
            .filter(|r| r.publication_recid == publication)
            .cloned()
            .collect())
    }

    async fn latest_review_for_table(
        &self,
        table: TableId,
    ) -> Result<Option<DataReview>, StoreError> {
        Ok(self
            .lock()
            .reviews
            .iter()
            .filter(|r| r.data_recid == table)
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn append_review_message(
        &self,
        review_id: i64,
        user: UserId,
        message: &str,
    ) -> Result<DataReviewMessage, StoreError> {
        let mut t = self.lock();
        let now = Utc::now();
        let review = t
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or(StoreError::Missing {
                kind: "review",
                id: review_id,
            })?;
        review.modification_date = now;

        let entry = DataReviewMessage {
            id: t.id(),
            review_id,
            user,
            message: message.to_string(),
            creation_date: now,
        };
        t.messages.push(entry.clone());
        Ok(entry)
    }

    async fn review_messages(&self, review_id: i64) -> Result<Vec<DataReviewMessage>, StoreError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.review_id == review_id)
            .cloned()
            .collect())
    }

    async fn add_participant(
        &self,
        new: &NewParticipant,
    ) -> Result<SubmissionParticipant, StoreError> {
        let mut t = self.lock();
        let participant = SubmissionParticipant {
            id: t.id(),
            publication_recid: new.publication_recid,
            user_account: new.user_account,
            full_name: new.full_name.clone(),
            email: new.email.clone(),
            role: new.role,
            status: new.status,
            action_date: None,
        };
        t.participants.push(participant.clone());
        Ok(participant)
    }

    async fn participants(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<SubmissionParticipant>, StoreError> {
        Ok(self
            .lock()
            .participants
            .iter()
            .filter(|p| p.publication_recid == publication)
            .cloned()
            .collect())
    }

    async fn record_participant_action(
        &self,
        publication: PublicationId,
        user: UserId,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut t = self.lock();
        let mut updated = 0;
        for p in t.participants.iter_mut().filter(|p| {
            p.publication_recid == publication && p.user_account == Some(user) && p.role == role
        }) {
            p.action_date = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn earliest_participant_action(
        &self,
        publication: PublicationId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .lock()
            .participants
            .iter()
            .filter(|p| p.publication_recid == publication)
            .filter_map(|p| p.action_date)
            .min())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn add_subscriber(
        &self,
        publication: PublicationId,
        user: UserId,
    ) -> Result<(), StoreError> {
        self.lock()
            .subscribers
            .entry(publication)
            .or_default()
            .insert(user);
        Ok(())
    }

    async fn subscribers(&self, publication: PublicationId) -> Result<Vec<User>, StoreError> {
        let t = self.lock();
        let mut users: Vec<User> = t
            .subscribers
            .get(&publication)
            .into_iter()
            .flatten()
            .filter_map(|id| t.users.get(id).cloned())
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}
