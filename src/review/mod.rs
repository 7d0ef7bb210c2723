//! Per-table, per-version review state: a status flag plus a message thread.
//!
//! Review rows are created lazily through an atomic upsert. Status changes
//! are unrestricted: any status may follow any other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::{DataReview, DataReviewMessage, ParticipantRole, ReviewStatus, Store, StoreError};
use crate::ids::{PublicationId, TableId, UserId, Version};
use crate::notify::{Notification, Notifier};

/// A message as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub user: UserId,
    pub user_email: String,
    pub message: String,
    pub post_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub table: TableId,
    pub version: Version,
    pub status: ReviewStatus,
    pub last_updated: DateTime<Utc>,
}

impl From<&DataReview> for ReviewSummary {
    fn from(review: &DataReview) -> Self {
        Self {
            table: review.data_recid,
            version: review.version,
            status: review.status,
            last_updated: review.modification_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMessages {
    pub table_name: String,
    pub messages: Vec<MessageView>,
}

pub struct Reviews<'a> {
    store: &'a dyn Store,
    notifier: &'a Notifier,
}

impl<'a> Reviews<'a> {
    pub fn new(store: &'a dyn Store, notifier: &'a Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn get_or_create(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
    ) -> Result<DataReview, StoreError> {
        self.store.get_or_create_review(table, publication, version).await
    }

    pub async fn set_status(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
        status: ReviewStatus,
    ) -> Result<DataReview, StoreError> {
        let review = self.get_or_create(table, publication, version).await?;
        let updated = self.store.set_review_status(review.id, status).await?;
        info!(
            "Review of table {} v{} changed from {} to {}",
            table, version, review.status, updated.status
        );
        Ok(updated)
    }

    /// Appends a message, stamps the author's reviewer action and queues a
    /// notification for the other participants.
    pub async fn append_message(
        &self,
        table: TableId,
        publication: PublicationId,
        version: Version,
        author: UserId,
        text: &str,
    ) -> Result<(DataReview, DataReviewMessage), StoreError> {
        let review = self.get_or_create(table, publication, version).await?;
        let message = self.store.append_review_message(review.id, author, text).await?;

        self.store
            .record_participant_action(
                publication,
                author,
                ParticipantRole::Reviewer,
                message.creation_date,
            )
            .await?;

        let table_name = self
            .store
            .data_table(table)
            .await?
            .map(|t| t.name)
            .unwrap_or_else(|| table.to_string());

        self.notifier.send(Notification::ReviewMessage {
            publication,
            table,
            table_name,
            version,
            author,
            message: text.to_string(),
            status: review.status,
        });

        Ok((review, message))
    }

    async fn views(
        &self,
        messages: Vec<DataReviewMessage>,
    ) -> Result<Vec<MessageView>, StoreError> {
        let mut views = Vec::with_capacity(messages.len());
        for m in messages {
            let user_email = self
                .store
                .user(m.user)
                .await?
                .map(|u| u.email)
                .unwrap_or_default();
            views.push(MessageView {
                user: m.user,
                user_email,
                message: m.message,
                post_time: m.creation_date,
            });
        }
        Ok(views)
    }

    /// Chronological thread of a review, `None` when no review exists yet.
    pub async fn messages(
        &self,
        table: TableId,
        version: Version,
    ) -> Result<Option<Vec<MessageView>>, StoreError> {
        let Some(review) = self.store.review(table, version).await? else {
            return Ok(None);
        };
        let messages = self.store.review_messages(review.id).await?;
        Ok(Some(self.views(messages).await?))
    }

    pub async fn reviews_for_publication(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<ReviewSummary>, StoreError> {
        Ok(self
            .store
            .reviews_for_publication(publication)
            .await?
            .iter()
            .map(ReviewSummary::from)
            .collect())
    }

    pub async fn status_for_table(&self, table: TableId) -> Result<Option<DataReview>, StoreError> {
        self.store.latest_review_for_table(table).await
    }

    /// Every thread of a publication, grouped by table name in review order.
    /// Reviews without messages are left out.
    pub async fn all_messages(
        &self,
        publication: PublicationId,
    ) -> Result<Vec<TableMessages>, StoreError> {
        let mut reviews = self.store.reviews_for_publication(publication).await?;
        reviews.sort_by_key(|r| r.id);

        let mut grouped: Vec<TableMessages> = Vec::new();
        for review in reviews {
            let messages = self.store.review_messages(review.id).await?;
            if messages.is_empty() {
                continue;
            }
            let table_name = self
                .store
                .data_table(review.data_recid)
                .await?
                .map(|t| t.name)
                .unwrap_or_else(|| review.data_recid.to_string());
            let views = self.views(messages).await?;

            match grouped.iter_mut().find(|g| g.table_name == table_name) {
                Some(group) => group.messages.extend(views),
                None => grouped.push(TableMessages {
                    table_name,
                    messages: views,
                }),
            }
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, User};

    fn setup() -> (MemoryStore, Notifier, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        (MemoryStore::new(), notifier, rx)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (store, notifier, _rx) = setup();
        let reviews = Reviews::new(&store, &notifier);

        let a = reviews.get_or_create(TableId(10), PublicationId(1), Version(1)).await.unwrap();
        let b = reviews.get_or_create(TableId(10), PublicationId(1), Version(1)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.status, ReviewStatus::Todo);
        assert_eq!(store.review_count(), 1);
    }

    #[tokio::test]
    async fn status_overwrites_in_any_direction() {
        let (store, notifier, _rx) = setup();
        let reviews = Reviews::new(&store, &notifier);
        let (table, publication, version) = (TableId(10), PublicationId(1), Version(1));

        for status in [ReviewStatus::Passed, ReviewStatus::Todo, ReviewStatus::Attention] {
            let stored = reviews.set_status(table, publication, version, status).await.unwrap();
            assert_eq!(stored.status, status);
            let read = store.review(table, version).await.unwrap().unwrap();
            assert_eq!(read.status, status);
        }
        assert_eq!(store.review_count(), 1);
    }

    #[tokio::test]
    async fn messages_are_ordered_and_notified() {
        let (store, notifier, mut rx) = setup();
        store
            .upsert_user(&User {
                id: UserId(4),
                email: "reviewer@x.org".into(),
                admin: false,
            })
            .await
            .unwrap();
        let reviews = Reviews::new(&store, &notifier);

        assert_eq!(reviews.messages(TableId(10), Version(1)).await.unwrap(), None);

        for text in ["first", "second", "third"] {
            reviews
                .append_message(TableId(10), PublicationId(1), Version(1), UserId(4), text)
                .await
                .unwrap();
        }

        let thread = reviews.messages(TableId(10), Version(1)).await.unwrap().unwrap();
        let texts: Vec<_> = thread.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(thread[0].user_email, "reviewer@x.org");
        assert!(thread.windows(2).all(|w| w[0].post_time <= w[1].post_time));

        let mut queued = 0;
        while let Ok(n) = rx.try_recv() {
            assert!(matches!(n, Notification::ReviewMessage { .. }));
            queued += 1;
        }
        assert_eq!(queued, 3);
    }

    #[tokio::test]
    async fn all_messages_groups_by_table() {
        let (store, notifier, _rx) = setup();
        let reviews = Reviews::new(&store, &notifier);

        for (table, text) in [(10, "a"), (11, "b"), (10, "c")] {
            reviews
                .append_message(TableId(table), PublicationId(1), Version(1), UserId(4), text)
                .await
                .unwrap();
        }
        reviews.get_or_create(TableId(12), PublicationId(1), Version(1)).await.unwrap();

        let grouped = reviews.all_messages(PublicationId(1)).await.unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].table_name, "10");
        assert_eq!(grouped[0].messages.len(), 2);
        assert_eq!(grouped[1].messages[0].message, "b");
    }
}
