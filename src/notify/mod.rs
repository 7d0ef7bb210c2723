//! Mail notifications, decoupled from the operations that trigger them.
//!
//! Producers push [`Notification`]s through a [`Notifier`]; a single worker
//! task resolves recipients, renders the mail and hands it to a [`Mailer`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tera::Context;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{ParticipantStatus, ReviewStatus, Store, StoreError};
use crate::ids::{PublicationId, TableId, UserId, Version};
use crate::templates;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ReviewMessage {
        publication: PublicationId,
        table: TableId,
        table_name: String,
        version: Version,
        author: UserId,
        message: String,
        status: ReviewStatus,
    },
    NewUpload {
        publication: PublicationId,
        version: Version,
        uploader: UserId,
    },
}

impl Notification {
    fn publication(&self) -> PublicationId {
        match self {
            Notification::ReviewMessage { publication, .. } => *publication,
            Notification::NewUpload { publication, .. } => *publication,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            Notification::ReviewMessage { author, .. } => *author,
            Notification::NewUpload { uploader, .. } => *uploader,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a notification. A closed queue is logged, never reported to
    /// the caller.
    pub fn send(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            warn!("Notification dropped, worker is gone: {:?}", e.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError>;
}

/// Writes outgoing mail to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError> {
        info!("Mail from {} to {:?}: {}", mail.from, mail.to, mail.subject);
        debug!("{}", mail.html);
        Ok(())
    }
}

/// Keeps every mail it is handed.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(mail);
        Ok(())
    }
}

/// Subscribers plus primary participants, first occurrence wins, without
/// the user who triggered the notification.
pub async fn recipients(
    store: &dyn Store,
    publication: PublicationId,
    actor: UserId,
) -> Result<Vec<String>, StoreError> {
    let actor_email = store.user(actor).await?.map(|u| u.email);

    let subscribers = store
        .subscribers(publication)
        .await?
        .into_iter()
        .map(|u| (Some(u.id), u.email));
    let participants = store
        .participants(publication)
        .await?
        .into_iter()
        .filter(|p| p.status == ParticipantStatus::Primary)
        .map(|p| (p.user_account, p.email));

    let mut emails: Vec<String> = Vec::new();
    for (user, email) in subscribers.chain(participants) {
        if user == Some(actor) || actor_email.as_deref() == Some(email.as_str()) {
            continue;
        }
        if !email.is_empty() && !emails.contains(&email) {
            emails.push(email);
        }
    }
    Ok(emails)
}

/// Renders and sends the mail for one notification. Returns `None` when
/// nobody is left to notify.
pub async fn deliver(
    store: &dyn Store,
    mailer: &dyn Mailer,
    config: &Config,
    notification: &Notification,
) -> Result<Option<Mail>, NotifyError> {
    let to = recipients(store, notification.publication(), notification.actor()).await?;
    if to.is_empty() {
        debug!("No recipients for {:?}", notification);
        return Ok(None);
    }

    let actor = store
        .user(notification.actor())
        .await?
        .map(|u| u.email)
        .unwrap_or_else(|| notification.actor().to_string());

    let mut ctx = Context::new();
    ctx.insert("site_url", &config.site_url);
    ctx.insert("publication", &notification.publication());

    let (subject, template) = match notification {
        Notification::ReviewMessage {
            table_name,
            version,
            message,
            status,
            ..
        } => {
            ctx.insert("table_name", table_name);
            ctx.insert("version", version);
            ctx.insert("message", message);
            ctx.insert("status", status.plain_text());
            ctx.insert("author", &actor);
            (
                format!(
                    "[Record {}] New review message on {}",
                    notification.publication(),
                    table_name
                ),
                "email/review_message.html",
            )
        }
        Notification::NewUpload { version, .. } => {
            ctx.insert("version", version);
            ctx.insert("uploader", &actor);
            (
                format!(
                    "[Record {}] Version {} uploaded",
                    notification.publication(),
                    version
                ),
                "email/new_upload.html",
            )
        }
    };

    let mail = Mail {
        from: config.mail_from.clone(),
        to,
        subject,
        html: templates::render(template, &ctx)?.0,
    };
    mailer.send(mail.clone()).await?;
    Ok(Some(mail))
}

/// Drains the queue until every [`Notifier`] is dropped.
pub async fn run_worker(
    mut rx: UnboundedReceiver<Notification>,
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    config: Arc<Config>,
) {
    info!("Notification worker started");
    while let Some(notification) = rx.recv().await {
        match deliver(store.as_ref(), mailer.as_ref(), &config, &notification).await {
            Ok(Some(mail)) => info!("Sent \"{}\" to {} recipients", mail.subject, mail.to.len()),
            Ok(None) => {}
            Err(e) => error!("Failed to deliver {:?}: {}", notification, e),
        }
    }
    info!("Notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, NewParticipant, ParticipantRole, User};

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (id, email) in [(1, "author@x.org"), (2, "sub@x.org"), (3, "prim@x.org")] {
            store
                .upsert_user(&User {
                    id: UserId(id),
                    email: email.into(),
                    admin: false,
                })
                .await
                .unwrap();
        }
        let publication = PublicationId(50);
        store.add_subscriber(publication, UserId(1)).await.unwrap();
        store.add_subscriber(publication, UserId(2)).await.unwrap();
        for (user, email, status) in [
            (Some(UserId(3)), "prim@x.org", ParticipantStatus::Primary),
            (None, "sub@x.org", ParticipantStatus::Primary),
            (None, "reserve@x.org", ParticipantStatus::Reserve),
        ] {
            store
                .add_participant(&NewParticipant {
                    publication_recid: publication,
                    user_account: user,
                    full_name: email.into(),
                    email: email.into(),
                    role: ParticipantRole::Reviewer,
                    status,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn recipients_are_deduplicated_without_the_author() {
        let store = seeded().await;
        let to = recipients(&store, PublicationId(50), UserId(1)).await.unwrap();
        assert_eq!(to, vec!["sub@x.org".to_string(), "prim@x.org".to_string()]);
    }

    #[tokio::test]
    async fn worker_delivers_queued_notifications() {
        let store: Arc<dyn Store> = Arc::new(seeded().await);
        let mailer = Arc::new(RecordingMailer::default());
        let root = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::for_data_dir(root.path()));

        let (notifier, rx) = Notifier::channel();
        notifier.send(Notification::ReviewMessage {
            publication: PublicationId(50),
            table: TableId(7),
            table_name: "Table 1".into(),
            version: Version(1),
            author: UserId(1),
            message: "Check the errors".into(),
            status: ReviewStatus::Attention,
        });
        drop(notifier);

        run_worker(rx, store, mailer.clone(), config).await;

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Table 1"));
        assert!(sent[0].html.contains("Check the errors"));
        assert!(sent[0].html.contains("attention required"));
        assert!(!sent[0].to.contains(&"author@x.org".to_string()));
    }
}
