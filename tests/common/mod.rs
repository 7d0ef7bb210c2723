#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use tabula::config::Config;
use tabula::convert::{Conversion, ConversionInput, ConversionOptions, ConvertError, Converter};
use tabula::db::{
    MemoryStore, NewDataResource, NewDataSubmission, NewSubmission, OverallStatus, Store,
    Submission, User,
};
use tabula::ids::{PublicationId, UserId, Version};
use tabula::notify::{Notification, Notifier};
use tabula::state::AppState;

pub const BOUNDARY: &str = "tabula-test-boundary";

pub const MANIFEST: &str = "\
comment: Measurement of the inclusive cross section
---
name: Table 1
description: Inclusive cross section as a function of pT
location: Figure 2
keywords:
  - name: observables
    values: [SIG]
data_file: data1.yaml
";

pub const DATA_FILE: &str = "\
independent_variables:
  - header: {name: PT, units: GEV}
    values: [{value: 10}, {value: 20}]
dependent_variables:
  - header: {name: SIG, units: PB}
    values: [{value: 1.5}, {value: 0.7}]
";

#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed(Vec<u8>),
    Reject(String),
    Crash,
}

/// Converter double that answers from a script and remembers every call.
pub struct FakeConverter {
    behaviour: Mutex<Behaviour>,
    calls: Mutex<Vec<ConversionOptions>>,
}

impl FakeConverter {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn calls(&self) -> Vec<ConversionOptions> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(
        &self,
        _input: &ConversionInput,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConvertError> {
        self.calls.lock().unwrap().push(options.clone());
        match self.behaviour.lock().unwrap().clone() {
            Behaviour::Succeed(payload) => Ok(Conversion {
                success: true,
                payload,
            }),
            Behaviour::Reject(html) => Ok(Conversion {
                success: false,
                payload: html.into_bytes(),
            }),
            Behaviour::Crash => Err(ConvertError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "converter is down",
            ))),
        }
    }
}

pub fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        for (name, contents) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer
}

pub fn submission_zip() -> Vec<u8> {
    zip_of(&[
        ("submission/submission.yaml", MANIFEST),
        ("submission/data1.yaml", DATA_FILE),
    ])
}

/// A `multipart/form-data` body with one file field and optional text fields.
pub fn multipart_body(
    file_field: &str,
    filename: &str,
    payload: &[u8],
    fields: &[(&str, &str)],
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        write!(
            body,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        )
        .unwrap();
    }
    write!(
        body,
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/zip\r\n\r\n",
        BOUNDARY, file_field, filename
    )
    .unwrap();
    body.extend_from_slice(payload);
    write!(body, "\r\n--{}--\r\n", BOUNDARY).unwrap();
    body
}

pub struct TestApp {
    pub root: TempDir,
    pub config: Arc<Config>,
    pub store: Arc<MemoryStore>,
    pub converter: Arc<FakeConverter>,
    pub notifications: UnboundedReceiver<Notification>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_converter(FakeConverter::new(Behaviour::Succeed(b"converted".to_vec())))
    }

    pub fn with_converter(converter: FakeConverter) -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::for_data_dir(root.path()));
        tabula::storage::ensure_dirs(&config.data_dir, &config.tmp_dir).unwrap();

        let store = Arc::new(MemoryStore::new());
        let converter = Arc::new(converter);
        let (notifier, notifications) = Notifier::channel();
        let state = Arc::new(AppState {
            config: config.clone(),
            store: store.clone(),
            converter: converter.clone(),
            notifier,
        });

        Self {
            root,
            config,
            store,
            converter,
            notifications,
            state,
        }
    }

    pub fn router(&self) -> Router {
        tabula::build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            drained.push(n);
        }
        drained
    }

    pub async fn user(&self, id: i64, email: &str, admin: bool) -> UserId {
        self.store
            .upsert_user(&User {
                id: UserId(id),
                email: email.to_string(),
                admin,
            })
            .await
            .unwrap();
        UserId(id)
    }

    /// A submission with one table whose data file lives on disk.
    pub async fn seed_submission(
        &self,
        publication: i64,
        inspire_id: Option<&str>,
        status: OverallStatus,
        table_names: &[&str],
    ) -> Submission {
        let submission = self
            .store
            .create_submission(&NewSubmission {
                publication_recid: PublicationId(publication),
                inspire_id: inspire_id.map(str::to_string),
                version: Version(1),
                overall_status: status,
                coordinator: UserId(1),
                doi: Some("10.17182/hepdata.1".to_string()),
                data_abstract: None,
            })
            .await
            .unwrap();

        let dir = self.root.path().join(format!("seed-{}", publication));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("submission.yaml"), MANIFEST).unwrap();
        let archive = tabula::storage::submission_archive_path(
            &self.config.data_dir,
            PublicationId(publication),
            Version(1),
        );
        std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
        std::fs::write(&archive, b"packed").unwrap();

        for (i, name) in table_names.iter().enumerate() {
            let path = dir.join(format!("data{}.yaml", i + 1));
            std::fs::write(&path, DATA_FILE).unwrap();
            let resource = self
                .store
                .insert_resource(&NewDataResource {
                    file_type: "data".into(),
                    file_description: name.to_string(),
                    file_location: path.display().to_string(),
                })
                .await
                .unwrap();
            self.store
                .insert_data_table(&NewDataSubmission {
                    publication_recid: PublicationId(publication),
                    publication_inspire_id: inspire_id.map(str::to_string),
                    version: Version(1),
                    name: name.to_string(),
                    description: format!("Description of {}", name),
                    location_in_publication: None,
                    keywords: Vec::new(),
                    doi: None,
                    data_file: Some(resource.id),
                    additional_file_ids: Vec::new(),
                })
                .await
                .unwrap();
        }
        submission
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
