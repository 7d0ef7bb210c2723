mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, TimeZone, Utc};

use common::*;
use tabula::db::{
    Author, NewDataResource, NewParticipant, OverallStatus, ParticipantRole, ParticipantStatus,
    Publication, Store,
};
use tabula::ids::{PublicationId, UserId};

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn seed(app: &TestApp) {
    let submission = app
        .seed_submission(600, Some("4321"), OverallStatus::Finished, &["Table 1"])
        .await;
    app.store
        .upsert_publication(&Publication {
            id: PublicationId(600),
            title: "Dijet production".into(),
            inspire_id: Some("4321".into()),
            authors: (0..12)
                .map(|i| Author {
                    full_name: format!("Physicist {}", i),
                    affiliation: Some("CERN".into()),
                })
                .collect(),
            collaborations: vec!["CMS".into()],
            year: Some(2016),
            journal_info: Some("Phys. Lett. B".into()),
            creation_date: NaiveDate::from_ymd_opt(2015, 11, 2).unwrap(),
        })
        .await
        .unwrap();

    let rivet = app
        .store
        .insert_resource(&NewDataResource {
            file_type: "rivet".into(),
            file_description: "Rivet analysis".into(),
            file_location: "https://rivet.example/CMS_2016_I4321".into(),
        })
        .await
        .unwrap();
    let code = app
        .store
        .insert_resource(&NewDataResource {
            file_type: "github".into(),
            file_description: "Analysis code".into(),
            file_location: "https://github.com/example/analysis".into(),
        })
        .await
        .unwrap();
    app.store
        .set_submission_references(submission.id, &[rivet.id, code.id])
        .await
        .unwrap();

    app.store
        .add_participant(&NewParticipant {
            publication_recid: PublicationId(600),
            user_account: Some(UserId(1)),
            full_name: "Coordinator".into(),
            email: "coord@x.org".into(),
            role: ParticipantRole::Uploader,
            status: ParticipantStatus::Primary,
        })
        .await
        .unwrap();
    app.store
        .record_participant_action(
            PublicationId(600),
            UserId(1),
            ParticipantRole::Uploader,
            Utc.with_ymd_and_hms(2016, 5, 4, 9, 30, 0).unwrap(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn publication_documents_are_enriched() {
    let app = TestApp::new();
    seed(&app).await;

    let response = app.send(get("/record/ins4321/document")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;

    assert_eq!(doc["recid"], 600);
    assert_eq!(
        doc["access_urls"]["links"]["root"],
        "http://localhost/download/submission/ins4321/1/root"
    );
    assert_eq!(doc["summary_authors"].as_array().unwrap().len(), 10);
    assert_eq!(doc["authors"].as_array().unwrap().len(), 12);
    assert_eq!(doc["publication_date"], "2016-01-01");
    assert_eq!(doc["last_updated"], "2016-05-04");
    assert_eq!(
        doc["analyses"],
        serde_json::json!([{ "type": "rivet", "analysis": "https://rivet.example/CMS_2016_I4321" }])
    );
}

#[tokio::test]
async fn documents_without_inspire_id_use_the_record_id() {
    let app = TestApp::new();
    app.seed_submission(601, None, OverallStatus::Finished, &["Table 1"]).await;

    let doc = body_json(app.send(get("/record/601/document")).await).await;
    assert!(doc.get("inspire_id").is_none());
    assert_eq!(
        doc["access_urls"]["links"]["csv"],
        "http://localhost/download/submission/601/1/csv"
    );
    assert_eq!(doc["summary_authors"], serde_json::json!([]));
    assert_eq!(doc["analyses"], serde_json::json!([]));
}

#[tokio::test]
async fn unknown_documents_are_not_found() {
    let app = TestApp::new();
    let response = app.send(get("/record/8888/document")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
