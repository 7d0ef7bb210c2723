mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;

use common::*;
use tabula::db::{Author, OverallStatus, Publication, Store};
use tabula::ids::{PublicationId, Version};
use tabula::records::{assemble_by_id, RecordRequest};

fn get(uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn seed_publication(app: &TestApp, id: i64, authors: usize) {
    app.store
        .upsert_publication(&Publication {
            id: PublicationId(id),
            title: "Measurement of things".into(),
            inspire_id: None,
            authors: (0..authors)
                .map(|i| Author {
                    full_name: format!("Author {}", i),
                    affiliation: None,
                })
                .collect(),
            collaborations: vec!["ATLAS, CMS".into()],
            year: Some(2016),
            journal_info: None,
            creation_date: NaiveDate::from_ymd_opt(2016, 3, 1).unwrap(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn table_ids_fall_back_to_the_data_record_view() {
    let app = TestApp::new();
    app.seed_submission(300, None, OverallStatus::Finished, &["Table 1", "Table 2"]).await;
    let tables = app.store.data_tables(PublicationId(300), Version(1)).await.unwrap();
    let second = tables[1].id;

    let response = app.send(get(&format!("/record/{}?format=json", second), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;

    assert_eq!(page["mode"], "data_record");
    assert_eq!(page["recid"], 300);
    assert_eq!(page["table_name"], "Table 2");
    assert_eq!(page["table_to_show"], second.0);
    assert_eq!(page["related_publication_id"], 300);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = TestApp::new();
    let response = app.send(get("/record/999999", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send(get("/record/ins42", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn in_progress_versions_are_hidden_from_the_public() {
    let app = TestApp::new();
    app.seed_submission(301, None, OverallStatus::Todo, &["Table 1"]).await;

    let public = assemble_by_id(app.store.as_ref(), "301", &RecordRequest::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(public.version, 0);
    assert_eq!(public.version_count, 0);
    assert!(public.data_tables.is_empty());

    // user 1 coordinates every seeded submission
    let coordinator = RecordRequest {
        viewer: Some(app.user(1, "coord@x.org", false).await),
        ..RecordRequest::default()
    };
    let page = assemble_by_id(app.store.as_ref(), "301", &coordinator).await.unwrap().unwrap();
    assert_eq!(page.version, 1);
    assert!(page.privileges.is_submission_coordinator_or_admin);
    assert!(page.privileges.show_upload_widget);
    assert!(!page.show_upload_area);
    assert_eq!(page.data_tables.len(), 1);
    assert_eq!(page.data_tables[0].review_status, "to be reviewed");
    assert!(!page.data_tables[0].messages);
    assert_eq!(app.store.review_count(), 1);
}

#[tokio::test]
async fn finished_versions_are_public() {
    let app = TestApp::new();
    app.seed_submission(302, None, OverallStatus::Finished, &["Table 1"]).await;
    seed_publication(&app, 302, 12).await;

    let page = assemble_by_id(app.store.as_ref(), "302", &RecordRequest::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.version, 1);
    assert_eq!(page.data_tables[0].processed_name, "Table1");
    assert_eq!(page.data_tables[0].description, "Description of Table...");
    let record = page.record.unwrap();
    assert_eq!(record.authors.len(), 10);
    assert_eq!(record.collaborations, vec!["ATLAS", "CMS"]);
    assert_eq!(page.breadcrumb_text.as_deref(), Some("Author 0 et al."));
}

#[tokio::test]
async fn explicit_table_parameter_wins() {
    let app = TestApp::new();
    app.seed_submission(303, None, OverallStatus::Finished, &["Table 1", "Table 2"]).await;
    let tables = app.store.data_tables(PublicationId(303), Version(1)).await.unwrap();

    let request = RecordRequest {
        table: Some("Table 2".into()),
        ..RecordRequest::default()
    };
    let page = assemble_by_id(app.store.as_ref(), "303", &request).await.unwrap().unwrap();
    assert_eq!(page.table_to_show, Some(tables[1].id));

    let page = assemble_by_id(app.store.as_ref(), "303", &RecordRequest::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.table_to_show, Some(tables[0].id));
}

#[tokio::test]
async fn record_page_renders_html() {
    let app = TestApp::new();
    app.seed_submission(304, None, OverallStatus::Finished, &["Table 1"]).await;
    seed_publication(&app, 304, 2).await;

    let response = app.send(get("/record/304", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Measurement of things"));
    assert!(html.contains("Table 1"));
    assert!(html.contains("Author 0 et al."));
}

#[tokio::test]
async fn table_details_include_review_flag() {
    let app = TestApp::new();
    app.seed_submission(305, None, OverallStatus::Finished, &["Table 1"]).await;
    let table = app.store.data_tables(PublicationId(305), Version(1)).await.unwrap()[0].id;

    let response = app.send(get(&format!("/record/data/305/{}/1", table), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let details = body_json(response).await;
    assert_eq!(details["name"], "Table 1");
    assert_eq!(details["title"], "Description of Table 1");
    assert_eq!(details["review"]["review_flag"], "todo");
    assert_eq!(details["review"]["messages"], false);
    assert_eq!(details["dependent_variables"][0]["header"]["name"], "SIG");

    let response = app.send(get(&format!("/record/data/305/{}/2", table), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn counts_and_protected_views() {
    let app = TestApp::new();
    app.seed_submission(306, None, OverallStatus::Finished, &["Table 1", "Table 2"]).await;
    seed_publication(&app, 306, 1).await;

    let counts = body_json(app.send(get("/record/count", None)).await).await;
    assert_eq!(counts["data"], 2);
    assert_eq!(counts["publications"], 1);

    let response = app.send(get("/record/coordinator/view/306", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send(get("/record/coordinator/view/306", Some(1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["recid"], 306);
}

#[tokio::test]
async fn missing_sandbox_renders_an_error_page() {
    let app = TestApp::new();
    let response = app.send(get("/record/sandbox/4242", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("No submission exists with that ID."));
}

#[tokio::test]
async fn sandbox_list_shows_own_sandboxes() {
    let app = TestApp::new();
    app.seed_submission(1_000_123, None, OverallStatus::Sandbox, &[]).await;

    let response = app.send(get("/record/sandbox", Some(1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("1000123"));

    let response = app.send(get("/record/sandbox", Some(2))).await;
    assert!(!body_text(response).await.contains("1000123"));
}

#[tokio::test]
async fn latest_lists_recently_finished_records() {
    let app = TestApp::new();
    for id in [310, 311, 312] {
        app.seed_submission(id, None, OverallStatus::Finished, &["Table 1"]).await;
        seed_publication(&app, id, 2).await;
    }
    app.seed_submission(313, None, OverallStatus::Todo, &["Table 1"]).await;
    seed_publication(&app, 313, 2).await;

    let response = app.send(get("/record/latest", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let latest = body["latest"].as_array().unwrap();
    assert_eq!(latest.len(), 3);
    let ids: Vec<_> = latest.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![312, 311, 310]);
    assert_eq!(latest[0]["title"], "Measurement of things");
    assert_eq!(latest[0]["first_author"]["full_name"], "Author 0");
    assert_eq!(latest[0]["creation_date"], "2016-03-01");
    assert!(latest[0]["journal"].is_null());

    let body = body_json(app.send(get("/record/latest?n=1", None)).await).await;
    assert_eq!(body["latest"].as_array().unwrap().len(), 1);
    assert_eq!(body["latest"][0]["id"], 312);
}

#[tokio::test]
async fn unknown_versions_are_not_found() {
    let app = TestApp::new();
    app.seed_submission(314, None, OverallStatus::Finished, &["Table 1"]).await;
    seed_publication(&app, 314, 1).await;

    let request = RecordRequest {
        version: Some(Version(7)),
        ..RecordRequest::default()
    };
    assert!(assemble_by_id(app.store.as_ref(), "314", &request).await.unwrap().is_none());

    let response = app.send(get("/record/314?version=7&format=json", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.send(get("/record/314?version=1&format=json", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
