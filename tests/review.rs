mod common;

use assert_matches::assert_matches;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use common::*;
use tabula::db::{OverallStatus, ReviewStatus, Store};
use tabula::ids::{PublicationId, TableId, UserId, Version};
use tabula::notify::Notification;

fn form(uri: &str, user: Option<i64>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn first_table(app: &TestApp, publication: i64) -> TableId {
    app.store
        .data_tables(PublicationId(publication), Version(1))
        .await
        .unwrap()[0]
        .id
}

#[tokio::test]
async fn status_changes_are_unrestricted() {
    let app = TestApp::new();
    app.seed_submission(400, None, OverallStatus::Todo, &["Table 1"]).await;
    let table = first_table(&app, 400).await;

    for status in ["passed", "todo", "attention", "passed"] {
        let body = format!(
            "publication_recid=400&data_recid={}&status={}&version=1",
            table, status
        );
        let response = app.send(form("/record/data/review/status/", Some(1), &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], status);
    }

    let stored = app.store.review(table, Version(1)).await.unwrap().unwrap();
    assert_eq!(stored.status, ReviewStatus::Passed);
    assert_eq!(app.store.review_count(), 1);

    let response = app
        .send(get(&format!("/record/data/review/status/?data_recid={}", table), None))
        .await;
    assert_eq!(body_json(response).await["status"], "passed");
}

#[tokio::test]
async fn unknown_status_and_anonymous_writes_are_refused() {
    let app = TestApp::new();
    app.seed_submission(401, None, OverallStatus::Todo, &["Table 1"]).await;
    let table = first_table(&app, 401).await;

    let body = format!("publication_recid=401&data_recid={}&status=approved&version=1", table);
    let response = app.send(form("/record/data/review/status/", Some(1), &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = format!("publication_recid=401&data_recid={}&status=passed&version=1", table);
    let response = app.send(form("/record/data/review/status/", None, &body)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.review_count(), 0);
}

#[tokio::test]
async fn missing_review_status_is_not_found() {
    let app = TestApp::new();
    let response = app.send(get("/record/data/review/status/?data_recid=77", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "no review found.");
}

#[tokio::test]
async fn messages_are_kept_in_order() {
    let mut app = TestApp::new();
    app.seed_submission(402, None, OverallStatus::Todo, &["Table 1"]).await;
    app.user(5, "reviewer@x.org", false).await;
    let table = first_table(&app, 402).await;
    let uri = format!("/record/data/review/message/402/{}", table);

    for text in ["first", "second", "third"] {
        let response = app
            .send(form(&uri, Some(5), &format!("message={}&version=1", text)))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let posted = body_json(response).await;
        assert_eq!(posted["message"], text);
        assert_eq!(posted["user"], "reviewer@x.org");
    }

    let response = app
        .send(get(&format!("/record/data/review/message/402/{}/1", table), Some(1)))
        .await;
    let thread = body_json(response).await;
    let texts: Vec<_> = thread
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    assert_eq!(thread[0]["user_email"], "reviewer@x.org");

    let notifications = app.drain_notifications();
    assert_eq!(notifications.len(), 3);
    assert_matches!(
        &notifications[0],
        Notification::ReviewMessage { author: UserId(5), table_name, .. } if table_name == "Table 1"
    );
}

#[tokio::test]
async fn empty_and_anonymous_messages_are_refused() {
    let app = TestApp::new();
    app.seed_submission(403, None, OverallStatus::Todo, &["Table 1"]).await;
    let table = first_table(&app, 403).await;
    let uri = format!("/record/data/review/message/403/{}", table);

    let response = app.send(form(&uri, Some(1), "message=%20%20&version=1")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(form(&uri, None, "message=hello&version=1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(get(&format!("/record/data/review/message/403/{}/1", table), Some(1)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn all_messages_are_grouped_by_table_name() {
    let app = TestApp::new();
    app.seed_submission(404, None, OverallStatus::Todo, &["Table 1", "Table 2"]).await;
    app.user(1, "coord@x.org", false).await;
    let tables = app.store.data_tables(PublicationId(404), Version(1)).await.unwrap();

    for table in &tables {
        let uri = format!("/record/data/review/message/404/{}", table.id);
        app.send(form(&uri, Some(1), &format!("message=about+{}&version=1", table.id)))
            .await;
    }

    let response = app.send(get("/record/data/review/message/404", Some(1))).await;
    let grouped = body_json(response).await;
    assert_eq!(grouped["Table 1"][0]["message"], format!("about {}", tables[0].id));
    assert_eq!(grouped["Table 2"][0]["message"], format!("about {}", tables[1].id));

    let response = app
        .send(get("/record/data/review/?publication_recid=404", None))
        .await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
}
