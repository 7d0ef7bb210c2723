pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod ids;
pub mod ingest;
pub mod notify;
pub mod records;
pub mod review;
pub mod routes;
pub mod search;
pub mod state;
pub mod storage;
pub mod templates;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Every route of the portal. Download paths are extracted positionally, so
/// the short forms share segment names with the versioned ones.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/record/count", get(routes::record_count))
        .route("/record/latest", get(routes::latest_records))
        .route("/record/sandbox", get(routes::sandbox_list))
        .route("/record/sandbox/consume", post(routes::consume_sandbox_payload))
        .route("/record/sandbox/:id", get(routes::sandbox_page))
        .route("/record/sandbox/:id/consume", post(routes::update_sandbox_payload))
        .route("/record/data/review/", get(routes::reviews_for_record))
        .route(
            "/record/data/review/status/",
            get(routes::review_status).post(routes::set_review_status),
        )
        .route("/record/data/review/message/:pub", get(routes::all_review_messages))
        .route("/record/data/review/message/:pub/:table", post(routes::add_review_message))
        .route(
            "/record/data/review/message/:pub/:table/:version",
            get(routes::table_review_messages),
        )
        .route("/record/data/file/:id", get(routes::data_file))
        .route("/record/data/:pub/:table/:version", get(routes::table_details))
        .route("/record/resources/:id", get(routes::publication_resources))
        .route("/record/resource/:id", get(routes::resource))
        .route("/record/resource/download/:id", get(routes::download_resource))
        .route("/record/coordinator/view/:id", get(routes::coordinator_view))
        .route(
            "/record/:id",
            get(routes::record_metadata).post(routes::record_metadata),
        )
        .route(
            "/record/:id/metadata",
            get(routes::record_metadata).post(routes::record_metadata),
        )
        .route("/record/:id/document", get(routes::record_document))
        .route(
            "/record/:id/consume",
            get(routes::consume_redirect).post(routes::consume_data_payload),
        )
        .route("/download/submission/:id/:segment", get(routes::download_submission))
        .route(
            "/download/submission/:id/:segment/:format",
            get(routes::download_submission_with_version),
        )
        .route("/download/table/:id/:table", get(routes::download_table_by_id))
        .route("/download/table/:id/:table/:segment", get(routes::download_table))
        .route(
            "/download/table/:id/:table/:segment/:format",
            get(routes::download_table_with_version),
        )
        .route("/download/convert", post(routes::convert_archive))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
