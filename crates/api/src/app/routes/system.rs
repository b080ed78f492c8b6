use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::context::SubjectContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(subject): Extension<SubjectContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "subject_id": subject.subject_id().to_string(),
    }))
}
