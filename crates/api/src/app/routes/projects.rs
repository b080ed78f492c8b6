use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use haas_auth::ProjectAction;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::SubjectContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/:id/members", post(add_member))
        .route("/:id/holdings", get(get_holdings))
        .route("/:id/allocations", get(get_allocations))
}

pub async fn list_projects(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
) -> impl IntoResponse {
    Json(services.projects.list_visible(subject.subject_id()))
}

pub async fn create_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    body: Result<Json<dto::CreateProjectRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projects
        .create(
            &body.name,
            &body.description,
            subject.subject_id(),
            body.is_public,
            Utc::now(),
        )
        .await
    {
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(e) => errors::directory_error_to_response(e),
    }
}

pub async fn add_member(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::AddMemberRequest>>,
) -> axum::response::Response {
    let project_id = match dto::parse_project_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let member = match body.subject_id.as_deref() {
        Some(raw) => match dto::parse_subject_id(raw) {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        None => subject.subject_id(),
    };

    match services
        .projects
        .add_member(subject.subject_id(), project_id, member)
        .await
    {
        Ok(project) => Json(project).into_response(),
        Err(e) => errors::directory_error_to_response(e),
    }
}

pub async fn get_holdings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id = match dto::parse_project_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) =
        crate::authz::authorize_project(&services.projects, &subject, project_id, ProjectAction::View)
    {
        return errors::authz_error_to_response(e);
    }

    match services.ledger.project_holdings(project_id).await {
        Ok(holdings) => Json(holdings).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_allocations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let project_id = match dto::parse_project_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) =
        crate::authz::authorize_project(&services.projects, &subject, project_id, ProjectAction::View)
    {
        return errors::authz_error_to_response(e);
    }

    match services.ledger.project_records(project_id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
