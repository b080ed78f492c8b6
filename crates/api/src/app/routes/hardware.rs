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
use haas_hardware::{Checkin, Checkout};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::SubjectContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_kinds))
        .route("/checkout", post(checkout))
        .route("/checkin", post(checkin))
        .route("/:kind_id", get(get_kind))
}

pub async fn list_kinds(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ledger.list_kinds().await {
        Ok(kinds) => Json(kinds).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_kind(
    Extension(services): Extension<Arc<AppServices>>,
    Path(kind_id): Path<String>,
) -> axum::response::Response {
    let kind_id = match dto::parse_kind_id(&kind_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.lookup_kind(&kind_id).await {
        Ok(kind) => Json(kind).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    body: Result<Json<dto::AllocationRequest>, JsonRejection>,
) -> axum::response::Response {
    let req = match dto::json_body(body).and_then(dto::AllocationRequest::parse) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) = crate::authz::authorize_project(
        &services.projects,
        &subject,
        req.project_id,
        ProjectAction::Allocate,
    ) {
        return errors::authz_error_to_response(e);
    }

    let cmd = Checkout {
        project_id: req.project_id,
        kind_id: req.kind_id,
        subject_id: subject.subject_id(),
        quantity: req.quantity,
        occurred_at: Utc::now(),
    };

    let receipt = match services.ledger.checkout(cmd).await {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "record_id": receipt.record.id_typed().to_string(),
            "message": format!(
                "Checked out {} units of {}",
                receipt.record.quantity(),
                receipt.kind.name()
            ),
        })),
    )
        .into_response()
}

pub async fn checkin(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<SubjectContext>,
    body: Result<Json<dto::AllocationRequest>, JsonRejection>,
) -> axum::response::Response {
    let req = match dto::json_body(body).and_then(dto::AllocationRequest::parse) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Err(e) = crate::authz::authorize_project(
        &services.projects,
        &subject,
        req.project_id,
        ProjectAction::Allocate,
    ) {
        return errors::authz_error_to_response(e);
    }

    let cmd = Checkin {
        project_id: req.project_id,
        kind_id: req.kind_id,
        quantity: req.quantity,
        occurred_at: Utc::now(),
    };

    let receipt = match services.ledger.checkin(cmd).await {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "units_returned": receipt.units_returned.get(),
            "message": format!(
                "Checked in {} units of {}",
                receipt.units_returned,
                receipt.kind.name()
            ),
        })),
    )
        .into_response()
}
