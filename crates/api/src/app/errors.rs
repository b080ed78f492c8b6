use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use haas_auth::AuthzError;
use haas_hardware::AllocationError;
use haas_infra::{DirectoryError, LedgerError, MembershipError};

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Rejected(e) => allocation_error_to_response(&e),
        LedgerError::Invariant(msg) => {
            tracing::error!(error = %msg, "ledger invariant violated");
            internal_error()
        }
        LedgerError::Store(e) => {
            tracing::error!(error = %e, "ledger store failure");
            internal_error()
        }
    }
}

pub fn allocation_error_to_response(err: &AllocationError) -> axum::response::Response {
    let status = match err {
        AllocationError::KindNotFound(_) | AllocationError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        AllocationError::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
        AllocationError::InsufficientCapacity { .. } | AllocationError::OverReturn { .. } => {
            StatusCode::CONFLICT
        }
        AllocationError::Invariant(e) => {
            tracing::error!(error = %e, "allocation invariant violated");
            return internal_error();
        }
    };
    json_error(status, err.code(), err.to_string())
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    match err {
        AuthzError::ProjectNotFound(id) => {
            allocation_error_to_response(&AllocationError::ProjectNotFound(id))
        }
        AuthzError::NotMember { .. } => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
    }
}

pub fn membership_error_to_response(err: MembershipError) -> axum::response::Response {
    match err {
        MembershipError::Access(e) => authz_error_to_response(e),
        MembershipError::NotCreator(_) => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
    }
}

pub fn directory_error_to_response(err: DirectoryError) -> axum::response::Response {
    match err {
        DirectoryError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        DirectoryError::Membership(e) => membership_error_to_response(e),
        DirectoryError::Store(e) => {
            tracing::error!(error = %e, "project directory store failure");
            internal_error()
        }
    }
}

pub fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal server error",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
