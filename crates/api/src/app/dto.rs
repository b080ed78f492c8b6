use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use haas_core::{HardwareKindId, ProjectId, SubjectId};
use haas_hardware::Quantity;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /hardware/checkout` and `POST /hardware/checkin`.
#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    pub hardware_set_id: String,
    pub project_id: String,
    /// Kept raw so that fractions, strings and overflow are reported as
    /// `invalid_quantity` rather than as a body rejection.
    #[serde(default)]
    pub quantity: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_public: bool,
}

/// Body of `POST /projects/:id/members`; no subject means "add me".
#[derive(Debug, Default, Deserialize)]
pub struct AddMemberRequest {
    pub subject_id: Option<String>,
}

// -------------------------
// Parsing helpers
// -------------------------

/// Validated allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub kind_id: HardwareKindId,
    pub project_id: ProjectId,
    pub quantity: Quantity,
}

impl AllocationRequest {
    /// Quantity is checked first; ids that can't name anything are reported
    /// as not found.
    pub fn parse(self) -> Result<Allocation, axum::response::Response> {
        let quantity = match self.quantity.as_i64() {
            Some(n) => Quantity::try_from(n).map_err(|e| errors::allocation_error_to_response(&e))?,
            None => {
                return Err(errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_quantity",
                    format!("quantity must be a positive integer (got {})", self.quantity),
                ));
            }
        };

        let project_id: ProjectId = self.project_id.parse().map_err(|_| {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "Project not found")
        })?;

        let kind_id = HardwareKindId::new(self.hardware_set_id.as_str()).map_err(|_| {
            errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("hardware kind '{}' not found", self.hardware_set_id),
            )
        })?;

        Ok(Allocation {
            kind_id,
            project_id,
            quantity,
        })
    }
}

/// Unwrap a JSON body, reporting unreadable ones in the standard error shape.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    body.map(|Json(v)| v)
        .map_err(|rejection| errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text()))
}

pub fn parse_project_id(raw: &str) -> Result<ProjectId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid project id"))
}

pub fn parse_subject_id(raw: &str) -> Result<SubjectId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid subject id"))
}

pub fn parse_kind_id(raw: &str) -> Result<HardwareKindId, axum::response::Response> {
    HardwareKindId::new(raw).map_err(|_| {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("hardware kind '{raw}' not found"),
        )
    })
}
