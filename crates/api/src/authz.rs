//! API-side project authorization guard.
//!
//! Runs before any ledger operation so the ledger itself stays
//! authorization-agnostic.

use haas_auth::{authorize, AuthzError, Project, ProjectAccess, ProjectAction};
use haas_core::ProjectId;

use crate::context::SubjectContext;

/// Check that the request's subject may perform `action` on `project_id`.
pub fn authorize_project<A>(
    access: &A,
    subject: &SubjectContext,
    project_id: ProjectId,
    action: ProjectAction,
) -> Result<Project, AuthzError>
where
    A: ProjectAccess + ?Sized,
{
    authorize(access, subject.subject_id(), project_id, action)
}
