use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use haas_core::{ProjectId, SubjectId};

use crate::project::Project;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Unknown project, or a private one the subject may not see.
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("forbidden: subject {subject} is not a member of project {project}")]
    NotMember { subject: SubjectId, project: ProjectId },
}

/// What a subject is trying to do with a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectAction {
    /// Read the project, its holdings and its allocation history.
    View,
    /// Check hardware out against the project or return it.
    Allocate,
    /// Become a member (public projects only).
    Join,
}

/// Source of project visibility/membership facts.
///
/// Implemented by whatever owns project data; this crate only decides.
pub trait ProjectAccess: Send + Sync {
    fn project(&self, project_id: ProjectId) -> Option<Project>;

    /// Whether `subject` may allocate hardware against `project_id`.
    fn is_authorized(&self, subject: SubjectId, project_id: ProjectId) -> bool {
        self.project(project_id)
            .is_some_and(|p| p.can_allocate(subject))
    }
}

impl<S> ProjectAccess for Arc<S>
where
    S: ProjectAccess + ?Sized,
{
    fn project(&self, project_id: ProjectId) -> Option<Project> {
        (**self).project(project_id)
    }
}

/// Authorize `action` on a project for `subject`.
///
/// - No IO beyond the lookup
/// - No panics
/// - Private projects are reported as not found to non-members
pub fn authorize<A>(
    access: &A,
    subject: SubjectId,
    project_id: ProjectId,
    action: ProjectAction,
) -> Result<Project, AuthzError>
where
    A: ProjectAccess + ?Sized,
{
    let project = access
        .project(project_id)
        .filter(|p| p.can_view(subject))
        .ok_or(AuthzError::ProjectNotFound(project_id))?;

    let allowed = match action {
        ProjectAction::View | ProjectAction::Join => true,
        ProjectAction::Allocate => project.can_allocate(subject),
    };

    if !allowed {
        tracing::debug!(%subject, %project_id, ?action, "project access denied");
        return Err(AuthzError::NotMember {
            subject,
            project: project_id,
        });
    }

    Ok(project)
}
