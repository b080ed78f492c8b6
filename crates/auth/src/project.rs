use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haas_core::{DomainError, DomainResult, ProjectId, SubjectId};

/// A project as seen by the authorization boundary: who created it, who may
/// allocate hardware against it, and whether outsiders can see and join it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub created_by: SubjectId,
    /// Always contains `created_by`.
    pub members: BTreeSet<SubjectId>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: SubjectId,
        is_public: bool,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("project name cannot be empty"));
        }
        Ok(Self {
            id: ProjectId::new(),
            name,
            description: description.into(),
            created_by,
            members: BTreeSet::from([created_by]),
            is_public,
            created_at,
        })
    }

    pub fn is_member(&self, subject: SubjectId) -> bool {
        self.members.contains(&subject)
    }

    pub fn can_view(&self, subject: SubjectId) -> bool {
        self.is_public || self.is_member(subject)
    }

    /// Checkout and check-in are limited to members.
    pub fn can_allocate(&self, subject: SubjectId) -> bool {
        self.is_member(subject)
    }

    /// Add a member. Returns `false` if the subject already was one.
    pub fn add_member(&mut self, subject: SubjectId) -> bool {
        self.members.insert(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_is_a_member() {
        let creator = SubjectId::new();
        let p = Project::new("Robot arm", "", creator, false, Utc::now()).unwrap();
        assert!(p.is_member(creator));
        assert!(p.can_allocate(creator));
        assert!(!p.can_view(SubjectId::new()));
    }

    #[test]
    fn public_projects_are_visible_but_not_allocatable_by_outsiders() {
        let p = Project::new("Open lab", "", SubjectId::new(), true, Utc::now()).unwrap();
        let outsider = SubjectId::new();
        assert!(p.can_view(outsider));
        assert!(!p.can_allocate(outsider));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Project::new(" ", "", SubjectId::new(), true, Utc::now()).is_err());
    }
}
