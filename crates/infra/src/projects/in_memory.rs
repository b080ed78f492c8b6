use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use haas_auth::{authorize, AuthzError, Project, ProjectAccess, ProjectAction};
use haas_core::{DomainError, ProjectId, SubjectId};

use super::MembershipError;

/// In-memory project directory for tests/dev.
///
/// Owns project membership and visibility; the ledger only asks it
/// [`ProjectAccess`] questions. Projects are never removed and membership
/// only grows, so an authorization decision stays valid after the read lock
/// is released.
#[derive(Debug, Default)]
pub struct InMemoryProjectDirectory {
    inner: RwLock<HashMap<ProjectId, Project>>,
}

impl InMemoryProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        name: &str,
        description: &str,
        created_by: SubjectId,
        is_public: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Project, DomainError> {
        let project = Project::new(name.trim(), description, created_by, is_public, created_at)?;
        self.insert(project.clone());
        tracing::info!(project_id = %project.id, %created_by, is_public, "project created");
        Ok(project)
    }

    /// Projects `subject` can see, oldest first.
    pub fn list_visible(&self, subject: SubjectId) -> Vec<Project> {
        let mut out: Vec<_> = self
            .read()
            .values()
            .filter(|p| p.can_view(subject))
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.created_at, p.id));
        out
    }

    /// Join a project the subject can see. Joining twice is a no-op.
    pub fn join(&self, subject: SubjectId, project_id: ProjectId) -> Result<Project, MembershipError> {
        self.add_member(subject, project_id, subject)
    }

    /// Add `member` to a project on behalf of `actor`.
    ///
    /// Anyone who can see the project may add themselves; only the creator
    /// may add someone else.
    pub fn add_member(
        &self,
        actor: SubjectId,
        project_id: ProjectId,
        member: SubjectId,
    ) -> Result<Project, MembershipError> {
        self.check_add_member(actor, project_id, member)?;
        self.record_member(actor, project_id, member)
    }

    /// Authorization half of [`Self::add_member`]. Returns the project as it
    /// is now.
    pub(crate) fn check_add_member(
        &self,
        actor: SubjectId,
        project_id: ProjectId,
        member: SubjectId,
    ) -> Result<Project, MembershipError> {
        let project = authorize(self, actor, project_id, ProjectAction::Join)?;
        if member != actor && project.created_by != actor {
            return Err(MembershipError::NotCreator(project_id));
        }
        Ok(project)
    }

    /// Apply an already authorized membership change.
    pub(crate) fn record_member(
        &self,
        actor: SubjectId,
        project_id: ProjectId,
        member: SubjectId,
    ) -> Result<Project, MembershipError> {
        let mut map = self.write();
        let project = map
            .get_mut(&project_id)
            .ok_or(AuthzError::ProjectNotFound(project_id))?;
        if project.add_member(member) {
            tracing::info!(%project_id, %member, added_by = %actor, "project member added");
        }
        Ok(project.clone())
    }

    /// Insert or replace a project as-is (creation, or loading from storage).
    pub(crate) fn insert(&self, project: Project) {
        self.write().insert(project.id, project);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ProjectId, Project>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ProjectId, Project>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProjectAccess for InMemoryProjectDirectory {
    fn project(&self, project_id: ProjectId) -> Option<Project> {
        self.read().get(&project_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn creator_can_allocate_outsider_cannot() {
        let dir = InMemoryProjectDirectory::new();
        let creator = SubjectId::new();
        let p = dir.create("Rover", "", creator, true, Utc::now()).unwrap();

        assert!(dir.is_authorized(creator, p.id));
        assert!(!dir.is_authorized(SubjectId::new(), p.id));
    }

    #[test]
    fn public_project_can_be_joined() {
        let dir = InMemoryProjectDirectory::new();
        let p = dir.create("Open lab", "", SubjectId::new(), true, Utc::now()).unwrap();
        let joiner = SubjectId::new();

        let joined = dir.join(joiner, p.id).unwrap();
        assert!(joined.is_member(joiner));
        assert!(dir.is_authorized(joiner, p.id));
        // Idempotent.
        assert_eq!(dir.join(joiner, p.id).unwrap().members.len(), 2);
    }

    #[test]
    fn private_project_cannot_be_joined_by_outsiders() {
        let dir = InMemoryProjectDirectory::new();
        let p = dir.create("Secret", "", SubjectId::new(), false, Utc::now()).unwrap();

        assert_eq!(
            dir.join(SubjectId::new(), p.id),
            Err(MembershipError::Access(AuthzError::ProjectNotFound(p.id)))
        );
    }

    #[test]
    fn only_the_creator_adds_other_members() {
        let dir = InMemoryProjectDirectory::new();
        let creator = SubjectId::new();
        let p = dir.create("Open lab", "", creator, true, Utc::now()).unwrap();
        let member = SubjectId::new();
        let other = SubjectId::new();

        dir.join(member, p.id).unwrap();
        assert_eq!(
            dir.add_member(member, p.id, other),
            Err(MembershipError::NotCreator(p.id))
        );
        assert!(dir.add_member(creator, p.id, other).unwrap().is_member(other));
    }

    #[test]
    fn listing_hides_private_projects_of_others() {
        let dir = InMemoryProjectDirectory::new();
        let me = SubjectId::new();
        dir.create("Mine", "", me, false, Utc::now()).unwrap();
        dir.create("Public", "", SubjectId::new(), true, Utc::now()).unwrap();
        dir.create("Hidden", "", SubjectId::new(), false, Utc::now()).unwrap();

        let names: Vec<_> = dir.list_visible(me).into_iter().map(|p| p.name).collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"Hidden".to_string()));
    }

    #[test]
    fn poisoned_lock_still_serves_every_method() {
        let dir = Arc::new(InMemoryProjectDirectory::new());
        let me = SubjectId::new();
        let p = dir.create("Mine", "", me, false, Utc::now()).unwrap();

        let poisoner = Arc::clone(&dir);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("poison the directory lock");
        })
        .join();
        assert!(dir.inner.is_poisoned());

        assert_eq!(dir.list_visible(me).len(), 1);
        assert!(dir.is_authorized(me, p.id));
        let other = SubjectId::new();
        assert!(dir.add_member(me, p.id, other).unwrap().is_member(other));
    }
}
