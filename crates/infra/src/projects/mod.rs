//! Project directory: who owns which project, who may see it and who may
//! allocate hardware against it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use haas_auth::{AuthzError, Project, ProjectAccess};
use haas_core::{DomainError, ProjectId, SubjectId};

use crate::store::{AnyLedgerStore, StoreError};

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryProjectDirectory;
pub use sqlite::SqliteProjectDirectory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error(transparent)]
    Access(#[from] AuthzError),

    #[error("only the creator of project {0} may add other members")]
    NotCreator(ProjectId),
}

/// Failure of a directory write.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Directory selected at startup, always next to the ledger store: projects
/// are persisted exactly when allocation records are.
#[derive(Debug)]
pub enum AnyProjectDirectory {
    InMemory(InMemoryProjectDirectory),
    Sqlite(SqliteProjectDirectory),
}

impl AnyProjectDirectory {
    /// Open the directory that shares `store`'s backend.
    pub async fn for_store(store: &AnyLedgerStore) -> Result<Self, StoreError> {
        match store {
            AnyLedgerStore::InMemory(_) => Ok(Self::InMemory(InMemoryProjectDirectory::new())),
            AnyLedgerStore::Sqlite(s) => Ok(Self::Sqlite(SqliteProjectDirectory::open(s.pool().clone()).await?)),
        }
    }

    pub async fn create(
        &self,
        name: &str,
        description: &str,
        created_by: SubjectId,
        is_public: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Project, DirectoryError> {
        match self {
            Self::InMemory(d) => Ok(d.create(name, description, created_by, is_public, created_at)?),
            Self::Sqlite(d) => d.create(name, description, created_by, is_public, created_at).await,
        }
    }

    pub fn list_visible(&self, subject: SubjectId) -> Vec<Project> {
        match self {
            Self::InMemory(d) => d.list_visible(subject),
            Self::Sqlite(d) => d.list_visible(subject),
        }
    }

    pub async fn join(&self, subject: SubjectId, project_id: ProjectId) -> Result<Project, DirectoryError> {
        self.add_member(subject, project_id, subject).await
    }

    pub async fn add_member(
        &self,
        actor: SubjectId,
        project_id: ProjectId,
        member: SubjectId,
    ) -> Result<Project, DirectoryError> {
        match self {
            Self::InMemory(d) => Ok(d.add_member(actor, project_id, member)?),
            Self::Sqlite(d) => d.add_member(actor, project_id, member).await,
        }
    }
}

impl ProjectAccess for AnyProjectDirectory {
    fn project(&self, project_id: ProjectId) -> Option<Project> {
        match self {
            Self::InMemory(d) => d.project(project_id),
            Self::Sqlite(d) => d.project(project_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_follows_the_store_backend() {
        let store = AnyLedgerStore::open(None).await.unwrap();
        let dir = AnyProjectDirectory::for_store(&store).await.unwrap();
        assert!(matches!(dir, AnyProjectDirectory::InMemory(_)));

        let store = AnyLedgerStore::open(Some("sqlite::memory:")).await.unwrap();
        let dir = AnyProjectDirectory::for_store(&store).await.unwrap();
        assert!(matches!(dir, AnyProjectDirectory::Sqlite(_)));

        let creator = SubjectId::new();
        let p = dir.create("Rover", "", creator, false, Utc::now()).await.unwrap();
        assert!(dir.is_authorized(creator, p.id));
        assert_eq!(dir.list_visible(creator), vec![p]);
    }
}
