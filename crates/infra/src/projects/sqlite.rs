//! SQLite-backed project directory.
//!
//! Every project is loaded into an [`InMemoryProjectDirectory`] on open so
//! that access checks stay synchronous; writes go to the database first and
//! only then to memory. Assumes this process is the only writer.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use haas_auth::{Project, ProjectAccess};
use haas_core::{DomainError, ProjectId, SubjectId};

use super::{DirectoryError, InMemoryProjectDirectory};
use crate::store::sqlite::{decode_time, encode_time, get, map_sqlx_error, rollback};
use crate::store::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        description TEXT NOT NULL,
        created_by  TEXT NOT NULL,
        is_public   INTEGER NOT NULL,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_members (
        project_id TEXT NOT NULL REFERENCES projects (id),
        subject_id TEXT NOT NULL,
        PRIMARY KEY (project_id, subject_id)
    )
    "#,
];

#[derive(Debug)]
pub struct SqliteProjectDirectory {
    pool: SqlitePool,
    cache: InMemoryProjectDirectory,
}

impl SqliteProjectDirectory {
    /// Create the project tables if needed and load every project.
    ///
    /// Takes the ledger store's pool so projects and allocation records live
    /// in the same database.
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| map_sqlx_error("migrate_projects", e))?;
        }

        let cache = InMemoryProjectDirectory::new();
        let loaded = load(&pool).await?;
        let count = loaded.len();
        for project in loaded {
            cache.insert(project);
        }
        tracing::debug!(projects = count, "project directory loaded");

        Ok(Self { pool, cache })
    }

    pub async fn create(
        &self,
        name: &str,
        description: &str,
        created_by: SubjectId,
        is_public: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Project, DirectoryError> {
        let project = Project::new(name.trim(), description, created_by, is_public, created_at)?;
        self.insert_project(&project).await?;
        self.cache.insert(project.clone());
        tracing::info!(project_id = %project.id, %created_by, is_public, "project created");
        Ok(project)
    }

    pub fn list_visible(&self, subject: SubjectId) -> Vec<Project> {
        self.cache.list_visible(subject)
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
        let project = self.cache.check_add_member(actor, project_id, member)?;
        if !project.is_member(member) {
            sqlx::query(
                r#"
                INSERT INTO project_members (project_id, subject_id)
                VALUES (?1, ?2)
                ON CONFLICT (project_id, subject_id) DO NOTHING
                "#,
            )
            .bind(project_id.to_string())
            .bind(member.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("add_member", e))?;
        }
        Ok(self.cache.record_member(actor, project_id, member)?)
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, created_by, is_public, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_by.to_string())
        .bind(project.is_public)
        .bind(encode_time(project.created_at))
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return rollback(tx, map_sqlx_error("insert_project", e)).await;
        }

        for member in &project.members {
            let inserted = sqlx::query("INSERT INTO project_members (project_id, subject_id) VALUES (?1, ?2)")
                .bind(project.id.to_string())
                .bind(member.to_string())
                .execute(&mut *tx)
                .await;
            if let Err(e) = inserted {
                return rollback(tx, map_sqlx_error("insert_project_member", e)).await;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

impl ProjectAccess for SqliteProjectDirectory {
    fn project(&self, project_id: ProjectId) -> Option<Project> {
        self.cache.project(project_id)
    }
}

async fn load(pool: &SqlitePool) -> Result<Vec<Project>, StoreError> {
    let rows = sqlx::query("SELECT id, name, description, created_by, is_public, created_at FROM projects")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_projects", e))?;

    let mut projects = HashMap::with_capacity(rows.len());
    for row in &rows {
        let project = project_from_row(row)?;
        projects.insert(project.id, project);
    }

    let rows = sqlx::query("SELECT project_id, subject_id FROM project_members")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_project_members", e))?;

    for row in &rows {
        let project_id: ProjectId = get::<String>(row, "project_id")?.parse().map_err(corrupt)?;
        let subject_id: SubjectId = get::<String>(row, "subject_id")?.parse().map_err(corrupt)?;
        projects
            .get_mut(&project_id)
            .ok_or_else(|| StoreError::Corrupt(format!("member row for unknown project {project_id}")))?
            .add_member(subject_id);
    }

    Ok(projects.into_values().collect())
}

fn project_from_row(row: &SqliteRow) -> Result<Project, StoreError> {
    let id: ProjectId = get::<String>(row, "id")?.parse().map_err(corrupt)?;
    let created_by: SubjectId = get::<String>(row, "created_by")?.parse().map_err(corrupt)?;

    Ok(Project {
        id,
        name: get::<String>(row, "name")?,
        description: get::<String>(row, "description")?,
        created_by,
        members: BTreeSet::from([created_by]),
        is_public: get::<bool>(row, "is_public")?,
        created_at: decode_time(&get::<String>(row, "created_at")?)?,
    })
}

fn corrupt(e: DomainError) -> StoreError {
    StoreError::Corrupt(e.to_string())
}
