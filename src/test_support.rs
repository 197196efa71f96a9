//! Shared fixtures for unit tests.

use chrono::NaiveDate;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use crate::models::organization::Model as OrganizationModel;
use crate::models::project::{Model as ProjectModel, ProjectView};
use crate::models::task::{Model as TaskModel, TaskStatus};
use crate::repositories::organization::{NewOrganization, OrganizationRepository};
use crate::repositories::project::{NewProject, ProjectRepository};
use crate::repositories::task::{NewTask, TaskRepository};

/// Fresh in-memory SQLite database with every migration applied.
pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect to in-memory sqlite");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// Organization owned (and active) for `owner`.
pub async fn seed_org(db: &DatabaseConnection, name: &str, owner: Uuid) -> OrganizationModel {
    OrganizationRepository::new(db)
        .create_with_owner(
            NewOrganization {
                name: name.to_string(),
                description: None,
                avatar_color: "#3b82f6".to_string(),
                avatar_icon: "rocket".to_string(),
            },
            owner,
        )
        .await
        .expect("seed organization")
}

/// Project in `org_id` with `owner` as its owner.
pub async fn seed_project(
    db: &DatabaseConnection,
    org_id: Uuid,
    name: &str,
    owner: Uuid,
) -> ProjectModel {
    ProjectRepository::new(db)
        .create_with_owner(
            org_id,
            NewProject {
                name: name.to_string(),
                avatar_color: "#10b981".to_string(),
                avatar_icon: "star".to_string(),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
                end_date: None,
                view: ProjectView::List,
            },
            owner,
        )
        .await
        .expect("seed project")
}

/// Top-level task in `project_id` created by `owner`.
pub async fn seed_task(
    db: &DatabaseConnection,
    project_id: Uuid,
    title: &str,
    owner: Uuid,
) -> TaskModel {
    TaskRepository::new(db)
        .create(NewTask {
            project_id,
            parent_id: None,
            title: title.to_string(),
            content: None,
            status: TaskStatus::Todo,
            due_date: None,
            assignee_id: None,
            created_by: owner,
        })
        .await
        .expect("seed task")
}
