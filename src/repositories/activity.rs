//! Append-only activity log for tasks and projects.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::Activity;
use crate::models::activity::{self, ActiveModel as ActivityActiveModel, ActivityEntity, Model as ActivityModel};

pub struct ActivityRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ActivityRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        entity_type: ActivityEntity,
        entity_id: Uuid,
        user_id: Uuid,
        description: impl Into<String>,
    ) -> Result<ActivityModel, RepositoryError> {
        ActivityActiveModel {
            id: Set(Uuid::new_v4()),
            entity_type: Set(entity_type),
            entity_id: Set(entity_id),
            user_id: Set(user_id),
            description: Set(description.into()),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Entries for a single task, newest first.
    pub async fn for_task(&self, task_id: Uuid) -> Result<Vec<ActivityModel>, RepositoryError> {
        Activity::find()
            .filter(activity::Column::EntityType.eq(ActivityEntity::Task))
            .filter(activity::Column::EntityId.eq(task_id))
            .order_by_desc(activity::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Entries for a project and all of its tasks, newest first.
    pub async fn for_project(
        &self,
        project_id: Uuid,
        task_ids: Vec<Uuid>,
        page: Page,
    ) -> Result<(Vec<ActivityModel>, u64), RepositoryError> {
        let query = Activity::find()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(activity::Column::EntityType.eq(ActivityEntity::Project))
                            .add(activity::Column::EntityId.eq(project_id)),
                    )
                    .add(
                        Condition::all()
                            .add(activity::Column::EntityType.eq(ActivityEntity::Task))
                            .add(activity::Column::EntityId.is_in(task_ids)),
                    ),
            )
            .order_by_desc(activity::Column::CreatedAt);

        let total = query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let rows = query
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    #[tokio::test]
    async fn project_feed_includes_task_entries() {
        let db = setup_db().await;
        let repo = ActivityRepository::new(&db);
        let user = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();

        repo.record(ActivityEntity::Project, project_id, user, "created the project")
            .await
            .unwrap();
        repo.record(ActivityEntity::Task, task_id, user, "created the task")
            .await
            .unwrap();
        repo.record(ActivityEntity::Task, Uuid::new_v4(), user, "unrelated")
            .await
            .unwrap();

        let (feed, total) = repo
            .for_project(project_id, vec![task_id], Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(feed.iter().all(|entry| entry.description != "unrelated"));

        let task_feed = repo.for_task(task_id).await.unwrap();
        assert_eq!(task_feed.len(), 1);
    }
}
