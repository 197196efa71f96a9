//! # Task Link Repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::TaskLink;
use crate::models::task_link::{self, ActiveModel as LinkActiveModel, Model as LinkModel};

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct LinkChanges {
    pub title: Option<String>,
    pub link_url: Option<String>,
}

impl LinkChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.link_url.is_none()
    }
}

pub struct LinkRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> LinkRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        task_id: Uuid,
        title: Option<String>,
        link_url: String,
        created_by: Uuid,
    ) -> Result<LinkModel, RepositoryError> {
        LinkActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            title: Set(title),
            link_url: Set(link_url),
            created_by: Set(created_by),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Finds a link, hiding links of other tasks.
    pub async fn find_for_task(
        &self,
        task_id: Uuid,
        link_id: Uuid,
    ) -> Result<LinkModel, RepositoryError> {
        TaskLink::find_by_id(link_id)
            .filter(task_link::Column::TaskId.eq(task_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Link"))
    }

    /// Links of a task, newest first.
    pub async fn list(
        &self,
        task_id: Uuid,
        page: Page,
    ) -> Result<(Vec<LinkModel>, u64), RepositoryError> {
        let query = TaskLink::find().filter(task_link::Column::TaskId.eq(task_id));
        let total = query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let rows = query
            .order_by_desc(task_link::Column::CreatedAt)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok((rows, total))
    }

    pub async fn update(
        &self,
        link: LinkModel,
        changes: LinkChanges,
    ) -> Result<LinkModel, RepositoryError> {
        let mut active = link.into_active_model();
        if let Some(title) = changes.title {
            active.title = Set(Some(title));
        }
        if let Some(link_url) = changes.link_url {
            active.link_url = Set(link_url);
        }
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, task_id: Uuid, link_id: Uuid) -> Result<(), RepositoryError> {
        let result = TaskLink::delete_many()
            .filter(task_link::Column::Id.eq(link_id))
            .filter(task_link::Column::TaskId.eq(task_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Link"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org, seed_project, seed_task, setup_db};

    async fn task_fixture(db: &DatabaseConnection, owner: Uuid) -> Uuid {
        let org = seed_org(db, "Acme", owner).await;
        let project = seed_project(db, org.id, "Apollo", owner).await;
        seed_task(db, project.id, "Write docs", owner).await.id
    }

    #[tokio::test]
    async fn links_are_scoped_to_their_task() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let task_id = task_fixture(&db, owner).await;
        let repo = LinkRepository::new(&db);

        let link = repo
            .create(task_id, None, "https://example.com/a".into(), owner)
            .await
            .unwrap();
        repo.create(task_id, Some("B".into()), "https://example.com/b".into(), owner)
            .await
            .unwrap();

        let (rows, total) = repo.list(task_id, Page::new(0, 10)).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);

        assert!(matches!(
            repo.find_for_task(Uuid::new_v4(), link.id).await,
            Err(RepositoryError::NotFound(_))
        ));

        let updated = repo
            .update(
                link,
                LinkChanges {
                    title: Some("Spec".into()),
                    link_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Spec"));
        assert_eq!(updated.link_url, "https://example.com/a");

        repo.delete(task_id, updated.id).await.unwrap();
        assert!(matches!(
            repo.delete(task_id, updated.id).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
