//! # Inbox Repository
//!
//! Per-user notification rows. Every lookup is scoped to the recipient and
//! organization so one user can never read another user's inbox.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::Inbox;
use crate::models::inbox::{self, ActiveModel as InboxActiveModel, InboxEventType, Model as InboxModel};

/// A notification about to be stored.
#[derive(Debug, Clone)]
pub struct NewInboxEntry {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub user_by: Uuid,
    pub event_type: InboxEventType,
    pub title: String,
    pub message: String,
    pub reference_id: Option<Uuid>,
}

/// Repository for inbox notifications
pub struct InboxRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> InboxRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    fn scoped(user_id: Uuid, org_id: Uuid) -> Select<Inbox> {
        Inbox::find()
            .filter(inbox::Column::UserId.eq(user_id))
            .filter(inbox::Column::OrgId.eq(org_id))
    }

    pub async fn create(&self, entry: NewInboxEntry) -> Result<InboxModel, RepositoryError> {
        let now = Utc::now();
        InboxActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(entry.user_id),
            org_id: Set(entry.org_id),
            user_by: Set(entry.user_by),
            event_type: Set(entry.event_type),
            title: Set(entry.title),
            message: Set(entry.message),
            reference_id: Set(entry.reference_id),
            is_read: Set(false),
            is_archived: Set(false),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find(
        &self,
        inbox_id: Uuid,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<InboxModel, RepositoryError> {
        Self::scoped(user_id, org_id)
            .filter(inbox::Column::Id.eq(inbox_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Inbox"))
    }

    /// Newest first; archived rows only when `include_archived`.
    pub async fn list(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        include_archived: bool,
        page: Page,
    ) -> Result<(Vec<InboxModel>, u64), RepositoryError> {
        let mut query = Self::scoped(user_id, org_id);
        if !include_archived {
            query = query.filter(inbox::Column::IsArchived.eq(false));
        }
        let query = query.order_by_desc(inbox::Column::CreatedAt);

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

    /// Unread and not archived.
    pub async fn unread_count(&self, user_id: Uuid, org_id: Uuid) -> Result<u64, RepositoryError> {
        Self::scoped(user_id, org_id)
            .filter(inbox::Column::IsRead.eq(false))
            .filter(inbox::Column::IsArchived.eq(false))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn mark_read(
        &self,
        inbox_id: Uuid,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<InboxModel, RepositoryError> {
        let mut active = self.find(inbox_id, user_id, org_id).await?.into_active_model();
        active.is_read = Set(true);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_archived(
        &self,
        inbox_id: Uuid,
        user_id: Uuid,
        org_id: Uuid,
        archived: bool,
    ) -> Result<InboxModel, RepositoryError> {
        let mut active = self.find(inbox_id, user_id, org_id).await?.into_active_model();
        active.is_archived = Set(archived);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(
        &self,
        inbox_id: Uuid,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let result = Inbox::delete_many()
            .filter(inbox::Column::Id.eq(inbox_id))
            .filter(inbox::Column::UserId.eq(user_id))
            .filter(inbox::Column::OrgId.eq(org_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Inbox"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org, setup_db};

    fn entry(user_id: Uuid, org_id: Uuid, title: &str) -> NewInboxEntry {
        NewInboxEntry {
            user_id,
            org_id,
            user_by: Uuid::new_v4(),
            event_type: InboxEventType::TaskAssigned,
            title: title.to_string(),
            message: format!("{title} message"),
            reference_id: None,
        }
    }

    #[tokio::test]
    async fn unread_count_ignores_read_and_archived() {
        let db = setup_db().await;
        let user = Uuid::new_v4();
        let org = seed_org(&db, "Acme", user).await;
        let repo = InboxRepository::new(&db);

        let first = repo.create(entry(user, org.id, "one")).await.unwrap();
        let second = repo.create(entry(user, org.id, "two")).await.unwrap();
        repo.create(entry(user, org.id, "three")).await.unwrap();
        repo.create(entry(Uuid::new_v4(), org.id, "someone else"))
            .await
            .unwrap();

        assert_eq!(repo.unread_count(user, org.id).await.unwrap(), 3);
        repo.mark_read(first.id, user, org.id).await.unwrap();
        repo.set_archived(second.id, user, org.id, true).await.unwrap();
        assert_eq!(repo.unread_count(user, org.id).await.unwrap(), 1);

        let (visible, total) = repo
            .list(user, org.id, false, Page::new(0, 50))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(visible.iter().all(|row| !row.is_archived));

        let (everything, _) = repo
            .list(user, org.id, true, Page::new(0, 50))
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn rows_are_invisible_to_other_users() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        let repo = InboxRepository::new(&db);
        let row = repo.create(entry(owner, org.id, "private")).await.unwrap();

        assert!(matches!(
            repo.find(row.id, intruder, org.id).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete(row.id, intruder, org.id).await,
            Err(RepositoryError::NotFound(_))
        ));
        repo.delete(row.id, owner, org.id).await.unwrap();
    }
}
