//! # Profile Repository
//!
//! Lazily-created user profiles and the preference lookups used by notifications.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use uuid::Uuid;

use super::RepositoryError;
use crate::models::profile::{self, ActiveModel as ProfileActiveModel, Model as ProfileModel};
use crate::models::Profile;

/// Partial update applied by `PATCH /auth/me`.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications: Option<bool>,
    pub browser_notifications: Option<bool>,
}

/// Repository for profile rows
pub struct ProfileRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ProfileRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, user_id: Uuid) -> Result<Option<ProfileModel>, RepositoryError> {
        Profile::find_by_id(user_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Returns the caller's profile, creating a default one on first sight.
    /// A known email is backfilled when the stored row has none.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<ProfileModel, RepositoryError> {
        if let Some(existing) = self.find(user_id).await? {
            if existing.email.is_none()
                && let Some(email) = email
            {
                let mut active = existing.into_active_model();
                active.email = Set(Some(email.to_lowercase()));
                active.updated_at = Set(Utc::now().into());
                return active
                    .update(self.db)
                    .await
                    .map_err(RepositoryError::database_error);
            }
            return Ok(existing);
        }

        let now = Utc::now();
        ProfileActiveModel {
            user_id: Set(user_id),
            email: Set(email.map(str::to_lowercase)),
            display_name: Set(None),
            avatar_file_id: Set(None),
            timezone: Set("UTC".to_string()),
            email_notifications: Set(true),
            browser_notifications: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        changes: ProfileChanges,
    ) -> Result<ProfileModel, RepositoryError> {
        let existing = self
            .find(user_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Profile"))?;

        let mut active = existing.into_active_model();
        if let Some(display_name) = changes.display_name {
            active.display_name = Set(Some(display_name));
        }
        if let Some(timezone) = changes.timezone {
            active.timezone = Set(timezone);
        }
        if let Some(flag) = changes.email_notifications {
            active.email_notifications = Set(flag);
        }
        if let Some(flag) = changes.browser_notifications {
            active.browser_notifications = Set(flag);
        }
        active.updated_at = Set(Utc::now().into());

        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<ProfileModel>, RepositoryError> {
        Profile::find()
            .filter(profile::Column::Email.eq(email.to_lowercase()))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Loads many profiles at once, keyed by user id.
    pub async fn find_many(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ProfileModel>, RepositoryError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = Profile::find()
            .filter(profile::Column::UserId.is_in(user_ids.iter().copied()))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(rows.into_iter().map(|row| (row.user_id, row)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_backfills_email() {
        let db = setup_db().await;
        let repo = ProfileRepository::new(&db);
        let user_id = Uuid::new_v4();

        let created = repo.get_or_create(user_id, None).await.unwrap();
        assert_eq!(created.timezone, "UTC");
        assert!(created.email_notifications);
        assert!(created.browser_notifications);

        let again = repo
            .get_or_create(user_id, Some("dev@example.com"))
            .await
            .unwrap();
        assert_eq!(again.email.as_deref(), Some("dev@example.com"));
        assert_eq!(again.created_at, created.created_at);
    }

    #[tokio::test]
    async fn update_applies_only_provided_fields() {
        let db = setup_db().await;
        let repo = ProfileRepository::new(&db);
        let user_id = Uuid::new_v4();
        repo.get_or_create(user_id, Some("a@example.com"))
            .await
            .unwrap();

        let updated = repo
            .update(
                user_id,
                ProfileChanges {
                    email_notifications: Some(false),
                    timezone: Some("Europe/Berlin".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!updated.email_notifications);
        assert!(updated.browser_notifications);
        assert_eq!(updated.timezone, "Europe/Berlin");
        assert_eq!(updated.display_name, None);
    }

    #[tokio::test]
    async fn update_missing_profile_is_not_found() {
        let db = setup_db().await;
        let err = ProfileRepository::new(&db)
            .update(Uuid::new_v4(), ProfileChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
