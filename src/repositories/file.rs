//! # File Repository
//!
//! Metadata rows for objects kept in the storage bucket.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::StoredFile;
use crate::models::file::{self, ActiveModel as FileActiveModel, Model as FileModel};

/// A file row about to be inserted. The id is chosen by the caller because
/// the object key is derived from it.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub storage_key: String,
    pub uploaded_by: Uuid,
}

/// Repository for stored file metadata
pub struct FileRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> FileRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: NewFile) -> Result<FileModel, RepositoryError> {
        let now = Utc::now();
        FileActiveModel {
            id: Set(request.id),
            org_id: Set(request.org_id),
            project_id: Set(request.project_id),
            task_id: Set(request.task_id),
            name: Set(request.name),
            size_bytes: Set(request.size_bytes),
            content_type: Set(request.content_type),
            storage_key: Set(request.storage_key),
            uploaded_by: Set(request.uploaded_by),
            is_deleted: Set(false),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find(&self, file_id: Uuid) -> Result<FileModel, RepositoryError> {
        StoredFile::find_by_id(file_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("File"))
    }

    /// Files of an organization, newest first. `uploaded_by` narrows the
    /// listing to one uploader.
    pub async fn list(
        &self,
        org_id: Uuid,
        uploaded_by: Option<Uuid>,
        is_deleted: bool,
        page: Page,
    ) -> Result<(Vec<FileModel>, u64), RepositoryError> {
        let mut query = StoredFile::find()
            .filter(file::Column::OrgId.eq(org_id))
            .filter(file::Column::IsDeleted.eq(is_deleted));
        if let Some(user_id) = uploaded_by {
            query = query.filter(file::Column::UploadedBy.eq(user_id));
        }
        let query = query.order_by_desc(file::Column::CreatedAt);

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

    pub async fn set_deleted(
        &self,
        file_id: Uuid,
        is_deleted: bool,
    ) -> Result<FileModel, RepositoryError> {
        let mut active = self.find(file_id).await?.into_active_model();
        active.is_deleted = Set(is_deleted);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, file_id: Uuid) -> Result<(), RepositoryError> {
        let result = StoredFile::delete_by_id(file_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("File"));
        }
        Ok(())
    }

    /// Object keys of every file in the organization, deleted or not.
    pub async fn storage_keys_for_org(&self, org_id: Uuid) -> Result<Vec<String>, RepositoryError> {
        StoredFile::find()
            .select_only()
            .column(file::Column::StorageKey)
            .filter(file::Column::OrgId.eq(org_id))
            .into_tuple::<String>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
