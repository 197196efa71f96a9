//! # Task Attachment Repository
//!
//! Attachments reference rows of the files table; listing joins them so
//! callers get the file metadata in one query.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::error::is_unique_violation;
use crate::models::file::Model as FileModel;
use crate::models::task_attachment::{
    self, ActiveModel as AttachmentActiveModel, Model as AttachmentModel,
};
use crate::models::{StoredFile, TaskAttachment};

pub struct AttachmentRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> AttachmentRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        task_id: Uuid,
        file_id: Uuid,
        created_by: Uuid,
    ) -> Result<AttachmentModel, RepositoryError> {
        AttachmentActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            file_id: Set(file_id),
            created_by: Set(created_by),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict("File already attached".into())
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    /// The attachment together with its file row.
    pub async fn find(
        &self,
        attachment_id: Uuid,
    ) -> Result<(AttachmentModel, FileModel), RepositoryError> {
        let (attachment, file) = TaskAttachment::find_by_id(attachment_id)
            .find_also_related(StoredFile)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Attachment"))?;
        let file = file.ok_or_else(|| RepositoryError::not_found("Attachment"))?;
        Ok((attachment, file))
    }

    /// Attachments of a task with their files, newest first.
    pub async fn list(
        &self,
        task_id: Uuid,
        page: Page,
    ) -> Result<(Vec<(AttachmentModel, FileModel)>, u64), RepositoryError> {
        let query =
            TaskAttachment::find().filter(task_attachment::Column::TaskId.eq(task_id));
        let total = query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let rows = query
            .find_also_related(StoredFile)
            .order_by_desc(task_attachment::Column::CreatedAt)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok((
            rows.into_iter()
                .filter_map(|(attachment, file)| file.map(|file| (attachment, file)))
                .collect(),
            total,
        ))
    }

    pub async fn delete(&self, attachment_id: Uuid) -> Result<(), RepositoryError> {
        let result = TaskAttachment::delete_by_id(attachment_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Attachment"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::FileRepository;
    use crate::repositories::file::NewFile;
    use crate::test_support::{seed_org, seed_project, seed_task, setup_db};

    #[tokio::test]
    async fn a_file_attaches_to_a_task_once() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        let project = seed_project(&db, org.id, "Apollo", owner).await;
        let task = seed_task(&db, project.id, "Ship", owner).await;
        let file_id = Uuid::new_v4();
        FileRepository::new(&db)
            .create(NewFile {
                id: file_id,
                org_id: org.id,
                project_id: Some(project.id),
                task_id: None,
                name: "plan.pdf".into(),
                size_bytes: 42,
                content_type: "application/pdf".into(),
                storage_key: format!("{file_id}.pdf"),
                uploaded_by: owner,
            })
            .await
            .unwrap();
        let repo = AttachmentRepository::new(&db);

        let attachment = repo.create(task.id, file_id, owner).await.unwrap();
        assert!(matches!(
            repo.create(task.id, file_id, owner).await,
            Err(RepositoryError::Conflict(_))
        ));

        let (rows, total) = repo.list(task.id, Page::new(0, 10)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].1.name, "plan.pdf");

        let (found, file) = repo.find(attachment.id).await.unwrap();
        assert_eq!(found.task_id, task.id);
        assert_eq!(file.size_bytes, 42);

        repo.delete(attachment.id).await.unwrap();
        assert!(matches!(
            repo.find(attachment.id).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
