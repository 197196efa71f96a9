//! # Task Repository
//!
//! Tasks, subtasks and their comment threads.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, Func},
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::task::{self, ActiveModel as TaskActiveModel, Model as TaskModel, TaskStatus};
use crate::models::task_comment::{
    self, ActiveModel as CommentActiveModel, Model as CommentModel,
};
use crate::models::{Task, TaskComment};

/// Fields accepted when creating a task or subtask.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub content: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
}

/// Detail changes; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Filters shared by the task and subtask listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub created_by: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub search: Option<String>,
}

impl TaskFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(created_by) = self.created_by {
            condition = condition.add(task::Column::CreatedBy.eq(created_by));
        }
        if let Some(assignee_id) = self.assignee_id {
            condition = condition.add(task::Column::AssigneeId.eq(assignee_id));
        }
        if let Some(status) = self.status {
            condition = condition.add(task::Column::Status.eq(status));
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            condition = condition.add(
                Expr::expr(Func::lower(Expr::col(task::Column::Title)))
                    .like(format!("%{}%", term.to_lowercase())),
            );
        }
        condition
    }
}

/// Repository for tasks and task comments
pub struct TaskRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TaskRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: NewTask) -> Result<TaskModel, RepositoryError> {
        let now = Utc::now();
        TaskActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(request.project_id),
            parent_id: Set(request.parent_id),
            title: Set(request.title),
            content: Set(request.content),
            status: Set(request.status),
            due_date: Set(request.due_date.map(Into::into)),
            assignee_id: Set(request.assignee_id),
            created_by: Set(request.created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find(&self, task_id: Uuid) -> Result<TaskModel, RepositoryError> {
        Task::find_by_id(task_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Task"))
    }

    /// Parent of a task; `None` for top-level or unknown tasks.
    pub async fn parent_of(&self, task_id: Uuid) -> Result<Option<Uuid>, RepositoryError> {
        let parent = Task::find_by_id(task_id)
            .select_only()
            .column(task::Column::ParentId)
            .into_tuple::<Option<Uuid>>()
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(parent.flatten())
    }

    /// Top-level tasks of a project matching `filter`, oldest first.
    pub async fn list_for_project(
        &self,
        project_id: Uuid,
        filter: &TaskFilter,
        page: Page,
    ) -> Result<(Vec<TaskModel>, u64), RepositoryError> {
        let query = Task::find()
            .filter(task::Column::ProjectId.eq(project_id))
            .filter(task::Column::ParentId.is_null())
            .filter(filter.condition())
            .order_by_asc(task::Column::CreatedAt);

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

    /// Direct children of a task matching `filter`, oldest first.
    pub async fn list_subtasks(
        &self,
        parent_id: Uuid,
        filter: &TaskFilter,
        page: Page,
    ) -> Result<(Vec<TaskModel>, u64), RepositoryError> {
        let query = Task::find()
            .filter(task::Column::ParentId.eq(parent_id))
            .filter(filter.condition())
            .order_by_asc(task::Column::CreatedAt);

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

    pub async fn subtasks(&self, parent_id: Uuid) -> Result<Vec<TaskModel>, RepositoryError> {
        Task::find()
            .filter(task::Column::ParentId.eq(parent_id))
            .order_by_asc(task::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Every top-level task of a project (input for the project summary).
    pub async fn top_level_tasks(&self, project_id: Uuid) -> Result<Vec<TaskModel>, RepositoryError> {
        Task::find()
            .filter(task::Column::ProjectId.eq(project_id))
            .filter(task::Column::ParentId.is_null())
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn update_details(
        &self,
        task_id: Uuid,
        changes: TaskChanges,
    ) -> Result<TaskModel, RepositoryError> {
        let mut active = self.find(task_id).await?.into_active_model();
        if let Some(title) = changes.title {
            active.title = Set(title);
        }
        if let Some(content) = changes.content {
            active.content = Set(Some(content));
        }
        if let Some(due_date) = changes.due_date {
            active.due_date = Set(Some(due_date.into()));
        }
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<TaskModel, RepositoryError> {
        let mut active = self.find(task_id).await?.into_active_model();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_assignee(
        &self,
        task_id: Uuid,
        assignee_id: Option<Uuid>,
    ) -> Result<TaskModel, RepositoryError> {
        let mut active = self.find(task_id).await?.into_active_model();
        active.assignee_id = Set(assignee_id);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Deletes the task; subtasks and comments cascade.
    pub async fn delete(&self, task_id: Uuid) -> Result<(), RepositoryError> {
        let result = Task::delete_by_id(task_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Task"));
        }
        Ok(())
    }

    pub async fn create_comment(
        &self,
        task_id: Uuid,
        parent_id: Option<Uuid>,
        content: String,
        author: Uuid,
    ) -> Result<CommentModel, RepositoryError> {
        let now = Utc::now();
        CommentActiveModel {
            id: Set(Uuid::new_v4()),
            task_id: Set(task_id),
            parent_id: Set(parent_id),
            content: Set(content),
            created_by: Set(author),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find_comment(&self, comment_id: Uuid) -> Result<CommentModel, RepositoryError> {
        TaskComment::find_by_id(comment_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Comment"))
    }

    pub async fn comment_parent_of(
        &self,
        comment_id: Uuid,
    ) -> Result<Option<Uuid>, RepositoryError> {
        let parent = TaskComment::find_by_id(comment_id)
            .select_only()
            .column(task_comment::Column::ParentId)
            .into_tuple::<Option<Uuid>>()
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(parent.flatten())
    }

    pub async fn update_comment(
        &self,
        comment_id: Uuid,
        content: String,
    ) -> Result<CommentModel, RepositoryError> {
        let mut active = self.find_comment(comment_id).await?.into_active_model();
        active.content = Set(content);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Deletes the comment; replies cascade.
    pub async fn delete_comment(&self, comment_id: Uuid) -> Result<(), RepositoryError> {
        let result = TaskComment::delete_by_id(comment_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Comment"));
        }
        Ok(())
    }

    /// Page of top-level comments, oldest first.
    pub async fn top_level_comments(
        &self,
        task_id: Uuid,
        page: Page,
    ) -> Result<(Vec<CommentModel>, u64), RepositoryError> {
        let query = TaskComment::find()
            .filter(task_comment::Column::TaskId.eq(task_id))
            .filter(task_comment::Column::ParentId.is_null())
            .order_by_asc(task_comment::Column::CreatedAt);

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

    /// Every reply on a task, oldest first; the caller assembles the tree.
    pub async fn replies_for_task(&self, task_id: Uuid) -> Result<Vec<CommentModel>, RepositoryError> {
        TaskComment::find()
            .filter(task_comment::Column::TaskId.eq(task_id))
            .filter(task_comment::Column::ParentId.is_not_null())
            .order_by_asc(task_comment::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
