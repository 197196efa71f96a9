//! # Project Repository
//!
//! Projects within an organization, project memberships and favourites.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
    sea_query::{Expr, Func},
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::error::is_unique_violation;
use crate::models::favourite_project::{self, ActiveModel as FavouriteActiveModel};
use crate::models::project::{self, ActiveModel as ProjectActiveModel, Model as ProjectModel, ProjectView};
use crate::models::project_member::{
    self, ActiveModel as ProjectMemberActiveModel, Model as ProjectMemberModel, ProjectRole,
};
use crate::models::{FavouriteProject, Project, ProjectMember};

/// Sort order accepted by the project listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectOrder {
    AlphabeticalAsc,
    AlphabeticalDesc,
    CreatedAsc,
    #[default]
    CreatedDesc,
}

/// Fields accepted when creating a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub avatar_color: String,
    pub avatar_icon: String,
    pub start_date: chrono::NaiveDate,
    pub end_date: Option<chrono::NaiveDate>,
    pub view: ProjectView,
}

/// Repository for projects
pub struct ProjectRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ProjectRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Case-insensitive name check within one organization.
    pub async fn name_exists(&self, org_id: Uuid, name: &str) -> Result<bool, RepositoryError> {
        let count = Project::find()
            .filter(project::Column::OrgId.eq(org_id))
            .filter(
                Expr::expr(Func::lower(Expr::col(project::Column::Name)))
                    .eq(name.trim().to_lowercase()),
            )
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(count > 0)
    }

    /// Creates the project and registers the creator as its owner.
    pub async fn create_with_owner(
        &self,
        org_id: Uuid,
        request: NewProject,
        creator: Uuid,
    ) -> Result<ProjectModel, RepositoryError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;
        let now = Utc::now();

        let project = ProjectActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(org_id),
            name: Set(request.name),
            avatar_color: Set(Some(request.avatar_color)),
            avatar_icon: Set(Some(request.avatar_icon)),
            avatar_file_id: Set(None),
            start_date: Set(request.start_date),
            end_date: Set(request.end_date),
            view: Set(request.view),
            progress_percentage: Set(0),
            archived: Set(false),
            created_by: Set(creator),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(RepositoryError::database_error)?;

        ProjectMemberActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project.id),
            user_id: Set(creator),
            role: Set(ProjectRole::Owner),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(RepositoryError::database_error)?;

        txn.commit().await.map_err(RepositoryError::database_error)?;
        Ok(project)
    }

    pub async fn find(&self, project_id: Uuid) -> Result<ProjectModel, RepositoryError> {
        Project::find_by_id(project_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Project"))
    }

    /// Finds a project, hiding projects that belong to another organization.
    pub async fn find_in_org(
        &self,
        org_id: Uuid,
        project_id: Uuid,
    ) -> Result<ProjectModel, RepositoryError> {
        let project = self.find(project_id).await?;
        if project.org_id != org_id {
            return Err(RepositoryError::not_found("Project"));
        }
        Ok(project)
    }

    async fn member_project_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        ProjectMember::find()
            .select_only()
            .column(project_member::Column::ProjectId)
            .filter(project_member::Column::UserId.eq(user_id))
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn favourite_project_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        FavouriteProject::find()
            .select_only()
            .column(favourite_project::Column::ProjectId)
            .filter(favourite_project::Column::UserId.eq(user_id))
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    fn active_in_org(org_id: Uuid) -> Select<Project> {
        Project::find()
            .filter(project::Column::OrgId.eq(org_id))
            .filter(project::Column::Archived.eq(false))
    }

    /// Non-archived projects the user is a member of.
    pub async fn list_member_projects(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        search: Option<&str>,
        order: ProjectOrder,
        page: Page,
    ) -> Result<(Vec<ProjectModel>, u64), RepositoryError> {
        let ids = self.member_project_ids(user_id).await?;
        let mut query = Self::active_in_org(org_id).filter(project::Column::Id.is_in(ids));

        if let Some(term) = search.map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Expr::expr(Func::lower(Expr::col(project::Column::Name)))
                    .like(format!("%{}%", term.to_lowercase())),
            );
        }

        query = match order {
            ProjectOrder::AlphabeticalAsc => query.order_by_asc(project::Column::Name),
            ProjectOrder::AlphabeticalDesc => query.order_by_desc(project::Column::Name),
            ProjectOrder::CreatedAsc => query.order_by_asc(project::Column::CreatedAt),
            ProjectOrder::CreatedDesc => query.order_by_desc(project::Column::CreatedAt),
        };

        self.paged(query, page).await
    }

    /// Non-archived favourites of the user inside the organization.
    pub async fn list_favourites(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ProjectModel>, RepositoryError> {
        let ids = self.favourite_project_ids(user_id).await?;
        Self::active_in_org(org_id)
            .filter(project::Column::Id.is_in(ids))
            .order_by_asc(project::Column::Name)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Non-archived projects of the organization the user has not joined.
    pub async fn list_non_member_projects(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        page: Page,
    ) -> Result<(Vec<ProjectModel>, u64), RepositoryError> {
        let ids = self.member_project_ids(user_id).await?;
        let query = Self::active_in_org(org_id)
            .filter(project::Column::Id.is_not_in(ids))
            .order_by_asc(project::Column::Name);
        self.paged(query, page).await
    }

    pub async fn count_non_member_projects(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let ids = self.member_project_ids(user_id).await?;
        Self::active_in_org(org_id)
            .filter(project::Column::Id.is_not_in(ids))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_archived(
        &self,
        org_id: Uuid,
        page: Page,
    ) -> Result<(Vec<ProjectModel>, u64), RepositoryError> {
        let query = Project::find()
            .filter(project::Column::OrgId.eq(org_id))
            .filter(project::Column::Archived.eq(true))
            .order_by_desc(project::Column::UpdatedAt);
        self.paged(query, page).await
    }

    async fn paged(
        &self,
        query: Select<Project>,
        page: Page,
    ) -> Result<(Vec<ProjectModel>, u64), RepositoryError> {
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

    pub async fn set_archived(
        &self,
        project_id: Uuid,
        archived: bool,
    ) -> Result<ProjectModel, RepositoryError> {
        let mut active = self.find(project_id).await?.into_active_model();
        active.archived = Set(archived);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_avatar(
        &self,
        project_id: Uuid,
        file_id: Uuid,
    ) -> Result<ProjectModel, RepositoryError> {
        let mut active = self.find(project_id).await?.into_active_model();
        active.avatar_file_id = Set(Some(file_id));
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn is_favourite(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, RepositoryError> {
        let count = FavouriteProject::find()
            .filter(favourite_project::Column::ProjectId.eq(project_id))
            .filter(favourite_project::Column::UserId.eq(user_id))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(count > 0)
    }

    /// Flips the favourite marker and returns the new state.
    pub async fn toggle_favourite(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        if self.is_favourite(project_id, user_id).await? {
            FavouriteProject::delete_many()
                .filter(favourite_project::Column::ProjectId.eq(project_id))
                .filter(favourite_project::Column::UserId.eq(user_id))
                .exec(self.db)
                .await
                .map_err(RepositoryError::database_error)?;
            return Ok(false);
        }

        FavouriteActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            user_id: Set(user_id),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)?;
        Ok(true)
    }

    pub async fn membership(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectMemberModel>, RepositoryError> {
        ProjectMember::find()
            .filter(project_member::Column::ProjectId.eq(project_id))
            .filter(project_member::Column::UserId.eq(user_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn members(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectMemberModel>, RepositoryError> {
        ProjectMember::find()
            .filter(project_member::Column::ProjectId.eq(project_id))
            .order_by_asc(project_member::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn add_member(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<ProjectMemberModel, RepositoryError> {
        if self.membership(project_id, user_id).await?.is_some() {
            return Err(RepositoryError::Conflict(
                "User is already a member of this project".to_string(),
            ));
        }
        let now = Utc::now();
        ProjectMemberActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            user_id: Set(user_id),
            role: Set(role),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict("User is already a member of this project".into())
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    /// Adds the member unless already present; `true` when a row was inserted.
    pub async fn ensure_member(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<bool, RepositoryError> {
        match self.add_member(project_id, user_id, role).await {
            Ok(_) => Ok(true),
            Err(RepositoryError::Conflict(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Ids of every project in the organization, archived ones included.
    pub async fn ids_in_org(&self, org_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        Project::find()
            .select_only()
            .column(project::Column::Id)
            .filter(project::Column::OrgId.eq(org_id))
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Drops the user from every project of the organization.
    pub async fn remove_member_from_org(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let project_ids = self.ids_in_org(org_id).await?;
        if project_ids.is_empty() {
            return Ok(0);
        }
        let result = ProjectMember::delete_many()
            .filter(project_member::Column::UserId.eq(user_id))
            .filter(project_member::Column::ProjectId.is_in(project_ids))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    pub async fn delete(&self, project_id: Uuid) -> Result<(), RepositoryError> {
        let result = Project::delete_by_id(project_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Project"));
        }
        Ok(())
    }
}
