//! # Organization Repository
//!
//! Organizations, their memberships (including the per-user "active"
//! organization) and pending invitations.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::Expr,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::error::is_unique_violation;
use crate::models::organization::{
    self, ActiveModel as OrganizationActiveModel, Model as OrganizationModel,
};
use crate::models::organization_invitation::{
    self, ActiveModel as InvitationActiveModel, Model as InvitationModel,
};
use crate::models::organization_member::{
    self, ActiveModel as MemberActiveModel, Model as MemberModel, OrganizationRole,
};
use crate::models::{Organization, OrganizationInvitation, OrganizationMember};

const NAME_TAKEN: &str = "Organization name already taken";

/// Fields accepted when creating an organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub description: Option<String>,
    pub avatar_color: String,
    pub avatar_icon: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_color: Option<String>,
    pub avatar_icon: Option<String>,
}

/// Fields of an invitation about to be mailed.
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub org_id: Uuid,
    pub email: String,
    pub role: OrganizationRole,
    pub invited_by: Uuid,
    pub token: String,
    pub ttl_hours: i64,
    /// Projects joined on acceptance
    pub project_ids: Vec<Uuid>,
}

/// Repository for organizations and memberships
pub struct OrganizationRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> OrganizationRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates the organization and makes the creator its active owner.
    pub async fn create_with_owner(
        &self,
        request: NewOrganization,
        creator: Uuid,
    ) -> Result<OrganizationModel, RepositoryError> {
        if self.name_taken(&request.name, None).await? {
            return Err(RepositoryError::Conflict(NAME_TAKEN.to_string()));
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;
        let now = Utc::now();

        let org = OrganizationActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            avatar_color: Set(Some(request.avatar_color)),
            avatar_icon: Set(Some(request.avatar_icon)),
            avatar_file_id: Set(None),
            created_by: Set(creator),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(map_name_conflict)?;

        OrganizationMember::update_many()
            .col_expr(organization_member::Column::Active, Expr::value(false))
            .filter(organization_member::Column::UserId.eq(creator))
            .exec(&txn)
            .await
            .map_err(RepositoryError::database_error)?;

        MemberActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(org.id),
            user_id: Set(creator),
            role: Set(OrganizationRole::Owner),
            active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(RepositoryError::database_error)?;

        txn.commit().await.map_err(RepositoryError::database_error)?;
        Ok(org)
    }

    /// True when another organization already uses `name`.
    pub async fn name_taken(
        &self,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, RepositoryError> {
        let mut query = Organization::find().filter(organization::Column::Name.eq(name));
        if let Some(id) = exclude {
            query = query.filter(organization::Column::Id.ne(id));
        }
        let count = query
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(count > 0)
    }

    pub async fn find(&self, org_id: Uuid) -> Result<OrganizationModel, RepositoryError> {
        Organization::find_by_id(org_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Organization"))
    }

    /// Organizations the user belongs to, oldest membership first.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<(Vec<OrganizationModel>, u64), RepositoryError> {
        let memberships = OrganizationMember::find()
            .filter(organization_member::Column::UserId.eq(user_id))
            .order_by_asc(organization_member::Column::CreatedAt);

        let total = memberships
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let rows = memberships
            .offset(page.offset)
            .limit(page.limit)
            .find_also_related(Organization)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok((rows.into_iter().filter_map(|(_, org)| org).collect(), total))
    }

    pub async fn update(
        &self,
        org_id: Uuid,
        changes: OrganizationChanges,
    ) -> Result<OrganizationModel, RepositoryError> {
        let org = self.find(org_id).await?;
        if let Some(name) = &changes.name
            && self.name_taken(name, Some(org_id)).await?
        {
            return Err(RepositoryError::Conflict(NAME_TAKEN.to_string()));
        }

        let mut active = org.into_active_model();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(Some(description));
        }
        if let Some(color) = changes.avatar_color {
            active.avatar_color = Set(Some(color));
        }
        if let Some(icon) = changes.avatar_icon {
            active.avatar_icon = Set(Some(icon));
        }
        active.updated_at = Set(Utc::now().into());

        active.update(self.db).await.map_err(map_name_conflict)
    }

    pub async fn set_avatar(
        &self,
        org_id: Uuid,
        file_id: Uuid,
    ) -> Result<OrganizationModel, RepositoryError> {
        let mut active = self.find(org_id).await?.into_active_model();
        active.avatar_file_id = Set(Some(file_id));
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Deletes the organization; dependent rows go with it through cascades.
    pub async fn delete(&self, org_id: Uuid) -> Result<(), RepositoryError> {
        let result = Organization::delete_by_id(org_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Organization"));
        }
        Ok(())
    }

    pub async fn membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MemberModel>, RepositoryError> {
        OrganizationMember::find()
            .filter(organization_member::Column::OrgId.eq(org_id))
            .filter(organization_member::Column::UserId.eq(user_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn active_membership(
        &self,
        user_id: Uuid,
    ) -> Result<Option<MemberModel>, RepositoryError> {
        OrganizationMember::find()
            .filter(organization_member::Column::UserId.eq(user_id))
            .filter(organization_member::Column::Active.eq(true))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Makes `org_id` the user's only active organization.
    pub async fn set_active(&self, org_id: Uuid, user_id: Uuid) -> Result<(), RepositoryError> {
        if self.membership(org_id, user_id).await?.is_none() {
            return Err(RepositoryError::not_found("Organization membership"));
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;
        OrganizationMember::update_many()
            .col_expr(organization_member::Column::Active, Expr::value(false))
            .filter(organization_member::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(RepositoryError::database_error)?;
        OrganizationMember::update_many()
            .col_expr(organization_member::Column::Active, Expr::value(true))
            .filter(organization_member::Column::UserId.eq(user_id))
            .filter(organization_member::Column::OrgId.eq(org_id))
            .exec(&txn)
            .await
            .map_err(RepositoryError::database_error)?;
        txn.commit().await.map_err(RepositoryError::database_error)
    }

    pub async fn deactivate_all(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        OrganizationMember::update_many()
            .col_expr(organization_member::Column::Active, Expr::value(false))
            .filter(organization_member::Column::UserId.eq(user_id))
            .filter(organization_member::Column::Active.eq(true))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    pub async fn members(&self, org_id: Uuid) -> Result<Vec<MemberModel>, RepositoryError> {
        OrganizationMember::find()
            .filter(organization_member::Column::OrgId.eq(org_id))
            .order_by_asc(organization_member::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Members holding `role`, or every member when `None`.
    pub async fn members_with_role(
        &self,
        org_id: Uuid,
        role: Option<OrganizationRole>,
    ) -> Result<Vec<MemberModel>, RepositoryError> {
        let mut query =
            OrganizationMember::find().filter(organization_member::Column::OrgId.eq(org_id));
        if let Some(role) = role {
            query = query.filter(organization_member::Column::Role.eq(role));
        }
        query
            .order_by_asc(organization_member::Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<MemberModel, RepositoryError> {
        let member = self
            .membership(org_id, user_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Member"))?;
        let mut active = member.into_active_model();
        active.role = Set(role);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn remove_member(&self, org_id: Uuid, user_id: Uuid) -> Result<(), RepositoryError> {
        let result = OrganizationMember::delete_many()
            .filter(organization_member::Column::OrgId.eq(org_id))
            .filter(organization_member::Column::UserId.eq(user_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Member"));
        }
        Ok(())
    }

    pub async fn add_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrganizationRole,
    ) -> Result<MemberModel, RepositoryError> {
        let now = Utc::now();
        MemberActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(org_id),
            user_id: Set(user_id),
            role: Set(role),
            active: Set(false),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict("User is already a member of this organization".into())
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    /// Stores a new invitation expiring `ttl_hours` from now.
    pub async fn create_invitation(
        &self,
        request: NewInvitation,
    ) -> Result<InvitationModel, RepositoryError> {
        let now = Utc::now();
        let project_ids = (!request.project_ids.is_empty()).then(|| {
            serde_json::Value::Array(
                request
                    .project_ids
                    .iter()
                    .map(|id| serde_json::Value::String(id.to_string()))
                    .collect(),
            )
        });
        InvitationActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(request.org_id),
            email: Set(request.email.to_lowercase()),
            token: Set(request.token),
            role: Set(request.role),
            invited_by: Set(request.invited_by),
            expires_at: Set((now + Duration::hours(request.ttl_hours)).into()),
            accepted_at: Set(None),
            project_ids: Set(project_ids),
            invalidated_at: Set(None),
            created_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Invalidates every open invitation for `email` in the organization.
    pub async fn invalidate_pending_invitations(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<u64, RepositoryError> {
        let result = OrganizationInvitation::update_many()
            .col_expr(
                organization_invitation::Column::InvalidatedAt,
                Expr::value(Some(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now()))),
            )
            .filter(organization_invitation::Column::OrgId.eq(org_id))
            .filter(organization_invitation::Column::Email.eq(email.to_lowercase()))
            .filter(organization_invitation::Column::AcceptedAt.is_null())
            .filter(organization_invitation::Column::InvalidatedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    /// Invitations of an organization, newest first, optionally narrowed by email.
    pub async fn list_invitations(
        &self,
        org_id: Uuid,
        search: Option<&str>,
        page: Page,
    ) -> Result<(Vec<InvitationModel>, u64), RepositoryError> {
        let mut query = OrganizationInvitation::find()
            .filter(organization_invitation::Column::OrgId.eq(org_id));
        if let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) {
            query = query.filter(
                organization_invitation::Column::Email.contains(term.to_lowercase()),
            );
        }

        let total = query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let rows = query
            .order_by_desc(organization_invitation::Column::CreatedAt)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok((rows, total))
    }

    pub async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<InvitationModel>, RepositoryError> {
        OrganizationInvitation::find()
            .filter(organization_invitation::Column::Token.eq(token))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn mark_invitation_accepted(
        &self,
        invitation: InvitationModel,
    ) -> Result<InvitationModel, RepositoryError> {
        let mut active = invitation.into_active_model();
        active.accepted_at = Set(Some(Utc::now().into()));
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

fn map_name_conflict(err: sea_orm::DbErr) -> RepositoryError {
    if is_unique_violation(&err) {
        RepositoryError::Conflict(NAME_TAKEN.to_string())
    } else {
        RepositoryError::database_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    fn new_org(name: &str) -> NewOrganization {
        NewOrganization {
            name: name.to_string(),
            description: None,
            avatar_color: "#123456".to_string(),
            avatar_icon: "rocket".to_string(),
        }
    }

    #[tokio::test]
    async fn creator_becomes_the_only_active_owner() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let user = Uuid::new_v4();

        let first = repo.create_with_owner(new_org("Acme"), user).await.unwrap();
        let second = repo.create_with_owner(new_org("Globex"), user).await.unwrap();

        let active = repo.active_membership(user).await.unwrap().unwrap();
        assert_eq!(active.org_id, second.id);
        assert_eq!(active.role, OrganizationRole::Owner);

        let first_membership = repo.membership(first.id, user).await.unwrap().unwrap();
        assert!(!first_membership.active);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        repo.create_with_owner(new_org("Acme"), Uuid::new_v4())
            .await
            .unwrap();

        let err = repo
            .create_with_owner(new_org("Acme"), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(msg) if msg == NAME_TAKEN));
    }

    #[tokio::test]
    async fn set_active_switches_and_deactivate_clears() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let owner = Uuid::new_v4();
        let user = Uuid::new_v4();

        let acme = repo.create_with_owner(new_org("Acme"), owner).await.unwrap();
        let globex = repo.create_with_owner(new_org("Globex"), owner).await.unwrap();
        repo.add_member(acme.id, user, OrganizationRole::Member)
            .await
            .unwrap();
        repo.add_member(globex.id, user, OrganizationRole::Admin)
            .await
            .unwrap();

        repo.set_active(acme.id, user).await.unwrap();
        assert_eq!(
            repo.active_membership(user).await.unwrap().unwrap().org_id,
            acme.id
        );

        repo.set_active(globex.id, user).await.unwrap();
        let active = repo.active_membership(user).await.unwrap().unwrap();
        assert_eq!(active.org_id, globex.id);
        assert_eq!(active.role, OrganizationRole::Admin);

        repo.deactivate_all(user).await.unwrap();
        assert!(repo.active_membership(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_for_user_pages_and_counts() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let user = Uuid::new_v4();
        for name in ["One", "Two", "Three"] {
            repo.create_with_owner(new_org(name), user).await.unwrap();
        }

        let (page, total) = repo.list_for_user(user, Page::new(1, 1)).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    fn invitation(org_id: Uuid, email: &str, invited_by: Uuid, token: &str) -> NewInvitation {
        NewInvitation {
            org_id,
            email: email.to_string(),
            role: OrganizationRole::Member,
            invited_by,
            token: token.to_string(),
            ttl_hours: 24,
            project_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn invitations_round_trip_by_token() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let owner = Uuid::new_v4();
        let org = repo.create_with_owner(new_org("Acme"), owner).await.unwrap();

        let project = Uuid::new_v4();
        let invitation = repo
            .create_invitation(NewInvitation {
                project_ids: vec![project],
                ..invitation(org.id, "New.Person@Example.com", owner, "tok-123")
            })
            .await
            .unwrap();
        assert_eq!(invitation.email, "new.person@example.com");
        assert_eq!(invitation.invited_projects(), vec![project]);

        let found = repo
            .find_invitation_by_token("tok-123")
            .await
            .unwrap()
            .unwrap();
        assert!(found.accepted_at.is_none());

        let accepted = repo.mark_invitation_accepted(found).await.unwrap();
        assert!(accepted.accepted_at.is_some());
    }

    #[tokio::test]
    async fn reinviting_invalidates_only_open_invitations() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let owner = Uuid::new_v4();
        let org = repo.create_with_owner(new_org("Acme"), owner).await.unwrap();

        let accepted = repo
            .create_invitation(invitation(org.id, "ada@example.com", owner, "tok-a"))
            .await
            .unwrap();
        repo.mark_invitation_accepted(accepted).await.unwrap();
        repo.create_invitation(invitation(org.id, "ADA@example.com", owner, "tok-b"))
            .await
            .unwrap();
        repo.create_invitation(invitation(org.id, "bob@example.com", owner, "tok-c"))
            .await
            .unwrap();

        let invalidated = repo
            .invalidate_pending_invitations(org.id, "Ada@Example.com")
            .await
            .unwrap();
        assert_eq!(invalidated, 1);

        let open = repo.find_invitation_by_token("tok-b").await.unwrap().unwrap();
        assert!(open.invalidated_at.is_some());
        let other = repo.find_invitation_by_token("tok-c").await.unwrap().unwrap();
        assert!(other.invalidated_at.is_none());

        let (rows, total) = repo
            .list_invitations(org.id, Some("ada"), Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|row| row.email == "ada@example.com"));
    }

    #[tokio::test]
    async fn roles_change_and_members_leave() {
        let db = setup_db().await;
        let repo = OrganizationRepository::new(&db);
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let org = repo.create_with_owner(new_org("Acme"), owner).await.unwrap();
        repo.add_member(org.id, member, OrganizationRole::Member)
            .await
            .unwrap();

        repo.set_role(org.id, member, OrganizationRole::Admin)
            .await
            .unwrap();
        let admins = repo
            .members_with_role(org.id, Some(OrganizationRole::Admin))
            .await
            .unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].user_id, member);

        repo.remove_member(org.id, member).await.unwrap();
        assert!(repo.membership(org.id, member).await.unwrap().is_none());
        assert!(matches!(
            repo.remove_member(org.id, member).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
