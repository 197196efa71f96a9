//! Inbox entity model
//!
//! One row per notification delivered to a user within an organization.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inbox")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Recipient
    pub user_id: Uuid,

    pub org_id: Uuid,

    /// Actor that caused the notification
    pub user_by: Uuid,

    pub event_type: InboxEventType,

    pub title: String,

    pub message: String,

    /// Id of the task, project or organization the event is about
    pub reference_id: Option<Uuid>,

    pub is_read: bool,

    pub is_archived: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum InboxEventType {
    #[sea_orm(string_value = "organization_invitation")]
    OrganizationInvitation,
    #[sea_orm(string_value = "task_assigned")]
    TaskAssigned,
    #[sea_orm(string_value = "task_unassigned")]
    TaskUnassigned,
    #[sea_orm(string_value = "direct_message")]
    DirectMessage,
    #[sea_orm(string_value = "task_completed")]
    TaskCompleted,
    #[sea_orm(string_value = "project_member_added")]
    ProjectMemberAdded,
}

impl InboxEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            InboxEventType::OrganizationInvitation => "organization_invitation",
            InboxEventType::TaskAssigned => "task_assigned",
            InboxEventType::TaskUnassigned => "task_unassigned",
            InboxEventType::DirectMessage => "direct_message",
            InboxEventType::TaskCompleted => "task_completed",
            InboxEventType::ProjectMemberAdded => "project_member_added",
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrgId",
        to = "super::organization::Column::Id",
        on_delete = "Cascade"
    )]
    Organization,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
