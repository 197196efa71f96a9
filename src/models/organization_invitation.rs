//! Organization invitation entity model

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::organization_member::OrganizationRole;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "organization_invitations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub org_id: Uuid,

    pub email: String,

    /// Opaque single-use token mailed to the invitee
    #[sea_orm(unique)]
    #[serde(skip_serializing)]
    pub token: String,

    /// Role granted on acceptance
    pub role: OrganizationRole,

    pub invited_by: Uuid,

    pub expires_at: DateTimeWithTimeZone,

    pub accepted_at: Option<DateTimeWithTimeZone>,

    /// Projects the invitee joins on acceptance, stored as a JSON array of ids
    pub project_ids: Option<Json>,

    /// Set when a newer invitation for the same email supersedes this one
    pub invalidated_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
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

impl Model {
    /// Project ids carried by the invitation; malformed entries are skipped.
    pub fn invited_projects(&self) -> Vec<Uuid> {
        self.project_ids
            .as_ref()
            .and_then(|ids| ids.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().and_then(|id| Uuid::parse_str(id).ok()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ActiveModelBehavior for ActiveModel {}
