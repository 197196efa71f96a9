//! Stored file entity model
//!
//! Metadata for an object in the storage bucket. The object key is
//! `storage_key`; deleting a row does not by itself remove the object.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub org_id: Uuid,

    pub project_id: Option<Uuid>,

    pub task_id: Option<Uuid>,

    /// Original client file name
    pub name: String,

    pub size_bytes: i64,

    pub content_type: String,

    pub storage_key: String,

    pub uploaded_by: Uuid,

    /// Soft-delete flag; the object stays in the bucket until permanent deletion
    pub is_deleted: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
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
