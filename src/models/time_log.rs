//! Time log entity model
//!
//! A running timer has no `stopped_at` and no `duration_seconds`. Stopped
//! logs always carry both.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "time_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    pub task_id: Option<Uuid>,

    /// Calendar day the work is booked on
    pub log_date: Date,

    pub started_at: DateTimeWithTimeZone,

    pub stopped_at: Option<DateTimeWithTimeZone>,

    pub duration_seconds: Option<i64>,

    pub notes: Option<String>,

    pub created_by: Uuid,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Derived from `stopped_at`; not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeLogStatus {
    Running,
    Stopped,
}

impl Model {
    pub fn status(&self) -> TimeLogStatus {
        if self.stopped_at.is_some() {
            TimeLogStatus::Stopped
        } else {
            TimeLogStatus::Running
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
    #[sea_orm(
        belongs_to = "super::task::Entity",
        from = "Column::TaskId",
        to = "super::task::Column::Id",
        on_delete = "SetNull"
    )]
    Task,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
