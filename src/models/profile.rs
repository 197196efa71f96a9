//! Profile entity model
//!
//! Display data and notification preferences for a user. Users are identified
//! by the `sub` claim of their access token; the profile row is created lazily.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,

    pub email: Option<String>,

    pub display_name: Option<String>,

    pub avatar_file_id: Option<Uuid>,

    /// IANA zone name used to render relative timestamps
    pub timezone: String,

    pub email_notifications: bool,

    pub browser_notifications: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Name shown to other users: display name, then email, then a generic label.
    pub fn visible_name(&self) -> String {
        self.display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "Unknown user".to_string())
    }
}
