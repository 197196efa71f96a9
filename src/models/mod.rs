//! # Data Models
//!
//! SeaORM entities for every table, plus the small DTOs served by the root routes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod activity;
pub mod favourite_project;
pub mod file;
pub mod inbox;
pub mod organization;
pub mod organization_invitation;
pub mod organization_member;
pub mod profile;
pub mod project;
pub mod project_member;
pub mod task;
pub mod task_attachment;
pub mod task_comment;
pub mod task_link;
pub mod time_log;

pub use activity::Entity as Activity;
pub use favourite_project::Entity as FavouriteProject;
pub use file::Entity as StoredFile;
pub use inbox::Entity as Inbox;
pub use organization::Entity as Organization;
pub use organization_invitation::Entity as OrganizationInvitation;
pub use organization_member::Entity as OrganizationMember;
pub use profile::Entity as Profile;
pub use project::Entity as Project;
pub use project_member::Entity as ProjectMember;
pub use task::Entity as Task;
pub use task_attachment::Entity as TaskAttachment;
pub use task_comment::Entity as TaskComment;
pub use task_link::Entity as TaskLink;
pub use time_log::Entity as TimeLog;

/// Greeting returned by `GET /`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    pub message: String,
}

impl ServiceInfo {
    pub fn for_app(app_name: &str) -> Self {
        Self {
            message: format!("Hello from {app_name}!"),
        }
    }
}

/// Liveness payload returned by `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub message: String,
    pub status: String,
}

impl HealthStatus {
    pub fn healthy(app_name: &str) -> Self {
        Self {
            message: format!("{app_name} is running!"),
            status: "healthy".to_string(),
        }
    }

    pub fn ready(app_name: &str) -> Self {
        Self {
            message: format!("{app_name} can reach its database"),
            status: "ready".to_string(),
        }
    }
}
