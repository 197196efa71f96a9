//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for each
//! aggregate. Every list method returns the page alongside the unpaginated total.

use thiserror::Error;

pub mod activity;
pub mod attachment;
pub mod file;
pub mod inbox;
pub mod link;
pub mod organization;
pub mod profile;
pub mod project;
pub mod task;
pub mod time_log;

pub use activity::ActivityRepository;
pub use attachment::AttachmentRepository;
pub use file::FileRepository;
pub use inbox::InboxRepository;
pub use link::LinkRepository;
pub use organization::OrganizationRepository;
pub use profile::ProfileRepository;
pub use project::ProjectRepository;
pub use task::TaskRepository;
pub use time_log::TimeLogRepository;

/// Errors surfaced by repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl RepositoryError {
    /// Adapter for `map_err` on SeaORM results.
    pub fn database_error(error: sea_orm::DbErr) -> Self {
        RepositoryError::Database(error)
    }

    pub fn not_found(what: &str) -> Self {
        RepositoryError::NotFound(format!("{what} not found"))
    }
}

/// Offset/limit window applied to list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}
