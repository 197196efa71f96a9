//! Database migrations for the HexoTeams API.
//!
//! Tables are created in dependency order so foreign keys always point at
//! tables that already exist.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_profiles;
mod m2025_01_10_000002_create_organizations;
mod m2025_01_10_000003_create_projects;
mod m2025_01_10_000004_create_tasks;
mod m2025_01_10_000005_create_files;
mod m2025_01_10_000006_create_inbox;
mod m2025_01_10_000007_create_activities;
mod m2025_01_10_000008_extend_invitations;
mod m2025_01_10_000009_create_task_links;
mod m2025_01_10_000010_create_time_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_profiles::Migration),
            Box::new(m2025_01_10_000002_create_organizations::Migration),
            Box::new(m2025_01_10_000003_create_projects::Migration),
            Box::new(m2025_01_10_000004_create_tasks::Migration),
            Box::new(m2025_01_10_000005_create_files::Migration),
            Box::new(m2025_01_10_000006_create_inbox::Migration),
            Box::new(m2025_01_10_000007_create_activities::Migration),
            Box::new(m2025_01_10_000008_extend_invitations::Migration),
            Box::new(m2025_01_10_000009_create_task_links::Migration),
            Box::new(m2025_01_10_000010_create_time_logs::Migration),
        ]
    }
}
