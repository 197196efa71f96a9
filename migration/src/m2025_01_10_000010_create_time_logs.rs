//! Migration to create the time_logs table.
//!
//! A row with a null `stopped_at` is a running timer; at most one per user
//! is enforced by the handlers.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TimeLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TimeLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(TimeLogs::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(TimeLogs::TaskId).uuid().null())
                    .col(ColumnDef::new(TimeLogs::LogDate).date().not_null())
                    .col(
                        ColumnDef::new(TimeLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TimeLogs::StoppedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(TimeLogs::DurationSeconds).big_integer().null())
                    .col(ColumnDef::new(TimeLogs::Notes).text().null())
                    .col(ColumnDef::new(TimeLogs::CreatedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(TimeLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TimeLogs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_time_logs_project_id")
                            .from(TimeLogs::Table, TimeLogs::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_time_logs_task_id")
                            .from(TimeLogs::Table, TimeLogs::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_time_logs_created_by_date")
                    .table(TimeLogs::Table)
                    .col(TimeLogs::CreatedBy)
                    .col(TimeLogs::LogDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TimeLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum TimeLogs {
    Table,
    Id,
    ProjectId,
    TaskId,
    LogDate,
    StartedAt,
    StoppedAt,
    DurationSeconds,
    Notes,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
