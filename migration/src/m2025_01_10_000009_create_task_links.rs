//! Migration to create task links and task attachments.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TaskLinks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TaskLinks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(TaskLinks::TaskId).uuid().not_null())
                    .col(ColumnDef::new(TaskLinks::Title).text().null())
                    .col(ColumnDef::new(TaskLinks::LinkUrl).text().not_null())
                    .col(ColumnDef::new(TaskLinks::CreatedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(TaskLinks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_links_task_id")
                            .from(TaskLinks::Table, TaskLinks::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_links_task_id")
                    .table(TaskLinks::Table)
                    .col(TaskLinks::TaskId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TaskAttachments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskAttachments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskAttachments::TaskId).uuid().not_null())
                    .col(ColumnDef::new(TaskAttachments::FileId).uuid().not_null())
                    .col(ColumnDef::new(TaskAttachments::CreatedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(TaskAttachments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_attachments_task_id")
                            .from(TaskAttachments::Table, TaskAttachments::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_attachments_file_id")
                            .from(TaskAttachments::Table, TaskAttachments::FileId)
                            .to(Files::Table, Files::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_attachments_task_file")
                    .table(TaskAttachments::Table)
                    .col(TaskAttachments::TaskId)
                    .col(TaskAttachments::FileId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskAttachments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskLinks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Files {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum TaskLinks {
    Table,
    Id,
    TaskId,
    Title,
    LinkUrl,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TaskAttachments {
    Table,
    Id,
    TaskId,
    FileId,
    CreatedBy,
    CreatedAt,
}
