//! Migration to create the files table (metadata for objects in the bucket).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Files::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Files::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Files::OrgId).uuid().not_null())
                    .col(ColumnDef::new(Files::ProjectId).uuid().null())
                    .col(ColumnDef::new(Files::TaskId).uuid().null())
                    .col(ColumnDef::new(Files::Name).text().not_null())
                    .col(ColumnDef::new(Files::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Files::ContentType).text().not_null())
                    .col(ColumnDef::new(Files::StorageKey).text().not_null())
                    .col(ColumnDef::new(Files::UploadedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(Files::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Files::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Files::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_files_org_id")
                            .from(Files::Table, Files::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_files_org_uploaded_by")
                    .table(Files::Table)
                    .col(Files::OrgId)
                    .col(Files::UploadedBy)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Files::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Files {
    Table,
    Id,
    OrgId,
    ProjectId,
    TaskId,
    Name,
    SizeBytes,
    ContentType,
    StorageKey,
    UploadedBy,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}
