//! Migration to create the inbox table holding per-user notifications.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Inbox::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Inbox::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Inbox::UserId).uuid().not_null())
                    .col(ColumnDef::new(Inbox::OrgId).uuid().not_null())
                    .col(ColumnDef::new(Inbox::UserBy).uuid().not_null())
                    .col(ColumnDef::new(Inbox::EventType).text().not_null())
                    .col(ColumnDef::new(Inbox::Title).text().not_null())
                    .col(ColumnDef::new(Inbox::Message).text().not_null())
                    .col(ColumnDef::new(Inbox::ReferenceId).uuid().null())
                    .col(
                        ColumnDef::new(Inbox::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Inbox::IsArchived)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Inbox::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Inbox::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inbox_org_id")
                            .from(Inbox::Table, Inbox::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inbox_user_org_created")
                    .table(Inbox::Table)
                    .col(Inbox::UserId)
                    .col(Inbox::OrgId)
                    .col(Inbox::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Inbox::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Inbox {
    Table,
    Id,
    UserId,
    OrgId,
    UserBy,
    EventType,
    Title,
    Message,
    ReferenceId,
    IsRead,
    IsArchived,
    CreatedAt,
    UpdatedAt,
}
