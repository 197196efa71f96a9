//! Migration adding project scoping and invalidation to organization invitations.
//!
//! One column per ALTER so SQLite accepts it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(OrganizationInvitations::Table)
                    .add_column(ColumnDef::new(OrganizationInvitations::ProjectIds).json().null())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(OrganizationInvitations::Table)
                    .add_column(
                        ColumnDef::new(OrganizationInvitations::InvalidatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_organization_invitations_org_email")
                    .table(OrganizationInvitations::Table)
                    .col(OrganizationInvitations::OrgId)
                    .col(OrganizationInvitations::Email)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_organization_invitations_org_email")
                    .table(OrganizationInvitations::Table)
                    .to_owned(),
            )
            .await?;

        for column in [
            OrganizationInvitations::InvalidatedAt,
            OrganizationInvitations::ProjectIds,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(OrganizationInvitations::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }
        Ok(())
    }
}

#[derive(DeriveIden)]
enum OrganizationInvitations {
    Table,
    OrgId,
    Email,
    ProjectIds,
    InvalidatedAt,
}
