use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_profiles_table::Profiles;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tools::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tools::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Tools::Name).string().not_null())
                    .col(ColumnDef::new(Tools::Brand).string().not_null())
                    .col(
                        ColumnDef::new(Tools::Serial)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Tools::ToolType).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Tools::Status)
                            .string_len(32)
                            .not_null()
                            .default("Active"),
                    )
                    .col(
                        ColumnDef::new(Tools::CurrentLocation)
                            .string()
                            .not_null()
                            .default("Company"),
                    )
                    .col(ColumnDef::new(Tools::CurrentResponsible).uuid().null())
                    .col(ColumnDef::new(Tools::Description).text().null())
                    .col(
                        ColumnDef::new(Tools::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Tools::SearchName).string().not_null())
                    .col(ColumnDef::new(Tools::SearchSerial).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tools_current_responsible")
                            .from(Tools::Table, Tools::CurrentResponsible)
                            .to(Profiles::Table, Profiles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tools_status")
                    .table(Tools::Table)
                    .col(Tools::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tools_current_location")
                    .table(Tools::Table)
                    .col(Tools::CurrentLocation)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tools::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Tools {
    Table,
    Id,
    Name,
    Brand,
    Serial,
    ToolType,
    Status,
    CurrentLocation,
    CurrentResponsible,
    Description,
    CreatedAt,
    SearchName,
    SearchSerial,
}
