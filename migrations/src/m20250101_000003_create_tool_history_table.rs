use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_profiles_table::Profiles;
use super::m20250101_000002_create_tools_table::Tools;

/// At most one open movement per tool: rows with a NULL `entry_at` are unique on `tool_id`.
const OPEN_MOVEMENT_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_tool_history_open_movement \
     ON tool_history (tool_id) WHERE entry_at IS NULL";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ToolHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ToolHistory::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ToolHistory::ToolId).uuid().not_null())
                    .col(
                        ColumnDef::new(ToolHistory::WithdrawnAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ToolHistory::EntryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ToolHistory::ResponsibleId).uuid().not_null())
                    .col(ColumnDef::new(ToolHistory::Location).string().not_null())
                    .col(ColumnDef::new(ToolHistory::Notes).text().null())
                    .col(
                        ColumnDef::new(ToolHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tool_history_tool_id")
                            .from(ToolHistory::Table, ToolHistory::ToolId)
                            .to(Tools::Table, Tools::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tool_history_responsible_id")
                            .from(ToolHistory::Table, ToolHistory::ResponsibleId)
                            .to(Profiles::Table, Profiles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tool_history_tool_withdrawn")
                    .table(ToolHistory::Table)
                    .col(ToolHistory::ToolId)
                    .col(ToolHistory::WithdrawnAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(OPEN_MOVEMENT_INDEX)
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ToolHistory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ToolHistory {
    Table,
    Id,
    ToolId,
    WithdrawnAt,
    EntryAt,
    ResponsibleId,
    Location,
    Notes,
    CreatedAt,
}
