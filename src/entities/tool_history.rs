use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One checkout-to-return cycle of a tool. `entry_at` stays null while the tool is out.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tool_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tool_id: Uuid,
    pub withdrawn_at: DateTime<Utc>,
    pub entry_at: Option<DateTime<Utc>>,
    pub responsible_id: Uuid,
    pub location: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tool::Entity",
        from = "Column::ToolId",
        to = "super::tool::Column::Id"
    )]
    Tool,
    #[sea_orm(
        belongs_to = "super::profile::Entity",
        from = "Column::ResponsibleId",
        to = "super::profile::Column::Id"
    )]
    Responsible,
}

impl Related<super::tool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tool.def()
    }
}

impl Related<super::profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Responsible.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_open(&self) -> bool {
        self.entry_at.is_none()
    }
}
