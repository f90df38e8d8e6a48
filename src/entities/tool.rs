use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default storage location; `ledger.storage_location` can replace it.
pub const STORAGE_LOCATION: &str = "Company";

/// Tool category
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(ascii_case_insensitive)]
pub enum ToolType {
    #[sea_orm(string_value = "Electrical")]
    Electrical,
    #[sea_orm(string_value = "Manual")]
    Manual,
    #[sea_orm(string_value = "Mechanical")]
    Mechanical,
    #[sea_orm(string_value = "Special")]
    Special,
    #[sea_orm(string_value = "HeightEquipment")]
    #[strum(to_string = "HeightEquipment", serialize = "height-equipment")]
    HeightEquipment,
}

/// Operational status of a tool
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(ascii_case_insensitive)]
pub enum ToolStatus {
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "Inactive")]
    Inactive,
    #[sea_orm(string_value = "Lost")]
    Lost,
    #[sea_orm(string_value = "UnderMaintenance")]
    #[strum(to_string = "UnderMaintenance", serialize = "under-maintenance")]
    UnderMaintenance,
}

/// Registered physical tool.
///
/// `current_location` and `current_responsible` belong to the movement ledger;
/// catalog edits never write them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tools")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub brand: String,
    #[sea_orm(unique)]
    pub serial: String,
    pub tool_type: ToolType,
    pub status: ToolStatus,
    pub current_location: String,
    pub current_responsible: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lowercased `name`, maintained on save for case-insensitive search
    #[serde(skip_serializing, default)]
    pub search_name: String,
    /// Lowercased `serial`, maintained on save for case-insensitive search
    #[serde(skip_serializing, default)]
    pub search_serial: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tool_history::Entity")]
    History,
    #[sea_orm(
        belongs_to = "super::profile::Entity",
        from = "Column::CurrentResponsible",
        to = "super::profile::Column::Id"
    )]
    Responsible,
}

impl Related<super::tool_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

/// Case folding shared by the stored search columns and the search term.
pub fn fold_for_search(text: &str) -> String {
    text.trim().to_lowercase()
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr> {
        let mut active_model = self;
        if let ActiveValue::Set(name) = &active_model.name {
            active_model.search_name = ActiveValue::Set(fold_for_search(name));
        }
        if let ActiveValue::Set(serial) = &active_model.serial {
            active_model.search_serial = ActiveValue::Set(fold_for_search(serial));
        }
        Ok(active_model)
    }
}

impl Model {
    /// True when the tool sits at `storage_location` with nobody responsible for it.
    pub fn is_in_storage(&self, storage_location: &str) -> bool {
        self.current_location == storage_location && self.current_responsible.is_none()
    }
}
