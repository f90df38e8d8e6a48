use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait,
    Order, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::tool::{ActiveModel as ToolActiveModel, Column, Entity as Tool, Model as ToolModel};
use crate::entities::tool::fold_for_search;
use crate::entities::{ToolStatus, ToolType};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Catalog listing filters; every field is optional and they combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilter {
    pub tool_type: Option<ToolType>,
    pub status: Option<ToolStatus>,
    pub location: Option<String>,
    /// Case-insensitive substring over name or serial
    pub search: Option<String>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ToolSort {
    #[default]
    Name,
    Serial,
    CreatedAt,
}

impl ToolSort {
    fn column(self) -> Column {
        match self {
            ToolSort::Name => Column::Name,
            ToolSort::Serial => Column::Serial,
            ToolSort::CreatedAt => Column::CreatedAt,
        }
    }
}

/// Builds a case-folded `LIKE` pattern matching `term` anywhere, with `\` escaping the wildcards.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in fold_for_search(term).chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Matches against a search column, which already holds the folded text.
fn contains_folded(column: Column, pattern: &str) -> sea_orm::sea_query::SimpleExpr {
    Expr::col((Tool, column)).like(LikeExpr::new(pattern).escape('\\'))
}

fn filter_condition(filter: &ToolFilter) -> Condition {
    let mut condition = Condition::all();

    if let Some(tool_type) = filter.tool_type {
        condition = condition.add(Column::ToolType.eq(tool_type));
    }
    if let Some(status) = filter.status {
        condition = condition.add(Column::Status.eq(status));
    }
    if let Some(location) = filter.location.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        condition = condition.add(Column::CurrentLocation.eq(location));
    }
    if let Some(term) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term);
        condition = condition.add(
            Condition::any()
                .add(contains_folded(Column::SearchName, &pattern))
                .add(contains_folded(Column::SearchSerial, &pattern)),
        );
    }

    condition
}

/// Repository for tool rows
#[derive(Debug)]
pub struct ToolRepository<'c, C> {
    base: BaseRepository<'c, C>,
}

impl<'c, C: ConnectionTrait> ToolRepository<'c, C> {
    pub fn new(db: &'c C) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find a tool by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ToolModel>, ServiceError> {
        Tool::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Find a tool by ID or fail with `NotFound`
    pub async fn get(&self, id: Uuid) -> Result<ToolModel, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Tool with ID {} not found", id)))
    }

    pub async fn find_by_serial(&self, serial: &str) -> Result<Option<ToolModel>, ServiceError> {
        Tool::find()
            .filter(Column::Serial.eq(serial))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_ids(&self, ids: Vec<Uuid>) -> Result<Vec<ToolModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Tool::find()
            .filter(Column::Id.is_in(ids))
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Tools whose movement fields say they are out, or that are otherwise not cleanly in storage.
    pub async fn find_not_in_storage(
        &self,
        storage_location: &str,
    ) -> Result<Vec<ToolModel>, ServiceError> {
        Tool::find()
            .filter(
                Condition::any()
                    .add(Column::CurrentLocation.ne(storage_location))
                    .add(Column::CurrentResponsible.is_not_null()),
            )
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Filtered, sorted page of tools plus the total number of matches. `page` is zero-based.
    pub async fn find_page(
        &self,
        filter: &ToolFilter,
        sort_by: ToolSort,
        ascending: bool,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<ToolModel>, u64), ServiceError> {
        let order = if ascending { Order::Asc } else { Order::Desc };
        let paginator = Tool::find()
            .filter(filter_condition(filter))
            .order_by(sort_by.column(), order)
            .order_by_asc(Column::Id)
            .paginate(self.base.get_db(), page_size);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let tools = paginator
            .fetch_page(page)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((tools, total))
    }

    /// Create a new tool
    pub async fn create(&self, tool: ToolActiveModel) -> Result<ToolModel, ServiceError> {
        tool.insert(self.base.get_db())
            .await
            .map_err(|e| ServiceError::from_write(e, "tool serial already registered"))
    }

    /// Write only the fields set on `changes`
    pub async fn update(
        &self,
        id: Uuid,
        mut changes: ToolActiveModel,
    ) -> Result<ToolModel, ServiceError> {
        changes.id = ActiveValue::Unchanged(id);
        changes.update(self.base.get_db()).await.map_err(|e| match e {
            DbErr::RecordNotUpdated | DbErr::RecordNotFound(_) => {
                ServiceError::NotFound(format!("Tool with ID {} not found", id))
            }
            other => ServiceError::from_write(other, "tool serial already registered"),
        })
    }

    /// Moves the tool: the ledger's only write path to location and responsible.
    pub async fn set_movement(
        &self,
        id: Uuid,
        location: &str,
        responsible: Option<Uuid>,
        status: Option<ToolStatus>,
    ) -> Result<ToolModel, ServiceError> {
        let changes = ToolActiveModel {
            current_location: ActiveValue::Set(location.to_string()),
            current_responsible: ActiveValue::Set(responsible),
            status: status.map_or(ActiveValue::NotSet, ActiveValue::Set),
            ..Default::default()
        };
        self.update(id, changes).await
    }
}

impl<'c, C: ConnectionTrait> Repository for ToolRepository<'c, C> {
    type Conn = C;

    fn get_db(&self) -> &C {
        self.base.get_db()
    }
}
