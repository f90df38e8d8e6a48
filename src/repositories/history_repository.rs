use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::entities::tool_history::{
    ActiveModel as HistoryActiveModel, Column, Entity as ToolHistory, Model as HistoryModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for movement (history) rows
#[derive(Debug)]
pub struct HistoryRepository<'c, C> {
    base: BaseRepository<'c, C>,
}

impl<'c, C: ConnectionTrait> HistoryRepository<'c, C> {
    pub fn new(db: &'c C) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<HistoryModel>, ServiceError> {
        ToolHistory::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Open movements of a tool, at most `limit` of them
    pub async fn find_open_for_tool(
        &self,
        tool_id: Uuid,
        limit: u64,
    ) -> Result<Vec<HistoryModel>, ServiceError> {
        ToolHistory::find()
            .filter(Column::ToolId.eq(tool_id))
            .filter(Column::EntryAt.is_null())
            .order_by_asc(Column::WithdrawnAt)
            .limit(limit)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// The tool's most recent movement, open or closed
    pub async fn find_latest_for_tool(
        &self,
        tool_id: Uuid,
    ) -> Result<Option<HistoryModel>, ServiceError> {
        ToolHistory::find()
            .filter(Column::ToolId.eq(tool_id))
            .order_by_desc(Column::WithdrawnAt)
            .order_by_desc(Column::CreatedAt)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Every open movement, oldest withdrawal first
    pub async fn find_open(&self) -> Result<Vec<HistoryModel>, ServiceError> {
        ToolHistory::find()
            .filter(Column::EntryAt.is_null())
            .order_by_asc(Column::WithdrawnAt)
            .order_by_asc(Column::Id)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Movements of one tool, newest withdrawal first
    pub async fn find_by_tool(&self, tool_id: Uuid) -> Result<Vec<HistoryModel>, ServiceError> {
        ToolHistory::find()
            .filter(Column::ToolId.eq(tool_id))
            .order_by_desc(Column::WithdrawnAt)
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// All movements, newest withdrawal first
    pub async fn find_all(&self) -> Result<Vec<HistoryModel>, ServiceError> {
        ToolHistory::find()
            .order_by_desc(Column::WithdrawnAt)
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Insert an open movement. The open-movement unique index turns a racing insert into `Conflict`.
    pub async fn create(&self, movement: HistoryActiveModel) -> Result<HistoryModel, ServiceError> {
        movement
            .insert(self.base.get_db())
            .await
            .map_err(|e| ServiceError::from_write(e, "tool already has an open movement"))
    }

    /// Closes an open movement. Returns `Conflict` when the row was closed in the meantime.
    pub async fn close(
        &self,
        id: Uuid,
        entry_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<HistoryModel, ServiceError> {
        let result = ToolHistory::update_many()
            .col_expr(Column::EntryAt, Expr::value(entry_at))
            .col_expr(Column::Notes, Expr::value(notes))
            .filter(Column::Id.eq(id))
            .filter(Column::EntryAt.is_null())
            .exec(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return match self.find_by_id(id).await? {
                Some(_) => Err(ServiceError::Conflict(format!(
                    "Movement {} is already closed",
                    id
                ))),
                None => Err(ServiceError::NotFound(format!(
                    "Movement with ID {} not found",
                    id
                ))),
            };
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Movement with ID {} not found", id)))
    }
}

impl<'c, C: ConnectionTrait> Repository for HistoryRepository<'c, C> {
    type Conn = C;

    fn get_db(&self) -> &C {
        self.base.get_db()
    }
}
