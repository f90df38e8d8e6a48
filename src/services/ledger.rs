//! Movement ledger.
//!
//! Owns the `tool_history` rows and the movement fields of `tools`
//! (`current_location`, `current_responsible`). Every write keeps the two in
//! step and keeps at most one open movement per tool.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::LedgerConfig;
use crate::entities::tool_history::ActiveModel as HistoryActiveModel;
use crate::entities::{HistoryModel, ProfileModel, ToolModel, ToolStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{HistoryRepository, ProfileRepository, ToolRepository};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WithdrawRequest {
    pub tool_id: Uuid,
    pub responsible_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub location: String,
    pub withdrawn_at: DateTime<Utc>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnRequest {
    pub tool_id: Uuid,
    pub returned_at: DateTime<Utc>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EntryRequest {
    pub tool_id: Uuid,
    pub history_id: Uuid,
    pub entry_at: DateTime<Utc>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Movement row joined with the tool and responsible summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub history_id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub tool_serial: String,
    pub responsible_id: Uuid,
    pub responsible_first_name: String,
    pub responsible_last_name: String,
    pub location: String,
    pub withdrawn_at: DateTime<Utc>,
    pub entry_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Open movement as shown on the pending list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMovement {
    pub history_id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub tool_serial: String,
    pub responsible_id: Uuid,
    pub responsible_first_name: String,
    pub responsible_last_name: String,
    pub location: String,
    pub withdrawn_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl From<MovementRecord> for PendingMovement {
    fn from(record: MovementRecord) -> Self {
        Self {
            history_id: record.history_id,
            tool_id: record.tool_id,
            tool_name: record.tool_name,
            tool_serial: record.tool_serial,
            responsible_id: record.responsible_id,
            responsible_first_name: record.responsible_first_name,
            responsible_last_name: record.responsible_last_name,
            location: record.location,
            withdrawn_at: record.withdrawn_at,
            notes: record.notes,
        }
    }
}

/// Where a tool is, as derived from its movement fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolState {
    InStorage,
    CheckedOut { location: String, responsible: Uuid },
    /// Location and responsible disagree about whether the tool is stored.
    Inconsistent,
}

impl ToolState {
    /// Classifies `tool` against the configured storage location.
    pub fn of(tool: &ToolModel, storage_location: &str) -> Self {
        match (
            tool.current_location == storage_location,
            tool.current_responsible,
        ) {
            (true, None) => ToolState::InStorage,
            (false, Some(responsible)) => ToolState::CheckedOut {
                location: tool.current_location.clone(),
                responsible,
            },
            _ => ToolState::Inconsistent,
        }
    }
}

type LockTable = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// Per-tool async locks serializing ledger writes within the process.
///
/// Entries live only while someone holds or waits on them.
#[derive(Debug, Clone, Default)]
pub struct ToolLocks {
    locks: LockTable,
}

impl ToolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, tool_id: Uuid) -> ToolLockGuard {
        let lock = self
            .locks
            .entry(tool_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ToolLockGuard {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            tool_id,
        }
    }

    /// Number of tools with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock on one tool. Dropping it releases the lock and evicts the
/// table entry once no other task references it.
#[derive(Debug)]
pub struct ToolLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
    tool_id: Uuid,
}

impl Drop for ToolLockGuard {
    fn drop(&mut self) {
        // the guard holds one reference to the mutex; release it first
        self.guard.take();
        self.locks
            .remove_if(&self.tool_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
pub struct MovementLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    settings: LedgerConfig,
    locks: ToolLocks,
}

impl MovementLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        settings: LedgerConfig,
        locks: ToolLocks,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
            locks,
        }
    }

    pub fn storage_location(&self) -> &str {
        &self.settings.storage_location
    }

    /// Checks a tool out to a responsible person at a destination.
    #[instrument(skip(self), fields(tool_id = %request.tool_id))]
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<HistoryModel, ServiceError> {
        request.validate()?;
        let location = request.location.trim();
        if location.is_empty() {
            return Err(ServiceError::ValidationError(
                "location must not be blank".to_string(),
            ));
        }
        if location == self.storage_location() {
            return Err(ServiceError::ValidationError(format!(
                "cannot withdraw a tool to the storage location '{}'",
                location
            )));
        }

        let _guard = self.locks.acquire(request.tool_id).await;

        let result = if self.settings.atomic_writes {
            // dropping an uncommitted transaction rolls it back
            async {
                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let movement = self.withdraw_steps(&txn, &request, location).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok::<_, ServiceError>(movement)
            }
            .await
        } else {
            self.withdraw_steps(self.db.as_ref(), &request, location)
                .await
        };

        match result {
            Ok(movement) => {
                counter!("toolroom_ledger.withdrawals", 1);
                info!(
                    tool_id = %movement.tool_id,
                    history_id = %movement.id,
                    responsible_id = %movement.responsible_id,
                    location = %movement.location,
                    "Tool withdrawn"
                );
                self.event_sender
                    .send_or_log(Event::ToolWithdrawn {
                        tool_id: movement.tool_id,
                        history_id: movement.id,
                        responsible_id: movement.responsible_id,
                        location: movement.location.clone(),
                    })
                    .await;
                Ok(movement)
            }
            Err(e) => Err(self.record_failure("withdraw", request.tool_id, e)),
        }
    }

    async fn withdraw_steps<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &WithdrawRequest,
        location: &str,
    ) -> Result<HistoryModel, ServiceError> {
        ProfileRepository::new(conn).get(request.responsible_id).await?;
        let tools = ToolRepository::new(conn);
        tools.get(request.tool_id).await?;

        let history = HistoryRepository::new(conn);
        let open = history.find_open_for_tool(request.tool_id, 1).await?;
        if let Some(existing) = open.first() {
            return Err(ServiceError::Conflict(format!(
                "Tool {} is already checked out (movement {})",
                request.tool_id, existing.id
            )));
        }
        if let Some(latest) = history.find_latest_for_tool(request.tool_id).await? {
            let last_seen = latest.entry_at.unwrap_or(latest.withdrawn_at);
            if request.withdrawn_at < last_seen {
                return Err(ServiceError::ValidationError(format!(
                    "withdrawal time {} is earlier than the tool's last movement ({})",
                    request.withdrawn_at, last_seen
                )));
            }
        }

        let movement = history
            .create(HistoryActiveModel {
                id: Set(Uuid::new_v4()),
                tool_id: Set(request.tool_id),
                withdrawn_at: Set(request.withdrawn_at),
                entry_at: Set(None),
                responsible_id: Set(request.responsible_id),
                location: Set(location.to_string()),
                notes: Set(clean_notes(request.notes.as_deref())),
                created_at: Set(Utc::now()),
            })
            .await?;

        tools
            .set_movement(
                request.tool_id,
                location,
                Some(request.responsible_id),
                Some(ToolStatus::Active),
            )
            .await
            .map_err(|e| self.second_step_failed(request.tool_id, &movement, e))?;

        Ok(movement)
    }

    /// Closes the tool's open movement and puts the tool back in storage.
    #[instrument(skip(self), fields(tool_id = %request.tool_id))]
    pub async fn return_tool(&self, request: ReturnRequest) -> Result<HistoryModel, ServiceError> {
        request.validate()?;
        let _guard = self.locks.acquire(request.tool_id).await;

        let result = if self.settings.atomic_writes {
            // dropping an uncommitted transaction rolls it back
            async {
                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let movement = self.return_steps(&txn, &request).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok::<_, ServiceError>(movement)
            }
            .await
        } else {
            self.return_steps(self.db.as_ref(), &request).await
        };

        self.finish_close("return", request.tool_id, result).await
    }

    async fn return_steps<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &ReturnRequest,
    ) -> Result<HistoryModel, ServiceError> {
        let history = HistoryRepository::new(conn);
        let mut open = history.find_open_for_tool(request.tool_id, 2).await?;
        let movement = match open.len() {
            0 => {
                return Err(ServiceError::NotFound(format!(
                    "Tool {} has no open movement to close",
                    request.tool_id
                )))
            }
            1 => open.remove(0),
            _ => {
                return Err(ServiceError::Consistency(format!(
                    "Tool {} has more than one open movement; run reconciliation",
                    request.tool_id
                )))
            }
        };

        self.close_steps(conn, movement, request.returned_at, request.notes.as_deref())
            .await
    }

    /// Closes an explicitly addressed movement.
    #[instrument(skip(self), fields(tool_id = %request.tool_id, history_id = %request.history_id))]
    pub async fn register_entry(&self, request: EntryRequest) -> Result<HistoryModel, ServiceError> {
        request.validate()?;
        let _guard = self.locks.acquire(request.tool_id).await;

        let result = if self.settings.atomic_writes {
            // dropping an uncommitted transaction rolls it back
            async {
                let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
                let movement = self.entry_steps(&txn, &request).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok::<_, ServiceError>(movement)
            }
            .await
        } else {
            self.entry_steps(self.db.as_ref(), &request).await
        };

        self.finish_close("entry", request.tool_id, result).await
    }

    async fn entry_steps<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &EntryRequest,
    ) -> Result<HistoryModel, ServiceError> {
        let movement = HistoryRepository::new(conn)
            .find_by_id(request.history_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Movement with ID {} not found", request.history_id))
            })?;

        if movement.tool_id != request.tool_id {
            return Err(ServiceError::ValidationError(format!(
                "Movement {} belongs to tool {}, not {}",
                movement.id, movement.tool_id, request.tool_id
            )));
        }
        if !movement.is_open() {
            return Err(ServiceError::Conflict(format!(
                "Movement {} is already closed",
                movement.id
            )));
        }

        self.close_steps(conn, movement, request.entry_at, request.notes.as_deref())
            .await
    }

    async fn close_steps<C: ConnectionTrait>(
        &self,
        conn: &C,
        movement: HistoryModel,
        entry_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<HistoryModel, ServiceError> {
        if entry_at < movement.withdrawn_at {
            return Err(ServiceError::ValidationError(format!(
                "return time {} is earlier than withdrawal time {}",
                entry_at, movement.withdrawn_at
            )));
        }

        let closed = HistoryRepository::new(conn)
            .close(movement.id, entry_at, clean_notes(notes))
            .await?;

        ToolRepository::new(conn)
            .set_movement(closed.tool_id, self.storage_location(), None, None)
            .await
            .map_err(|e| self.second_step_failed(closed.tool_id, &closed, e))?;

        Ok(closed)
    }

    async fn finish_close(
        &self,
        operation: &'static str,
        tool_id: Uuid,
        result: Result<HistoryModel, ServiceError>,
    ) -> Result<HistoryModel, ServiceError> {
        match result {
            Ok(movement) => {
                counter!("toolroom_ledger.returns", 1);
                info!(
                    tool_id = %movement.tool_id,
                    history_id = %movement.id,
                    operation,
                    "Tool returned to storage"
                );
                self.event_sender
                    .send_or_log(Event::ToolReturned {
                        tool_id: movement.tool_id,
                        history_id: movement.id,
                    })
                    .await;
                Ok(movement)
            }
            Err(e) => Err(self.record_failure(operation, tool_id, e)),
        }
    }

    /// Maps a failed tool write that followed a committed history write.
    fn second_step_failed(
        &self,
        tool_id: Uuid,
        movement: &HistoryModel,
        error: ServiceError,
    ) -> ServiceError {
        if self.settings.atomic_writes {
            return error;
        }
        ServiceError::partial(
            tool_id,
            format!("history {}", movement.id),
            "tool update",
            error,
        )
    }

    fn record_failure(&self, operation: &'static str, tool_id: Uuid, e: ServiceError) -> ServiceError {
        match &e {
            ServiceError::Conflict(_) => {
                counter!("toolroom_ledger.conflicts", 1);
                warn!(%tool_id, operation, error = %e, "Ledger write rejected");
            }
            ServiceError::PartialUpdate { .. } => {
                counter!("toolroom_ledger.partial_updates", 1);
                error!(%tool_id, operation, error = %e, "Ledger left partially updated; reconciliation required");
            }
            ServiceError::Consistency(_) => {
                error!(%tool_id, operation, error = %e, "Ledger invariant violated");
            }
            ServiceError::DatabaseError(_) => {
                error!(%tool_id, operation, error = %e, "Ledger write failed");
            }
            _ => {
                warn!(%tool_id, operation, error = %e, "Ledger request rejected");
            }
        }
        e
    }

    /// All open movements, oldest withdrawal first.
    #[instrument(skip(self))]
    pub async fn pending_movements(&self) -> Result<Vec<PendingMovement>, ServiceError> {
        let db = self.db.as_ref();
        let open = HistoryRepository::new(db).find_open().await?;
        let records = self.enrich(db, open).await?;
        Ok(records.into_iter().map(PendingMovement::from).collect())
    }

    /// Every movement, newest withdrawal first.
    #[instrument(skip(self))]
    pub async fn all_movements(&self) -> Result<Vec<MovementRecord>, ServiceError> {
        let db = self.db.as_ref();
        let rows = HistoryRepository::new(db).find_all().await?;
        self.enrich(db, rows).await
    }

    /// Movements of one tool, newest withdrawal first.
    #[instrument(skip(self))]
    pub async fn history_for_tool(&self, tool_id: Uuid) -> Result<Vec<HistoryModel>, ServiceError> {
        let db = self.db.as_ref();
        ToolRepository::new(db).get(tool_id).await?;
        HistoryRepository::new(db).find_by_tool(tool_id).await
    }

    async fn enrich<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<HistoryModel>,
    ) -> Result<Vec<MovementRecord>, ServiceError> {
        let mut tool_ids: Vec<Uuid> = rows.iter().map(|row| row.tool_id).collect();
        tool_ids.sort_unstable();
        tool_ids.dedup();
        let mut profile_ids: Vec<Uuid> = rows.iter().map(|row| row.responsible_id).collect();
        profile_ids.sort_unstable();
        profile_ids.dedup();

        let tools: HashMap<Uuid, ToolModel> = ToolRepository::new(conn)
            .find_by_ids(tool_ids)
            .await?
            .into_iter()
            .map(|tool| (tool.id, tool))
            .collect();
        let profiles: HashMap<Uuid, ProfileModel> = ProfileRepository::new(conn)
            .find_by_ids(profile_ids)
            .await?
            .into_iter()
            .map(|profile| (profile.id, profile))
            .collect();

        rows.into_iter()
            .map(|row| {
                let tool = tools.get(&row.tool_id).ok_or_else(|| {
                    ServiceError::Consistency(format!(
                        "Movement {} references missing tool {}",
                        row.id, row.tool_id
                    ))
                })?;
                let responsible = profiles.get(&row.responsible_id).ok_or_else(|| {
                    ServiceError::Consistency(format!(
                        "Movement {} references missing profile {}",
                        row.id, row.responsible_id
                    ))
                })?;
                Ok(MovementRecord {
                    history_id: row.id,
                    tool_id: row.tool_id,
                    tool_name: tool.name.clone(),
                    tool_serial: tool.serial.clone(),
                    responsible_id: row.responsible_id,
                    responsible_first_name: responsible.first_name.clone(),
                    responsible_last_name: responsible.last_name.clone(),
                    location: row.location,
                    withdrawn_at: row.withdrawn_at,
                    entry_at: row.entry_at,
                    notes: row.notes,
                })
            })
            .collect()
    }
}

fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ToolType, STORAGE_LOCATION};
    use rstest::rstest;

    fn tool(location: &str, responsible: Option<Uuid>) -> ToolModel {
        ToolModel {
            id: Uuid::new_v4(),
            name: "Drill".into(),
            brand: "Bosch".into(),
            serial: "SN-1".into(),
            tool_type: ToolType::Electrical,
            status: ToolStatus::Active,
            current_location: location.into(),
            current_responsible: responsible,
            description: None,
            created_at: Utc::now(),
            search_name: String::new(),
            search_serial: String::new(),
        }
    }

    #[test]
    fn state_of_stored_tool() {
        assert_eq!(
            ToolState::of(&tool(STORAGE_LOCATION, None), STORAGE_LOCATION),
            ToolState::InStorage
        );
    }

    #[test]
    fn state_of_checked_out_tool() {
        let who = Uuid::new_v4();
        assert_eq!(
            ToolState::of(&tool("Site A", Some(who)), STORAGE_LOCATION),
            ToolState::CheckedOut {
                location: "Site A".into(),
                responsible: who
            }
        );
    }

    #[rstest]
    #[case(STORAGE_LOCATION, true)]
    #[case("Site A", false)]
    fn half_set_movement_fields_are_inconsistent(#[case] location: &str, #[case] with_responsible: bool) {
        let responsible = with_responsible.then(Uuid::new_v4);
        assert_eq!(
            ToolState::of(&tool(location, responsible), STORAGE_LOCATION),
            ToolState::Inconsistent
        );
    }

    #[test]
    fn custom_storage_location_is_honoured() {
        let stored = tool("Warehouse", None);
        assert_eq!(ToolState::of(&stored, "Warehouse"), ToolState::InStorage);
        assert_eq!(ToolState::of(&stored, STORAGE_LOCATION), ToolState::Inconsistent);

        let default_shelf = tool(STORAGE_LOCATION, Some(Uuid::new_v4()));
        assert_matches::assert_matches!(
            ToolState::of(&default_shelf, "Warehouse"),
            ToolState::CheckedOut { location, .. } if location == STORAGE_LOCATION
        );
    }

    #[test]
    fn blank_notes_are_dropped() {
        assert_eq!(clean_notes(Some("   ")), None);
        assert_eq!(clean_notes(Some(" ok ")), Some("ok".to_string()));
        assert_eq!(clean_notes(None), None);
    }

    #[tokio::test]
    async fn tool_locks_serialize_the_same_tool() {
        let locks = ToolLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        let other = locks.acquire(Uuid::new_v4()).await;
        drop(other);

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire(id).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn released_locks_are_evicted() {
        let locks = ToolLocks::new();
        for _ in 0..50 {
            let _guard = locks.acquire(Uuid::new_v4()).await;
        }
        assert!(locks.is_empty());

        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire(id).await;
        });
        tokio::task::yield_now().await;
        drop(guard);
        // the waiter still references the entry, so it survives the first release
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
