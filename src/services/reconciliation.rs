//! Detects and repairs disagreement between tool movement fields and open movements.

use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{HistoryModel, ToolModel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{HistoryRepository, ToolRepository};
use crate::services::ledger::{ToolLocks, ToolState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    MultipleOpenMovements { tool_id: Uuid, history_ids: Vec<Uuid> },
    /// The tool says it is out but no movement is open.
    CheckedOutWithoutMovement { tool_id: Uuid },
    /// A movement is open but the tool says it is in storage.
    OpenMovementWhileInStorage { tool_id: Uuid, history_id: Uuid },
    MovementMismatch { tool_id: Uuid, history_id: Uuid },
    /// Location and responsible disagree about whether the tool is stored.
    ResponsibleWithoutLocation { tool_id: Uuid },
}

impl Discrepancy {
    pub fn tool_id(&self) -> Uuid {
        match self {
            Discrepancy::MultipleOpenMovements { tool_id, .. }
            | Discrepancy::CheckedOutWithoutMovement { tool_id }
            | Discrepancy::OpenMovementWhileInStorage { tool_id, .. }
            | Discrepancy::MovementMismatch { tool_id, .. }
            | Discrepancy::ResponsibleWithoutLocation { tool_id } => *tool_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Discrepancy::MultipleOpenMovements { .. } => "multiple_open_movements",
            Discrepancy::CheckedOutWithoutMovement { .. } => "checked_out_without_movement",
            Discrepancy::OpenMovementWhileInStorage { .. } => "open_movement_while_in_storage",
            Discrepancy::MovementMismatch { .. } => "movement_mismatch",
            Discrepancy::ResponsibleWithoutLocation { .. } => "responsible_without_location",
        }
    }

    pub fn is_repairable(&self) -> bool {
        !matches!(self, Discrepancy::MultipleOpenMovements { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub discrepancies: Vec<Discrepancy>,
    pub repaired: Vec<Uuid>,
    pub unresolved: Vec<Discrepancy>,
}

/// Compares one tool against its open movements.
fn classify(tool: &ToolModel, open: &[HistoryModel], storage_location: &str) -> Option<Discrepancy> {
    if open.len() > 1 {
        return Some(Discrepancy::MultipleOpenMovements {
            tool_id: tool.id,
            history_ids: open.iter().map(|row| row.id).collect(),
        });
    }

    match (ToolState::of(tool, storage_location), open.first()) {
        (ToolState::Inconsistent, _) => {
            Some(Discrepancy::ResponsibleWithoutLocation { tool_id: tool.id })
        }
        (ToolState::InStorage, Some(row)) => Some(Discrepancy::OpenMovementWhileInStorage {
            tool_id: tool.id,
            history_id: row.id,
        }),
        (ToolState::InStorage, None) => None,
        (ToolState::CheckedOut { location, responsible }, Some(row))
            if location != row.location || responsible != row.responsible_id =>
        {
            Some(Discrepancy::MovementMismatch {
                tool_id: tool.id,
                history_id: row.id,
            })
        }
        (ToolState::CheckedOut { .. }, Some(_)) => None,
        (ToolState::CheckedOut { .. }, None) => {
            Some(Discrepancy::CheckedOutWithoutMovement { tool_id: tool.id })
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    storage_location: String,
    locks: ToolLocks,
}

impl Reconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        storage_location: String,
        locks: ToolLocks,
    ) -> Self {
        Self {
            db,
            event_sender,
            storage_location,
            locks,
        }
    }

    /// Lists every tool whose movement fields disagree with the ledger.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<Vec<Discrepancy>, ServiceError> {
        let db = self.db.as_ref();

        let mut open_by_tool: BTreeMap<Uuid, Vec<HistoryModel>> = BTreeMap::new();
        for row in HistoryRepository::new(db).find_open().await? {
            open_by_tool.entry(row.tool_id).or_default().push(row);
        }

        let tools = ToolRepository::new(db);
        let mut candidates: BTreeMap<Uuid, ToolModel> = tools
            .find_not_in_storage(&self.storage_location)
            .await?
            .into_iter()
            .map(|tool| (tool.id, tool))
            .collect();
        let missing: Vec<Uuid> = open_by_tool
            .keys()
            .filter(|id| !candidates.contains_key(id))
            .copied()
            .collect();
        for tool in tools.find_by_ids(missing).await? {
            candidates.insert(tool.id, tool);
        }

        let discrepancies: Vec<Discrepancy> = candidates
            .values()
            .filter_map(|tool| {
                let open = open_by_tool.get(&tool.id).map(Vec::as_slice).unwrap_or(&[]);
                classify(tool, open, &self.storage_location)
            })
            .collect();

        for discrepancy in &discrepancies {
            warn!(
                tool_id = %discrepancy.tool_id(),
                kind = discrepancy.kind(),
                "Ledger discrepancy found"
            );
        }
        info!(count = discrepancies.len(), "Ledger scan complete");

        Ok(discrepancies)
    }

    /// Makes the tool follow its single open movement, or puts it back in storage when none is open.
    #[instrument(skip(self))]
    pub async fn repair(&self, discrepancy: &Discrepancy) -> Result<ToolModel, ServiceError> {
        let tool_id = discrepancy.tool_id();
        if !discrepancy.is_repairable() {
            error!(%tool_id, kind = discrepancy.kind(), "Refusing to pick between open movements");
            return Err(ServiceError::Consistency(format!(
                "Tool {} has several open movements; close the wrong ones by entry first",
                tool_id
            )));
        }

        let _guard = self.locks.acquire(tool_id).await;
        let db = self.db.as_ref();

        let open = HistoryRepository::new(db).find_open_for_tool(tool_id, 2).await?;
        let tools = ToolRepository::new(db);
        let repaired = match open.as_slice() {
            [] => {
                tools
                    .set_movement(tool_id, &self.storage_location, None, None)
                    .await?
            }
            [row] => {
                tools
                    .set_movement(tool_id, &row.location, Some(row.responsible_id), None)
                    .await?
            }
            _ => {
                return Err(ServiceError::Consistency(format!(
                    "Tool {} gained another open movement during repair",
                    tool_id
                )))
            }
        };

        counter!("toolroom_ledger.repairs", 1);
        warn!(
            %tool_id,
            kind = discrepancy.kind(),
            location = %repaired.current_location,
            "Tool movement fields repaired from ledger"
        );
        self.event_sender
            .send_or_log(Event::LedgerRepaired { tool_id })
            .await;

        Ok(repaired)
    }

    /// Scans and repairs everything repairable.
    #[instrument(skip(self))]
    pub async fn repair_all(&self) -> Result<ReconcileReport, ServiceError> {
        let discrepancies = self.scan().await?;
        Ok(self.repair_each(discrepancies).await)
    }

    /// Repairs each discrepancy in turn. A failed repair lands in `unresolved`
    /// and does not stop the rest.
    pub async fn repair_each(&self, discrepancies: Vec<Discrepancy>) -> ReconcileReport {
        let mut report = ReconcileReport {
            discrepancies: discrepancies.clone(),
            ..Default::default()
        };

        for discrepancy in discrepancies {
            if !discrepancy.is_repairable() {
                report.unresolved.push(discrepancy);
                continue;
            }
            match self.repair(&discrepancy).await {
                Ok(tool) => report.repaired.push(tool.id),
                Err(e) => {
                    counter!("toolroom_ledger.repair_failures", 1);
                    error!(
                        tool_id = %discrepancy.tool_id(),
                        kind = discrepancy.kind(),
                        error = %e,
                        "Repair failed"
                    );
                    report.unresolved.push(discrepancy);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ToolStatus, ToolType, STORAGE_LOCATION};
    use chrono::Utc;

    fn tool(location: &str, responsible: Option<Uuid>) -> ToolModel {
        ToolModel {
            id: Uuid::new_v4(),
            name: "Ladder".into(),
            brand: "Werner".into(),
            serial: "L-7".into(),
            tool_type: ToolType::HeightEquipment,
            status: ToolStatus::Active,
            current_location: location.into(),
            current_responsible: responsible,
            description: None,
            created_at: Utc::now(),
            search_name: String::new(),
            search_serial: String::new(),
        }
    }

    fn open_row(tool_id: Uuid, location: &str, responsible_id: Uuid) -> HistoryModel {
        HistoryModel {
            id: Uuid::new_v4(),
            tool_id,
            withdrawn_at: Utc::now(),
            entry_at: None,
            responsible_id,
            location: location.into(),
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn consistent_checked_out_tool_is_clean() {
        let who = Uuid::new_v4();
        let t = tool("Site A", Some(who));
        let rows = [open_row(t.id, "Site A", who)];
        assert_eq!(classify(&t, &rows, STORAGE_LOCATION), None);
    }

    #[test]
    fn open_row_on_stored_tool_is_partial_withdraw_residue() {
        let t = tool(STORAGE_LOCATION, None);
        let rows = [open_row(t.id, "Site A", Uuid::new_v4())];
        assert_eq!(
            classify(&t, &rows, STORAGE_LOCATION),
            Some(Discrepancy::OpenMovementWhileInStorage {
                tool_id: t.id,
                history_id: rows[0].id
            })
        );
    }

    #[test]
    fn checked_out_without_open_row() {
        let t = tool("Site B", Some(Uuid::new_v4()));
        assert_eq!(
            classify(&t, &[], STORAGE_LOCATION),
            Some(Discrepancy::CheckedOutWithoutMovement { tool_id: t.id })
        );
    }

    #[test]
    fn mismatched_location_is_reported() {
        let who = Uuid::new_v4();
        let t = tool("Site B", Some(who));
        let rows = [open_row(t.id, "Site A", who)];
        assert!(matches!(
            classify(&t, &rows, STORAGE_LOCATION),
            Some(Discrepancy::MovementMismatch { .. })
        ));
    }

    #[test]
    fn broken_tool_invariant_wins_over_row_checks() {
        let t = tool(STORAGE_LOCATION, Some(Uuid::new_v4()));
        assert_eq!(
            classify(&t, &[], STORAGE_LOCATION),
            Some(Discrepancy::ResponsibleWithoutLocation { tool_id: t.id })
        );
    }

    #[test]
    fn multiple_open_rows_are_not_repairable() {
        let t = tool("Site A", Some(Uuid::new_v4()));
        let rows = [
            open_row(t.id, "Site A", Uuid::new_v4()),
            open_row(t.id, "Site B", Uuid::new_v4()),
        ];
        let found = classify(&t, &rows, STORAGE_LOCATION).unwrap();
        assert_eq!(found.kind(), "multiple_open_movements");
        assert!(!found.is_repairable());
    }

    #[test]
    fn configured_storage_location_decides_what_is_stored() {
        let stored = tool("Warehouse", None);
        assert_eq!(classify(&stored, &[], "Warehouse"), None);

        let who = Uuid::new_v4();
        let out = tool(STORAGE_LOCATION, Some(who));
        let rows = [open_row(out.id, STORAGE_LOCATION, who)];
        assert_eq!(classify(&out, &rows, "Warehouse"), None);
        assert_eq!(
            classify(&out, &[], "Warehouse"),
            Some(Discrepancy::CheckedOutWithoutMovement { tool_id: out.id })
        );
    }
}
