mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{at, TestApp};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseBackend, DbErr, IntoActiveModel, MockDatabase,
};
use toolroom::{
    commands::{Command, ReconcileCommand},
    config::LedgerConfig,
    entities::{
        profile, tool, tool_history, Role, ToolStatus, ToolType, STORAGE_LOCATION,
    },
    events,
    services::{
        ledger::{MovementLedger, ToolLocks, WithdrawRequest},
        reconciliation::Discrepancy,
    },
    ServiceError,
};
use uuid::Uuid;

fn sample_profile(id: Uuid) -> profile::Model {
    profile::Model {
        id,
        email: "ana.souza@example.com".to_string(),
        first_name: "Ana".to_string(),
        last_name: "Souza".to_string(),
        role: Role::User,
        created_at: Utc::now(),
    }
}

fn sample_tool(id: Uuid) -> tool::Model {
    tool::Model {
        id,
        name: "Drill".to_string(),
        brand: "Bosch".to_string(),
        serial: "SN-1".to_string(),
        tool_type: ToolType::Electrical,
        status: ToolStatus::Active,
        current_location: STORAGE_LOCATION.to_string(),
        current_responsible: None,
        description: None,
        created_at: Utc::now(),
        search_name: "drill".to_string(),
        search_serial: "sn-1".to_string(),
    }
}

fn mock_ledger(atomic_writes: bool, tool_id: Uuid, responsible_id: Uuid) -> MovementLedger {
    let movement = tool_history::Model {
        id: Uuid::new_v4(),
        tool_id,
        withdrawn_at: at(1, 8),
        entry_at: None,
        responsible_id,
        location: "Site A".to_string(),
        notes: None,
        created_at: Utc::now(),
    };

    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![sample_profile(responsible_id)]])
        .append_query_results([vec![sample_tool(tool_id)]])
        // no open movement, no earlier movement
        .append_query_results([Vec::<tool_history::Model>::new()])
        .append_query_results([Vec::<tool_history::Model>::new()])
        .append_query_results([vec![movement]])
        .append_query_errors([DbErr::Custom("connection reset".to_string())])
        .into_connection();

    let (sender, _rx) = events::channel(16);
    MovementLedger::new(
        Arc::new(db),
        Arc::new(sender),
        LedgerConfig {
            storage_location: STORAGE_LOCATION.to_string(),
            atomic_writes,
        },
        ToolLocks::new(),
    )
}

fn request(tool_id: Uuid, responsible_id: Uuid) -> WithdrawRequest {
    WithdrawRequest {
        tool_id,
        responsible_id,
        location: "Site A".to_string(),
        withdrawn_at: at(1, 8),
        notes: None,
    }
}

#[tokio::test]
async fn non_atomic_withdraw_reports_partial_update_when_tool_write_fails() {
    let tool_id = Uuid::new_v4();
    let responsible_id = Uuid::new_v4();
    let ledger = mock_ledger(false, tool_id, responsible_id);

    let err = ledger
        .withdraw(request(tool_id, responsible_id))
        .await
        .unwrap_err();

    assert_matches!(
        &err,
        ServiceError::PartialUpdate { subject, completed, failed, source }
            if *subject == tool_id
                && completed.starts_with("history ")
                && *failed == "tool update"
                && matches!(**source, ServiceError::DatabaseError(_))
    );
    assert_eq!(err.kind(), "partial_update");
    assert_eq!(err.exit_code(), 6);
}

#[tokio::test]
async fn atomic_withdraw_surfaces_plain_store_error() {
    let tool_id = Uuid::new_v4();
    let responsible_id = Uuid::new_v4();
    let ledger = mock_ledger(true, tool_id, responsible_id);

    let err = ledger
        .withdraw(request(tool_id, responsible_id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::DatabaseError(DbErr::Custom(_)));
}

/// Simulates the state a partial update leaves behind: an open row, a tool still in storage.
async fn open_row_behind_ledger(app: &TestApp, tool_id: Uuid, responsible_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    tool_history::ActiveModel {
        id: Set(id),
        tool_id: Set(tool_id),
        withdrawn_at: Set(at(2, 8)),
        entry_at: Set(None),
        responsible_id: Set(responsible_id),
        location: Set("Site B".to_string()),
        notes: Set(None),
        created_at: Set(at(2, 8)),
    }
    .insert(app.db.as_ref())
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn reconciler_repairs_tool_left_in_storage_with_open_movement() {
    let app = TestApp::new().await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Drill", "SN-10", ToolType::Electrical).await;
    let history_id = open_row_behind_ledger(&app, tool.id, worker.user_id).await;

    let found = app.services.reconciler.scan().await.unwrap();
    assert_eq!(
        found,
        vec![Discrepancy::OpenMovementWhileInStorage {
            tool_id: tool.id,
            history_id
        }]
    );

    let report = app.services.reconciler.repair_all().await.unwrap();
    assert_eq!(report.repaired, vec![tool.id]);
    assert!(report.unresolved.is_empty());

    let repaired = app.reload_tool(tool.id).await;
    assert_eq!(repaired.current_location, "Site B");
    assert_eq!(repaired.current_responsible, Some(worker.user_id));
    assert!(app.services.reconciler.scan().await.unwrap().is_empty());

    // the repaired tool can now be returned normally
    app.services
        .ledger
        .return_tool(toolroom::services::ledger::ReturnRequest {
            tool_id: tool.id,
            returned_at: at(3, 8),
            notes: None,
        })
        .await
        .unwrap();
    assert!(app.reload_tool(tool.id).await.is_in_storage(STORAGE_LOCATION));
}

#[tokio::test]
async fn reconciler_returns_orphaned_checkout_to_storage() {
    let app = TestApp::new().await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Ladder", "SN-11", ToolType::HeightEquipment).await;

    let mut stray = app.reload_tool(tool.id).await.into_active_model();
    stray.current_location = Set("Site C".to_string());
    stray.current_responsible = Set(Some(worker.user_id));
    stray.update(app.db.as_ref()).await.unwrap();

    let found = app.services.reconciler.scan().await.unwrap();
    assert_eq!(
        found,
        vec![Discrepancy::CheckedOutWithoutMovement { tool_id: tool.id }]
    );

    let repaired = app.services.reconciler.repair(&found[0]).await.unwrap();
    assert!(repaired.is_in_storage(STORAGE_LOCATION));
}

#[tokio::test]
async fn reconciler_leaves_multiple_open_movements_unresolved() {
    let app = TestApp::new().await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Saw", "SN-12", ToolType::Manual).await;
    app.drop_open_movement_index().await;
    open_row_behind_ledger(&app, tool.id, worker.user_id).await;
    open_row_behind_ledger(&app, tool.id, worker.user_id).await;

    let report = ReconcileCommand { repair: true }
        .execute(&app.services, &app.admin())
        .await
        .unwrap();

    assert!(report.repaired.is_empty());
    assert_eq!(report.unresolved.len(), 1);
    assert_matches!(
        &report.unresolved[0],
        Discrepancy::MultipleOpenMovements { history_ids, .. } if history_ids.len() == 2
    );

    let err = app
        .services
        .reconciler
        .repair(&report.unresolved[0])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Consistency(_));
}

#[tokio::test]
async fn reconcile_command_requires_admin() {
    let app = TestApp::new().await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;

    let err = ReconcileCommand::default()
        .execute(&app.services, &worker)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn non_atomic_mode_still_moves_tools_on_sqlite() {
    let mut config = common::test_config();
    config.ledger.atomic_writes = false;
    let app = TestApp::with_config(config).await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Drill", "SN-13", ToolType::Electrical).await;

    app.services
        .ledger
        .withdraw(WithdrawRequest {
            tool_id: tool.id,
            responsible_id: worker.user_id,
            location: "Site A".to_string(),
            withdrawn_at: at(4, 8),
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(app.reload_tool(tool.id).await.current_location, "Site A");
    assert!(app.services.reconciler.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_repair_is_reported_and_the_rest_still_run() {
    let app = TestApp::new().await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Drill", "SN-14", ToolType::Electrical).await;
    open_row_behind_ledger(&app, tool.id, worker.user_id).await;

    let vanished = Discrepancy::CheckedOutWithoutMovement {
        tool_id: Uuid::new_v4(),
    };
    let err = app.services.reconciler.repair(&vanished).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let mut discrepancies = vec![vanished.clone()];
    discrepancies.extend(app.services.reconciler.scan().await.unwrap());
    let report = app.services.reconciler.repair_each(discrepancies).await;

    assert_eq!(report.discrepancies.len(), 2);
    assert_eq!(report.repaired, vec![tool.id]);
    assert_eq!(report.unresolved, vec![vanished]);
    assert_eq!(app.reload_tool(tool.id).await.current_location, "Site B");
}

#[tokio::test]
async fn configured_storage_location_is_used_end_to_end() {
    let mut config = common::test_config();
    config.ledger.storage_location = "Warehouse".to_string();
    let app = TestApp::with_config(config).await;
    let worker = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Drill", "SN-15", ToolType::Electrical).await;
    assert!(tool.is_in_storage("Warehouse"));

    // the default storage name is an ordinary site here
    app.services
        .ledger
        .withdraw(WithdrawRequest {
            tool_id: tool.id,
            responsible_id: worker.user_id,
            location: STORAGE_LOCATION.to_string(),
            withdrawn_at: at(4, 8),
            notes: None,
        })
        .await
        .unwrap();
    assert!(app.services.reconciler.scan().await.unwrap().is_empty());

    app.services
        .ledger
        .return_tool(toolroom::services::ledger::ReturnRequest {
            tool_id: tool.id,
            returned_at: at(4, 17),
            notes: None,
        })
        .await
        .unwrap();
    let returned = app.reload_tool(tool.id).await;
    assert!(returned.is_in_storage("Warehouse"));
    assert_eq!(returned.current_responsible, None);
}
