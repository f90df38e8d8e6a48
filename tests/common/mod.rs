#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use tokio::sync::mpsc;
use toolroom::{
    auth::{IdentityProvider, LocalIdentityProvider, Principal},
    config::AppConfig,
    db,
    entities::{Role, Tool, ToolModel, ToolType},
    events::{self, Event},
    services::{
        catalog::CreateToolInput,
        profiles::RegisterProfileInput,
        AppServices,
    },
};
use uuid::Uuid;

/// Services wired to a fresh, migrated in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub config: AppConfig,
    pub events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        Self::with_identity(config, Arc::new(LocalIdentityProvider::new())).await
    }

    pub async fn with_identity(config: AppConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let pool = db::establish_connection(&config.database_url)
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to migrate test database");
        let db = Arc::new(pool);

        let (sender, events) = events::channel(256);
        let services = AppServices::new(db.clone(), Arc::new(sender), &config, identity);

        Self {
            db,
            services,
            config,
            events,
        }
    }

    pub fn admin(&self) -> Principal {
        Principal::new(Uuid::nil(), Role::Admin)
    }

    pub async fn register_user(&self, first_name: &str, last_name: &str, role: Role) -> Principal {
        let profile = self
            .services
            .profiles
            .register(RegisterProfileInput {
                email: format!(
                    "{}.{}@example.com",
                    first_name.to_lowercase(),
                    last_name.to_lowercase()
                ),
                password: "secret-pass".to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                role,
            })
            .await
            .expect("profile registration");
        Principal::from_profile(&profile)
    }

    pub async fn register_tool(&self, name: &str, serial: &str, tool_type: ToolType) -> ToolModel {
        self.services
            .catalog
            .register(CreateToolInput {
                name: name.to_string(),
                brand: "Bosch".to_string(),
                serial: serial.to_string(),
                tool_type,
                description: None,
            })
            .await
            .expect("tool registration")
    }

    pub async fn reload_tool(&self, id: Uuid) -> ToolModel {
        Tool::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .expect("query tool")
            .expect("tool exists")
    }

    /// Counts open movements straight from the table.
    pub async fn open_movement_count(&self, tool_id: Uuid) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        use toolroom::entities::tool_history::Column;
        toolroom::entities::ToolHistory::find()
            .filter(Column::ToolId.eq(tool_id))
            .filter(Column::EntryAt.is_null())
            .all(self.db.as_ref())
            .await
            .expect("query movements")
            .len()
    }

    /// Removes the one-open-movement index so tests can fabricate corrupt ledgers.
    pub async fn drop_open_movement_index(&self) {
        self.db
            .execute_unprepared("DROP INDEX IF EXISTS idx_tool_history_open_movement")
            .await
            .expect("drop index");
    }

    /// Drains events emitted so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    config.db_max_connections = 1;
    config.db_min_connections = 1;
    config
}

/// Fixed timestamp helper: 2025-03-{day} {hour}:00:00 UTC.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}
