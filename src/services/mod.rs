// Movement ledger (core)
pub mod ledger;
pub mod reconciliation;

// Catalog and people
pub mod catalog;
pub mod profiles;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::config::AppConfig;
use crate::events::EventSender;

use catalog::CatalogService;
use ledger::{MovementLedger, ToolLocks};
use profiles::ProfileDirectory;
use reconciliation::Reconciler;

/// Every service the use cases call into, sharing one pool, one event channel and one lock table.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: Arc<MovementLedger>,
    pub catalog: Arc<CatalogService>,
    pub profiles: Arc<ProfileDirectory>,
    pub reconciler: Arc<Reconciler>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let locks = ToolLocks::new();
        let storage_location = config.ledger.storage_location.clone();

        Self {
            ledger: Arc::new(MovementLedger::new(
                db.clone(),
                event_sender.clone(),
                config.ledger.clone(),
                locks.clone(),
            )),
            catalog: Arc::new(CatalogService::new(
                db.clone(),
                event_sender.clone(),
                config.catalog.clone(),
                storage_location.clone(),
            )),
            profiles: Arc::new(ProfileDirectory::new(
                db.clone(),
                event_sender.clone(),
                identity.clone(),
            )),
            reconciler: Arc::new(Reconciler::new(db, event_sender, storage_location, locks)),
            identity,
        }
    }
}
