use crate::{
    auth::{consts as perm, Principal},
    commands::Command,
    errors::ServiceError,
    services::reconciliation::ReconcileReport,
    services::AppServices,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Scan the ledger; with `repair`, also fix everything fixable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileCommand {
    pub repair: bool,
}

#[async_trait]
impl Command for ReconcileCommand {
    type Result = ReconcileReport;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::LEDGER_RECONCILE)?;

        if self.repair {
            return services.reconciler.repair_all().await;
        }

        let discrepancies = services.reconciler.scan().await?;
        Ok(ReconcileReport {
            unresolved: discrepancies.clone(),
            discrepancies,
            repaired: Vec::new(),
        })
    }
}
