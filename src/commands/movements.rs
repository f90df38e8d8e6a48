use crate::{
    auth::{consts as perm, Principal},
    commands::Command,
    entities::HistoryModel,
    errors::ServiceError,
    services::ledger::{
        EntryRequest, MovementRecord, PendingMovement, ReturnRequest, WithdrawRequest,
    },
    services::AppServices,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Check a tool out. The withdrawal time defaults to now.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterWithdrawalCommand {
    pub tool_id: Uuid,
    pub responsible_id: Uuid,
    #[validate(length(min = 1, max = 255, message = "Location is required"))]
    pub location: String,
    pub withdrawn_at: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[async_trait]
impl Command for RegisterWithdrawalCommand {
    type Result = HistoryModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, tool_id = %self.tool_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_CREATE)?;
        self.validate()?;

        services
            .ledger
            .withdraw(WithdrawRequest {
                tool_id: self.tool_id,
                responsible_id: self.responsible_id,
                location: self.location.clone(),
                withdrawn_at: self.withdrawn_at.unwrap_or_else(Utc::now),
                notes: self.notes.clone(),
            })
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterReturnCommand {
    pub tool_id: Uuid,
    pub returned_at: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[async_trait]
impl Command for RegisterReturnCommand {
    type Result = HistoryModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, tool_id = %self.tool_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_CREATE)?;
        self.validate()?;

        services
            .ledger
            .return_tool(ReturnRequest {
                tool_id: self.tool_id,
                returned_at: self.returned_at.unwrap_or_else(Utc::now),
                notes: self.notes.clone(),
            })
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterEntryCommand {
    pub tool_id: Uuid,
    pub history_id: Uuid,
    pub entry_at: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[async_trait]
impl Command for RegisterEntryCommand {
    type Result = HistoryModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, history_id = %self.history_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_CREATE)?;
        self.validate()?;

        services
            .ledger
            .register_entry(EntryRequest {
                tool_id: self.tool_id,
                history_id: self.history_id,
                entry_at: self.entry_at.unwrap_or_else(Utc::now),
                notes: self.notes.clone(),
            })
            .await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPendingMovementsCommand;

#[async_trait]
impl Command for ListPendingMovementsCommand {
    type Result = Vec<PendingMovement>;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_READ)?;
        services.ledger.pending_movements().await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAllMovementsCommand;

#[async_trait]
impl Command for ListAllMovementsCommand {
    type Result = Vec<MovementRecord>;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_READ)?;
        services.ledger.all_movements().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHistoryCommand {
    pub tool_id: Uuid,
}

#[async_trait]
impl Command for ToolHistoryCommand {
    type Result = Vec<HistoryModel>;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, tool_id = %self.tool_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::MOVEMENTS_READ)?;
        services.ledger.history_for_tool(self.tool_id).await
    }
}
