use crate::{
    auth::{consts as perm, Principal},
    commands::Command,
    entities::ToolModel,
    errors::ServiceError,
    services::catalog::{CreateToolInput, ToolPage, ToolPatch, ToolQuery, UpdateToolInput},
    services::AppServices,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterToolCommand {
    pub input: CreateToolInput,
}

#[async_trait]
impl Command for RegisterToolCommand {
    type Result = ToolModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::TOOLS_CREATE)?;
        services.catalog.register(self.input.clone()).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsCommand {
    pub query: ToolQuery,
}

#[async_trait]
impl Command for ListToolsCommand {
    type Result = ToolPage;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::TOOLS_READ)?;
        services.catalog.list(self.query.clone()).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetToolCommand {
    pub tool_id: Uuid,
}

#[async_trait]
impl Command for GetToolCommand {
    type Result = ToolModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::TOOLS_READ)?;
        services.catalog.get(self.tool_id).await
    }
}

/// Typed edits plus optional raw `key=value` edits; typed fields win on overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateToolCommand {
    pub tool_id: Uuid,
    pub input: UpdateToolInput,
    #[serde(default)]
    pub patch: Option<ToolPatch>,
}

#[async_trait]
impl Command for UpdateToolCommand {
    type Result = ToolModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, tool_id = %self.tool_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::TOOLS_UPDATE)?;
        let input = match self.patch.clone() {
            Some(patch) => self.input.clone().merge(patch.into_update()?),
            None => self.input.clone(),
        };
        services.catalog.update(self.tool_id, input).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetireToolCommand {
    pub tool_id: Uuid,
}

#[async_trait]
impl Command for RetireToolCommand {
    type Result = ToolModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id, tool_id = %self.tool_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::TOOLS_DELETE)?;
        services.catalog.soft_delete(self.tool_id).await
    }
}
