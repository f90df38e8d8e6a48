use crate::{
    auth::{consts as perm, Principal},
    commands::Command,
    entities::ProfileModel,
    errors::ServiceError,
    services::profiles::{RegisterProfileInput, SimpleProfile},
    services::AppServices,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserCommand {
    pub input: RegisterProfileInput,
}

#[async_trait]
impl Command for RegisterUserCommand {
    type Result = ProfileModel;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::USERS_CREATE)?;
        services.profiles.register(self.input.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserListing {
    Full(Vec<ProfileModel>),
    Simple(Vec<SimpleProfile>),
}

/// Full profiles (newest first), or id/name pairs for a responsible picker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUsersCommand {
    pub simple: bool,
}

#[async_trait]
impl Command for ListUsersCommand {
    type Result = UserListing;

    #[instrument(skip(self, services), fields(actor = %actor.user_id))]
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError> {
        actor.require(perm::USERS_READ)?;
        if self.simple {
            Ok(UserListing::Simple(services.profiles.list_simple().await?))
        } else {
            Ok(UserListing::Full(services.profiles.list_all().await?))
        }
    }
}

/// Password sign-in against the identity provider, resolved to a principal.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct LoginUser {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
}

impl std::fmt::Debug for LoginUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginUser")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl LoginUser {
    /// No principal exists yet, so this runs outside the `Command` trait.
    #[instrument(skip(services))]
    pub async fn execute(&self, services: &AppServices) -> Result<Principal, ServiceError> {
        self.validate()?;
        let session = services
            .identity
            .sign_in(self.email.trim(), &self.password)
            .await
            .map_err(|e| {
                warn!(error = %e, "Sign-in rejected");
                e
            })?;

        let principal = services.profiles.resolve_principal(session.user_id).await?;
        info!(user_id = %principal.user_id, role = %principal.role, "User signed in");
        Ok(principal)
    }
}
