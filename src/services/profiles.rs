//! Profile directory: the people tools can be checked out to.

use chrono::Utc;
use sea_orm::{ActiveValue::Set, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{IdentityProvider, Principal};
use crate::entities::profile::ActiveModel as ProfileActiveModel;
use crate::entities::{ProfileModel, Role};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::ProfileRepository;

#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct RegisterProfileInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 80))]
    pub first_name: String,
    #[validate(length(min = 1, max = 80))]
    pub last_name: String,
    pub role: Role,
}

// Keeps the password out of logs and spans.
impl std::fmt::Debug for RegisterProfileInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterProfileInput")
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Picker entry for choosing a responsible person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleProfile {
    pub id: Uuid,
    pub full_name: String,
}

#[derive(Clone)]
pub struct ProfileDirectory {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    identity: Arc<dyn IdentityProvider>,
}

impl ProfileDirectory {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            db,
            event_sender,
            identity,
        }
    }

    /// Creates the identity account, then the profile row under the issued id.
    #[instrument(skip(self))]
    pub async fn register(&self, input: RegisterProfileInput) -> Result<ProfileModel, ServiceError> {
        input.validate()?;
        let email = input.email.trim().to_lowercase();
        let first_name = input.first_name.trim().to_string();
        let last_name = input.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(ServiceError::ValidationError(
                "first and last name must not be blank".to_string(),
            ));
        }

        let profiles = ProfileRepository::new(self.db.as_ref());
        if profiles.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "A profile for {} already exists",
                email
            )));
        }

        let user_id = self.identity.sign_up(&email, &input.password).await?;

        let profile = profiles
            .create(ProfileActiveModel {
                id: Set(user_id),
                email: Set(email),
                first_name: Set(first_name),
                last_name: Set(last_name),
                role: Set(input.role),
                created_at: Set(Utc::now()),
            })
            .await
            .map_err(|e| {
                error!(%user_id, error = %e, "Identity account created but profile insert failed");
                ServiceError::partial(user_id, "identity account", "profile insert", e)
            })?;

        info!(user_id = %profile.id, role = %profile.role, "Profile registered");
        self.event_sender
            .send_or_log(Event::ProfileRegistered(profile.id))
            .await;

        Ok(profile)
    }

    /// All profiles, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<ProfileModel>, ServiceError> {
        ProfileRepository::new(self.db.as_ref())
            .find_newest_first()
            .await
    }

    /// Id and display name of every profile, by first name.
    #[instrument(skip(self))]
    pub async fn list_simple(&self) -> Result<Vec<SimpleProfile>, ServiceError> {
        let profiles = ProfileRepository::new(self.db.as_ref())
            .find_by_first_name()
            .await?;
        Ok(profiles
            .into_iter()
            .map(|profile| SimpleProfile {
                id: profile.id,
                full_name: profile.full_name(),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ProfileModel, ServiceError> {
        ProfileRepository::new(self.db.as_ref()).get(id).await
    }

    pub async fn count(&self) -> Result<u64, ServiceError> {
        ProfileRepository::new(self.db.as_ref()).count().await
    }

    /// Turns an identity-provider user id into a principal with the stored role.
    #[instrument(skip(self))]
    pub async fn resolve_principal(&self, user_id: Uuid) -> Result<Principal, ServiceError> {
        let profile = self.get(user_id).await.map_err(|e| match e {
            ServiceError::NotFound(_) => {
                ServiceError::Forbidden(format!("user {} has no profile", user_id))
            }
            other => other,
        })?;
        Ok(Principal::from_profile(&profile))
    }
}
