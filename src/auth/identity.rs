//! Seam to the external identity provider that owns credentials.

use crate::errors::ServiceError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// An authenticated session as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates an account and returns the id the profile row must reuse.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, ServiceError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError>;

    async fn sign_out(&self) -> Result<(), ServiceError>;

    async fn current_session(&self) -> Result<Option<Session>, ServiceError>;
}

/// Provider for trusted local use (the CLI). It issues account ids but never holds credentials,
/// so password sign-in is always refused.
#[derive(Debug, Default)]
pub struct LocalIdentityProvider {
    accounts: DashMap<String, Uuid>,
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    #[instrument(skip(self, _password))]
    async fn sign_up(&self, email: &str, _password: &str) -> Result<Uuid, ServiceError> {
        let key = email.trim().to_lowercase();
        if self.accounts.contains_key(&key) {
            return Err(ServiceError::Conflict(format!(
                "account already exists for {}",
                key
            )));
        }
        let user_id = Uuid::new_v4();
        self.accounts.insert(key, user_id);
        info!(%user_id, "Issued local account");
        Ok(user_id)
    }

    async fn sign_in(&self, email: &str, _password: &str) -> Result<Session, ServiceError> {
        warn!(email, "Password sign-in attempted against the local identity provider");
        Err(ServiceError::IdentityError(
            "password sign-in is delegated to the external identity provider".to_string(),
        ))
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, ServiceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn local_provider_issues_distinct_ids_and_rejects_duplicates() {
        let provider = LocalIdentityProvider::new();
        let a = provider.sign_up("ana@example.com", "secret1").await.unwrap();
        let b = provider.sign_up("bo@example.com", "secret1").await.unwrap();
        assert_ne!(a, b);

        let dup = provider.sign_up(" ANA@example.com", "secret1").await;
        assert_matches!(dup, Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn local_provider_refuses_password_sign_in() {
        let provider = LocalIdentityProvider::new();
        assert_matches!(
            provider.sign_in("ana@example.com", "secret1").await,
            Err(ServiceError::IdentityError(_))
        );
        assert_eq!(provider.current_session().await.unwrap(), None);
    }
}
