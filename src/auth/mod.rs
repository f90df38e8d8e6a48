/*!
 * # Authorization Module
 *
 * Credentials live with an external identity provider. This module turns a
 * signed-in user into a [`Principal`] and answers one question for every use
 * case: does this principal hold the permission?
 */

pub mod identity;
pub mod permissions;
pub mod rbac;

pub use identity::{IdentityProvider, LocalIdentityProvider, Session};
pub use permissions::consts;
pub use rbac::AccessPolicy;

use crate::entities::{ProfileModel, Role};
use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Resolved caller: user id plus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn from_profile(profile: &ProfileModel) -> Self {
        Self::new(profile.id, profile.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can(&self, permission: &str) -> bool {
        AccessPolicy::allows(self.role, permission)
    }

    pub fn require(&self, permission: &str) -> Result<(), ServiceError> {
        if self.can(permission) {
            return Ok(());
        }
        warn!(user_id = %self.user_id, role = %self.role, permission, "Permission denied");
        Err(ServiceError::Forbidden(format!(
            "{} role lacks permission {}",
            self.role, permission
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn user_cannot_create_tools_but_admin_can() {
        let user = Principal::new(Uuid::new_v4(), Role::User);
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);

        assert_matches!(
            user.require(consts::TOOLS_CREATE),
            Err(ServiceError::Forbidden(msg)) if msg.contains("tools:create")
        );
        assert!(admin.require(consts::TOOLS_CREATE).is_ok());
        assert!(user.require(consts::MOVEMENTS_CREATE).is_ok());
    }
}
