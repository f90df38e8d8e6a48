/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Maps each profile role to the permissions it holds.
 */

use super::permissions::{consts, permission_matches};
use crate::entities::Role;
use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::debug;

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role: Role,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

lazy_static! {
    pub static ref ROLES: HashMap<Role, RoleGrant> = {
        let mut roles = HashMap::new();

        // Admin role - has all permissions
        roles.insert(
            Role::Admin,
            RoleGrant {
                role: Role::Admin,
                description: "Tool room administrator with full access",
                permissions: vec![consts::ALL],
            },
        );

        // Employees check tools out and in and pick a responsible
        roles.insert(
            Role::User,
            RoleGrant {
                role: Role::User,
                description: "Employee who withdraws and returns tools",
                permissions: vec![
                    consts::TOOLS_READ,
                    consts::MOVEMENTS_READ,
                    consts::MOVEMENTS_CREATE,
                    consts::USERS_READ,
                ],
            },
        );

        roles
    };
}

/// Capability table lookup
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// Get the grant for a role
    pub fn grant(role: Role) -> Option<&'static RoleGrant> {
        ROLES.get(&role)
    }

    /// Get all permissions held by a role
    pub fn permissions(role: Role) -> Vec<&'static str> {
        Self::grant(role)
            .map(|grant| grant.permissions.clone())
            .unwrap_or_default()
    }

    pub fn allows(role: Role, required: &str) -> bool {
        let allowed = Self::grant(role)
            .map(|grant| {
                grant
                    .permissions
                    .iter()
                    .any(|granted| permission_matches(granted, required))
            })
            .unwrap_or(false);
        debug!(%role, permission = required, allowed, "Access check");
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(consts::TOOLS_READ, true)]
    #[case(consts::MOVEMENTS_READ, true)]
    #[case(consts::MOVEMENTS_CREATE, true)]
    #[case(consts::USERS_READ, true)]
    #[case(consts::TOOLS_CREATE, false)]
    #[case(consts::TOOLS_UPDATE, false)]
    #[case(consts::TOOLS_DELETE, false)]
    #[case(consts::USERS_CREATE, false)]
    #[case(consts::LEDGER_RECONCILE, false)]
    fn user_role_grants(#[case] permission: &str, #[case] expected: bool) {
        assert_eq!(AccessPolicy::allows(Role::User, permission), expected);
    }

    #[rstest]
    #[case(consts::TOOLS_CREATE)]
    #[case(consts::USERS_CREATE)]
    #[case(consts::LEDGER_RECONCILE)]
    fn admin_holds_everything(#[case] permission: &str) {
        assert!(AccessPolicy::allows(Role::Admin, permission));
    }

    #[test]
    fn every_role_has_a_grant() {
        use sea_orm::Iterable;
        for role in Role::iter() {
            assert!(!AccessPolicy::permissions(role).is_empty(), "{role}");
        }
    }
}
