/*!
 * # Permissions Module
 *
 * Permission strings are `resource:action`. A trailing `:*` grants every
 * action on a resource and a bare `*` grants everything.
 */

/// Common permission string constants for compile-time safety
pub mod consts {
    // Catalog
    pub const TOOLS_READ: &str = "tools:read";
    pub const TOOLS_CREATE: &str = "tools:create";
    pub const TOOLS_UPDATE: &str = "tools:update";
    pub const TOOLS_DELETE: &str = "tools:delete";

    // Ledger movements
    pub const MOVEMENTS_READ: &str = "movements:read";
    pub const MOVEMENTS_CREATE: &str = "movements:create";

    // Profiles
    pub const USERS_READ: &str = "users:read";
    pub const USERS_CREATE: &str = "users:create";

    pub const LEDGER_RECONCILE: &str = "ledger:reconcile";

    pub const ALL: &str = "*";
}

/// Whether a granted permission covers the required one.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == consts::ALL || granted == required {
        return true;
    }

    match (granted.split_once(':'), required.split_once(':')) {
        (Some((granted_resource, consts::ALL)), Some((required_resource, _))) => {
            granted_resource == required_resource
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_grant_matches_only_itself() {
        assert!(permission_matches(consts::TOOLS_READ, consts::TOOLS_READ));
        assert!(!permission_matches(consts::MOVEMENTS_READ, consts::MOVEMENTS_CREATE));
    }

    #[test]
    fn resource_wildcard_does_not_leak_across_resources() {
        assert!(permission_matches("tools:*", consts::TOOLS_DELETE));
        assert!(!permission_matches("tools:*", consts::MOVEMENTS_CREATE));
        // prefix match alone is not enough
        assert!(!permission_matches("tool:*", consts::TOOLS_READ));
    }

    #[test]
    fn super_wildcard_matches_everything() {
        assert!(permission_matches("*", consts::LEDGER_RECONCILE));
        assert!(!permission_matches(consts::TOOLS_READ, consts::TOOLS_UPDATE));
    }
}
