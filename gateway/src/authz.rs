// ============================================================================
// AuthZ - role and policy checks for the resolved principal
// ============================================================================
//
// Policy order, applied strictly:
//   1. route-level required roles: any match allows
//   2. the route must declare both resource and action, else deny
//   3. admin allows unconditionally
//   4. policy table: (resource, action) -> allowed roles, intersect
//
// Unknown resources and unknown actions deny.
//
// ============================================================================

use portico_error::GatewayError;
use std::collections::HashMap;

use crate::context::Principal;
use crate::routes::table::RouteSpec;

/// Maps `(resource, action)` to the roles allowed to perform it
pub struct PolicyTable {
    rules: HashMap<(String, String), Vec<String>>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn permit(
        mut self,
        resource: &str,
        action: &str,
        roles: &[&str],
    ) -> Self {
        self.rules.insert(
            (resource.to_string(), action.to_string()),
            roles.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn allowed_roles(&self, resource: &str, action: &str) -> Option<&[String]> {
        self.rules
            .get(&(resource.to_string(), action.to_string()))
            .map(|roles| roles.as_slice())
    }

    /// The gateway's default policy set
    pub fn default_policies() -> Self {
        Self::new()
            .permit("item", "read", &["user"])
            .permit("item", "create", &["user"])
            .permit("item", "update", &["user"])
            .permit("item", "delete", &["admin"])
            .permit("category", "read", &["user"])
            .permit("statistics", "read", &["user"])
            .permit("report", "read", &["user"])
            .permit("report", "create", &["user"])
            .permit("report", "delete", &["admin"])
            .permit("notification", "read", &["user"])
            .permit("notification", "create", &["user"])
            .permit("notification", "update", &["user"])
            .permit("file", "read", &["user"])
            .permit("file", "create", &["user"])
            .permit("file", "delete", &["admin"])
            .permit("folder", "read", &["user"])
            .permit("folder", "create", &["user"])
            .permit("folder", "delete", &["admin"])
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::default_policies()
    }
}

/// Check the principal against the route's policy
pub fn authorize(
    table: &PolicyTable,
    principal: &Principal,
    route: &RouteSpec,
) -> Result<(), GatewayError> {
    // 1. Route-level required roles
    if !route.roles.is_empty() && route.roles.iter().any(|role| principal.has_role(role)) {
        return Ok(());
    }

    // 2. Route must declare resource and action
    let (resource, action) = match (route.resource, route.action) {
        (Some(resource), Some(action)) => (resource, action),
        _ => return Err(forbidden(route)),
    };

    // 3. Admin bypass
    if principal.is_admin() {
        return Ok(());
    }

    // 4. Policy table intersection
    match table.allowed_roles(resource, action) {
        Some(roles) if roles.iter().any(|role| principal.has_role(role)) => Ok(()),
        _ => Err(forbidden(route)),
    }
}

fn forbidden(route: &RouteSpec) -> GatewayError {
    GatewayError::forbidden(format!(
        "You don't have permission to {} this {}",
        route.action.unwrap_or("access"),
        route.resource.unwrap_or("resource"),
    ))
}
