// mimir-core/src/domain/access/mod.rs
//
// Pure access-control predicate logic for the context service (§4.A).
// `PermissionManager` holds a list of policies and answers "is this
// action allowed" — it owns no locks and does no I/O; the context
// service calls it from inside its own locked region.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub role: String,
    pub resource_regex: String,
    pub actions: Vec<Action>,
}

impl AccessPolicy {
    pub fn system_default() -> Self {
        Self {
            role: "system".to_string(),
            resource_regex: ".*".to_string(),
            actions: vec![Action::Read, Action::Write, Action::Delete, Action::List],
        }
    }

    fn matches(&self, resource: &str, action: Action) -> bool {
        if !self.actions.contains(&action) {
            return false;
        }
        Regex::new(&self.resource_regex)
            .map(|re| re.is_match(resource))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct PermissionManager {
    policies: Vec<AccessPolicy>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self {
            policies: vec![AccessPolicy::system_default()],
        }
    }
}

impl PermissionManager {
    pub fn new(policies: Vec<AccessPolicy>) -> Self {
        let mut policies = policies;
        if policies.is_empty() {
            policies.push(AccessPolicy::system_default());
        }
        Self { policies }
    }

    pub fn add_policy(&mut self, policy: AccessPolicy) {
        self.policies.push(policy);
    }

    /// `resource` is `"namespace.key"` (or `"namespace.*"` for
    /// namespace-wide operations like `delete` with no key).
    pub fn is_allowed(&self, role: &str, resource: &str, action: Action) -> bool {
        self.policies
            .iter()
            .filter(|p| p.role == role)
            .any(|p| p.matches(resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_role_has_full_access_by_default() {
        let manager = PermissionManager::default();
        assert!(manager.is_allowed("system", "ns.key", Action::Write));
        assert!(manager.is_allowed("system", "anything.else", Action::Delete));
    }

    #[test]
    fn unknown_role_is_denied() {
        let manager = PermissionManager::default();
        assert!(!manager.is_allowed("guest", "ns.key", Action::Read));
    }

    #[test]
    fn scoped_policy_restricts_to_matching_resource_and_action() {
        let mut manager = PermissionManager::new(vec![]);
        manager.add_policy(AccessPolicy {
            role: "reader".to_string(),
            resource_regex: "^public\\..*".to_string(),
            actions: vec![Action::Read, Action::List],
        });
        assert!(manager.is_allowed("reader", "public.key", Action::Read));
        assert!(!manager.is_allowed("reader", "public.key", Action::Write));
        assert!(!manager.is_allowed("reader", "private.key", Action::Read));
    }
}
