//! Live provider connections per user (§4.3): the input the User Tool Filter
//! checks a tool's `providerKey` against. Also owns the provider-key
//! equivalence-group table so aliased tenant variants of a provider resolve
//! to one canonical chain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub provider_key: String,
    pub connected_at: DateTime<Utc>,
}

/// Read-mostly registry of `(userId, providerKey) -> connection`; writes only
/// on connection change (§5: "copy-on-write" read-mostly caches).
pub struct UserConnections {
    by_user: RwLock<HashMap<String, HashMap<String, ConnectionInfo>>>,
    /// Maps an aliased provider key to its canonical key, e.g. multiple
    /// tenant variants of the same underlying provider (§4.3).
    equivalence: HashMap<String, String>,
}

impl UserConnections {
    pub fn new() -> Self {
        Self { by_user: RwLock::new(HashMap::new()), equivalence: HashMap::new() }
    }

    pub fn with_equivalence_groups(groups: Vec<Vec<&str>>) -> Self {
        let mut equivalence = HashMap::new();
        for group in groups {
            if let Some((canonical, aliases)) = group.split_first() {
                for alias in aliases {
                    equivalence.insert((*alias).to_string(), canonical.to_string());
                }
            }
        }
        Self { by_user: RwLock::new(HashMap::new()), equivalence }
    }

    /// Resolves a tool's declared provider key to the canonical key connections
    /// are keyed under.
    pub fn canonicalize(&self, provider_key: &str) -> &str {
        self.equivalence.get(provider_key).map(|s| s.as_str()).unwrap_or(provider_key)
    }

    pub fn connect(&self, user_id: &str, provider_key: &str, connection_id: impl Into<String>) {
        let canonical = self.canonicalize(provider_key).to_string();
        self.by_user.write().entry(user_id.to_string()).or_default().insert(
            canonical.clone(),
            ConnectionInfo { connection_id: connection_id.into(), provider_key: canonical, connected_at: Utc::now() },
        );
    }

    pub fn disconnect(&self, user_id: &str, provider_key: &str) {
        let canonical = self.canonicalize(provider_key);
        if let Some(conns) = self.by_user.write().get_mut(user_id) {
            conns.remove(canonical);
        }
    }

    pub fn connection_id_for(&self, user_id: &str, provider_key: &str) -> Option<String> {
        let canonical = self.canonicalize(provider_key);
        self.by_user.read().get(user_id).and_then(|c| c.get(canonical)).map(|c| c.connection_id.clone())
    }

    pub fn is_connected(&self, user_id: &str, provider_key: &str) -> bool {
        self.connection_id_for(user_id, provider_key).is_some()
    }

    pub fn provider_keys_for_user(&self, user_id: &str) -> Vec<String> {
        self.by_user.read().get(user_id).map(|c| c.keys().cloned().collect()).unwrap_or_default()
    }
}

impl Default for UserConnections {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_lookup_roundtrips() {
        let conns = UserConnections::new();
        conns.connect("user-1", "gmail", "conn-abc");
        assert!(conns.is_connected("user-1", "gmail"));
        assert_eq!(conns.connection_id_for("user-1", "gmail"), Some("conn-abc".to_string()));
        assert!(!conns.is_connected("user-1", "gcal"));
    }

    #[test]
    fn disconnect_removes_entry() {
        let conns = UserConnections::new();
        conns.connect("user-1", "gmail", "conn-abc");
        conns.disconnect("user-1", "gmail");
        assert!(!conns.is_connected("user-1", "gmail"));
    }

    #[test]
    fn equivalence_group_resolves_alias_to_canonical() {
        let conns = UserConnections::with_equivalence_groups(vec![vec!["gmail", "gmail_eu", "gmail_tenant2"]]);
        conns.connect("user-1", "gmail_eu", "conn-xyz");
        assert!(conns.is_connected("user-1", "gmail"));
        assert!(conns.is_connected("user-1", "gmail_tenant2"));
        assert_eq!(conns.connection_id_for("user-1", "gmail_tenant2"), Some("conn-xyz".to_string()));
    }

    #[test]
    fn distinct_users_are_isolated() {
        let conns = UserConnections::new();
        conns.connect("user-1", "gmail", "conn-1");
        assert!(!conns.is_connected("user-2", "gmail"));
    }
}
