//! User Tool Filter (C3, §4.3): narrows the catalog to what a given user can
//! actually invoke right now, based on live provider connections, plus a
//! further narrowing by LLM-detected category keywords.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use ov_domain::tool::ToolDefinition;

use crate::catalog::ToolCatalog;
use crate::connections::UserConnections;

/// Short per-user cache TTL for `available_tools_for_user` (§4.3: "cached per
/// user for a short TTL, invalidated on connection change").
pub const USER_TOOLS_CACHE_TTL_SECS: i64 = 60;

/// Keyword → category table driving `tools_by_categories_for_user` (§4.3).
/// Deliberately small; the spec calls this partial and expects it to be
/// expanded or replaced with a learned classifier.
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("email", "Email"),
    ("send", "Email"),
    ("inbox", "Email"),
    ("meeting", "Calendar"),
    ("calendar", "Calendar"),
    ("schedule", "Calendar"),
    ("lead", "CRM"),
    ("deal", "CRM"),
    ("contact", "CRM"),
    ("pipeline", "CRM"),
];

struct CacheEntry {
    at: DateTime<Utc>,
    tool_names: Vec<String>,
}

pub struct UserToolFilter {
    catalog: Arc<ToolCatalog>,
    connections: Arc<UserConnections>,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl UserToolFilter {
    pub fn new(catalog: Arc<ToolCatalog>, connections: Arc<UserConnections>) -> Self {
        Self { catalog, connections, cache: RwLock::new(HashMap::new()) }
    }

    /// Subset of the catalog whose `providerKey` is present in the user's
    /// connections, or every provider-less tool (local tools need no
    /// connection). Cached per user for [`USER_TOOLS_CACHE_TTL_SECS`].
    pub fn available_tools_for_user(&self, user_id: &str) -> Vec<&ToolDefinition> {
        if let Some(entry) = self.cache.read().get(user_id) {
            if Utc::now().signed_duration_since(entry.at).num_seconds() < USER_TOOLS_CACHE_TTL_SECS {
                return entry.tool_names.iter().filter_map(|n| self.catalog.get_by_name(n)).collect();
            }
        }

        let tools: Vec<&ToolDefinition> = self
            .catalog
            .get_all()
            .into_iter()
            .filter(|t| match &t.provider_key {
                Some(key) => self.connections.is_connected(user_id, key),
                None => true,
            })
            .collect();

        self.cache.write().insert(
            user_id.to_string(),
            CacheEntry { at: Utc::now(), tool_names: tools.iter().map(|t| t.name.clone()).collect() },
        );
        tools
    }

    /// Narrows `available_tools_for_user` by category, further restricted to
    /// `categories` when non-empty (§4.3: "when no keyword matches, all
    /// categories are considered").
    pub fn tools_by_categories_for_user(&self, user_id: &str, categories: &[String]) -> Vec<&ToolDefinition> {
        let available = self.available_tools_for_user(user_id);
        if categories.is_empty() {
            return available;
        }
        available.into_iter().filter(|t| categories.iter().any(|c| c.eq_ignore_ascii_case(&t.category))).collect()
    }

    /// Scans free text for category keywords (§4.3). Returns an empty vec
    /// when nothing matches, signalling "consider all categories" to the
    /// caller.
    pub fn detect_categories(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut found = Vec::new();
        for (keyword, category) in CATEGORY_KEYWORDS {
            if lower.contains(keyword) && !found.contains(&category.to_string()) {
                found.push(category.to_string());
            }
        }
        found
    }

    /// Must be called whenever a user's connections change, per the cache's
    /// invalidate-on-connection-change contract.
    pub fn invalidate_user(&self, user_id: &str) {
        self.cache.write().remove(user_id);
    }
}
