//! Entity & dedup cache data model (§3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cap on a cached entity's cleaned body, before the truncation marker is
/// appended (§3, §4.4, §8 invariant #4).
pub const CLEAN_BODY_CAP_BYTES: usize = 5 * 1024;
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Entity cache TTL (§3).
pub const ENTITY_TTL_SECS: i64 = 24 * 3600;
/// Fetch fingerprint TTL (§3).
pub const FINGERPRINT_TTL_SECS: i64 = 3600;
/// Warmup state TTL (§3, §4.1).
pub const WARMUP_TTL_SECS: i64 = 30 * 60;
/// Warming no-op window (§4.1, §8 invariant #9).
pub const WARM_NOOP_WINDOW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub provider: String,
    pub clean_body: String,
    pub body_hash: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// MD5 over `(toolName, provider, normalized filters)` (§3).
pub type Fingerprint = String;
