//! Session-scoped Entity & Dedup Cache (C4, §4.4).
//!
//! All keys are prefixed by `sessionId`; nothing here is shared across
//! sessions. TTLs are checked lazily on read, matching the teacher's
//! `Instant`-based `CachedUserFacts` pattern but using `DateTime<Utc>` so
//! timestamps stay comparable with the rest of the domain model.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use ov_domain::cache::{CachedEntity, Fingerprint, ENTITY_TTL_SECS, FINGERPRINT_TTL_SECS, WARMUP_TTL_SECS};

use crate::clean::{clean_body, content_hash};

struct FingerprintEntry {
    entity_ids: Vec<String>,
    recorded_at: DateTime<Utc>,
}

struct WarmupEntry {
    warm: bool,
    recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionBucket {
    entities: HashMap<String, CachedEntity>,
    fingerprints: HashMap<Fingerprint, FingerprintEntry>,
    warmups: HashMap<(String, String), WarmupEntry>,
}

/// Entity & Dedup Cache. One instance is shared process-wide; every
/// operation takes `session_id` as its first key.
pub struct EntityCache {
    sessions: RwLock<HashMap<String, SessionBucket>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Clean, hash and store raw entity body text, returning the
    /// [`CachedEntity`] that was inserted.
    pub fn cache_raw_entity(
        &self,
        session_id: &str,
        id: &str,
        entity_type: &str,
        provider: &str,
        raw_body: &str,
        metadata: serde_json::Value,
    ) -> CachedEntity {
        let clean = clean_body(raw_body);
        let body_hash = content_hash(&clean);
        let entity = CachedEntity {
            id: id.to_string(),
            entity_type: entity_type.to_string(),
            provider: provider.to_string(),
            clean_body: clean,
            body_hash,
            metadata,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
        };
        self.cache_entity(session_id, entity.clone());
        entity
    }

    /// Store (or replace) an already-built entity (§4.4: "replaces existing id").
    pub fn cache_entity(&self, session_id: &str, entity: CachedEntity) {
        let mut sessions = self.sessions.write();
        let bucket = sessions.entry(session_id.to_string()).or_default();
        bucket.entities.insert(entity.id.clone(), entity);
    }

    pub fn get_entity(&self, session_id: &str, id: &str) -> Option<CachedEntity> {
        let sessions = self.sessions.read();
        let entity = sessions.get(session_id)?.entities.get(id)?;
        if is_expired(entity.timestamp, ENTITY_TTL_SECS) {
            None
        } else {
            Some(entity.clone())
        }
    }

    pub fn get_entities(&self, session_id: &str, ids: &[String]) -> Vec<CachedEntity> {
        ids.iter().filter_map(|id| self.get_entity(session_id, id)).collect()
    }

    pub fn check_fetch_dedup(&self, session_id: &str, fingerprint: &Fingerprint) -> Option<Vec<String>> {
        let sessions = self.sessions.read();
        let entry = sessions.get(session_id)?.fingerprints.get(fingerprint)?;
        if is_expired(entry.recorded_at, FINGERPRINT_TTL_SECS) {
            None
        } else {
            Some(entry.entity_ids.clone())
        }
    }

    pub fn record_fetch_result(&self, session_id: &str, fingerprint: Fingerprint, entity_ids: Vec<String>) {
        let mut sessions = self.sessions.write();
        let bucket = sessions.entry(session_id.to_string()).or_default();
        bucket.fingerprints.insert(
            fingerprint,
            FingerprintEntry { entity_ids, recorded_at: Utc::now() },
        );
    }

    /// Most recent entities of `entity_type` by `timestamp desc` (§4.4).
    pub fn get_recent_cached_entities(&self, session_id: &str, entity_type: &str, limit: usize) -> Vec<CachedEntity> {
        let sessions = self.sessions.read();
        let Some(bucket) = sessions.get(session_id) else { return Vec::new() };
        let mut matches: Vec<&CachedEntity> = bucket
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type && !is_expired(e.timestamp, ENTITY_TTL_SECS))
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.into_iter().take(limit).cloned().collect()
    }

    pub fn clear_session_cache(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// Record a successful/failed warmup observation (written by the
    /// Provider Gateway after it performs the actual whoami call).
    pub fn record_warmup(&self, session_id: &str, provider_key: &str, connection_id: &str, warm: bool) {
        let mut sessions = self.sessions.write();
        let bucket = sessions.entry(session_id.to_string()).or_default();
        bucket.warmups.insert(
            (provider_key.to_string(), connection_id.to_string()),
            WarmupEntry { warm, recorded_at: Utc::now() },
        );
    }

    pub fn is_warm(&self, session_id: &str, provider_key: &str, connection_id: &str) -> bool {
        let sessions = self.sessions.read();
        let Some(bucket) = sessions.get(session_id) else { return false };
        let Some(entry) = bucket.warmups.get(&(provider_key.to_string(), connection_id.to_string())) else {
            return false;
        };
        entry.warm && !is_expired(entry.recorded_at, WARMUP_TTL_SECS)
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(recorded_at: DateTime<Utc>, ttl_secs: i64) -> bool {
    Utc::now() - recorded_at > Duration::seconds(ttl_secs)
}
