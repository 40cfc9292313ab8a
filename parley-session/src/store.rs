//! Session storage backends for Parley conversations.
//!
//! The store is the only durable home for per-conversation state. It
//! supports two backends behind one trait:
//!
//! - **In-Memory**: one shared map in process memory, lost on restart
//! - **Redis**: one namespaced hash per conversation with a native TTL
//!
//! Backend failures never escape this boundary: they are logged and
//! converted to `None`/`false`/empty results, so callers treat a failed
//! write as "state not durably advanced" rather than a crash.
//!
//! # Redis wire format
//!
//! One hash key per conversation (`conversation:<id>` by default).
//! Structured fields (`messages`, `usage`, `metadata`) are stored as
//! JSON text, scalar fields as plain strings. Every write sets the
//! whole-key TTL; every update refreshes it atomically with the field
//! merge. Partial updates write only the fields they carry, so an
//! update that never names `messages` can never clobber history
//! appended by a concurrent locked writer.

use crate::record::{ChatMessage, SessionRecord, SessionStatus, SessionUpdate};
use async_trait::async_trait;
use chrono::Utc;
use parley_common::{Error, RedisConfig, Result, StoreBackend};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// Session Store Trait
// ============================================================================

/// Backend-agnostic contract for session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the current record, or `None` when the id is unknown.
    /// Never fails for missing keys.
    async fn get(&self, id: &str) -> Option<SessionRecord>;

    /// Replace the full record, stamping `last_activity`. Used for first
    /// creation. Returns `false` on backend failure.
    async fn set(&self, id: &str, record: SessionRecord) -> bool;

    /// Merge fields into an existing record and refresh `last_activity`.
    /// Returns `false` (without partial mutation) when the id does not
    /// exist or the backend fails.
    async fn update(&self, id: &str, update: SessionUpdate) -> bool;

    /// Remove a record; returns whether anything was removed.
    async fn delete(&self, id: &str) -> bool;

    /// Whether a record exists for this id.
    async fn exists(&self, id: &str) -> bool;

    /// Snapshot of all conversation ids. Sweeper-only; may be slightly
    /// stale relative to concurrent writes.
    async fn list_ids(&self) -> Vec<String>;

    /// Remove every record idle strictly longer than `max_idle`; returns
    /// the number removed. On the Redis backend this is a defensive
    /// backstop to the native per-key TTL.
    async fn sweep_expired(&self, max_idle: Duration) -> usize;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Volatile in-process session store.
///
/// Holds one shared map; operations take no lock beyond atomic map
/// mutation. Unbounded in size until swept.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, last_activity: i64) {
        if let Some(record) = self.sessions.write().await.get_mut(id) {
            record.last_activity = last_activity;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn set(&self, id: &str, mut record: SessionRecord) -> bool {
        record.touch();
        self.sessions.write().await.insert(id.to_string(), record);
        tracing::debug!(thread_id = %id, "Session stored in memory");
        true
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(record) => {
                record.apply(update);
                tracing::debug!(thread_id = %id, "Session updated in memory");
                true
            }
            None => {
                tracing::warn!(thread_id = %id, "Update for unknown session");
                false
            }
        }
    }

    async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    async fn exists(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    async fn list_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    async fn sweep_expired(&self, max_idle: Duration) -> usize {
        let now = Utc::now().timestamp();
        let threshold = max_idle.as_secs() as i64;
        let mut sessions = self.sessions.write().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, record)| record.idle_seconds(now) > threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            tracing::info!(thread_id = %id, "Expired session removed from memory");
        }
        expired.len()
    }
}

// ============================================================================
// Redis Store
// ============================================================================

/// Hash field names for the per-conversation key.
const FIELD_STATUS: &str = "status";
const FIELD_RESPONSE: &str = "response";
const FIELD_MESSAGES: &str = "messages";
const FIELD_USAGE: &str = "usage";
const FIELD_METADATA: &str = "metadata";
const FIELD_LAST_ACTIVITY: &str = "last_activity";

/// Redis-backed session store with native per-key expiration.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisStore {
    /// Connect and verify the server with a PING.
    ///
    /// Failure here is reported to the factory, which decides whether to
    /// fall back to the in-memory store.
    pub async fn connect(config: &RedisConfig, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Backend(e.to_string()))?;

        let connect = client.get_connection_manager();
        let mut conn = tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), connect)
            .await
            .map_err(|_| Error::Backend("Redis connection timed out".to_string()))?
            .map_err(|e| Error::Backend(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            ttl,
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Encode a record into hash fields: JSON text for structured fields,
    /// plain strings for scalars.
    fn encode(record: &SessionRecord) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            (FIELD_STATUS.to_string(), record.status.as_str().to_string()),
            (FIELD_MESSAGES.to_string(), serde_json::to_string(&record.messages)?),
            (FIELD_METADATA.to_string(), serde_json::to_string(&record.metadata)?),
            (FIELD_LAST_ACTIVITY.to_string(), record.last_activity.to_string()),
        ];
        if let Some(ref response) = record.response {
            fields.push((FIELD_RESPONSE.to_string(), response.clone()));
        }
        if let Some(ref usage) = record.usage {
            fields.push((FIELD_USAGE.to_string(), serde_json::to_string(usage)?));
        }
        Ok(fields)
    }

    /// Decode hash fields back into a record.
    ///
    /// Individually corrupt fields degrade to defaults with a warning
    /// rather than failing the whole read.
    fn decode(id: &str, raw: &HashMap<String, String>) -> SessionRecord {
        let messages = raw
            .get(FIELD_MESSAGES)
            .and_then(|v| match serde_json::from_str(v) {
                Ok(messages) => Some(messages),
                Err(e) => {
                    tracing::warn!(thread_id = %id, error = %e, "Unparseable messages field");
                    None
                }
            })
            .unwrap_or_default();

        let usage = raw.get(FIELD_USAGE).and_then(|v| match serde_json::from_str(v) {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::warn!(thread_id = %id, error = %e, "Unparseable usage field");
                None
            }
        });

        let metadata = raw
            .get(FIELD_METADATA)
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or_default();

        SessionRecord {
            status: raw.get(FIELD_STATUS).map_or(SessionStatus::Processing, |s| SessionStatus::parse(s)),
            response: raw.get(FIELD_RESPONSE).cloned(),
            messages,
            usage,
            metadata,
            last_activity: raw
                .get(FIELD_LAST_ACTIVITY)
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Utc::now().timestamp()),
        }
    }

    /// Hash fields written by a partial update: only what the update
    /// carries, plus the refreshed `last_activity` stamp. The caller
    /// supplies the current `messages`/`metadata` values as the merge
    /// base; they are consulted only when the update touches them.
    fn encode_update(
        update: SessionUpdate,
        current_messages: Vec<ChatMessage>,
        current_metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<(String, String)>> {
        let mut fields = Vec::new();
        if let Some(status) = update.status {
            fields.push((FIELD_STATUS.to_string(), status.as_str().to_string()));
        }
        if let Some(response) = update.response {
            fields.push((FIELD_RESPONSE.to_string(), response));
        }
        if let Some(usage) = update.usage {
            fields.push((FIELD_USAGE.to_string(), serde_json::to_string(&usage)?));
        }
        if !update.append_messages.is_empty() {
            let mut messages = current_messages;
            messages.extend(update.append_messages);
            fields.push((FIELD_MESSAGES.to_string(), serde_json::to_string(&messages)?));
        }
        if !update.metadata.is_empty() {
            let mut metadata = current_metadata;
            metadata.extend(update.metadata);
            fields.push((FIELD_METADATA.to_string(), serde_json::to_string(&metadata)?));
        }
        fields.push((FIELD_LAST_ACTIVITY.to_string(), Utc::now().timestamp().to_string()));
        Ok(fields)
    }

    /// Read one JSON-encoded hash field, degrading a missing or corrupt
    /// value to the type's default. `None` only on a backend failure.
    async fn read_json_field<T>(&self, key: &str, field: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let mut conn = self.conn.clone();
        match redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(raw) => Some(
                raw.and_then(|v| match serde_json::from_str(&v) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(key = %key, field = %field, error = %e, "Unparseable hash field");
                        None
                    }
                })
                .unwrap_or_default(),
            ),
            Err(e) => {
                tracing::error!(key = %key, field = %field, error = %e, "Redis HGET failed");
                None
            }
        }
    }

    /// Write all fields and refresh the whole-key TTL in one atomic
    /// pipeline, so the key can never expire between merge and refresh.
    async fn write_fields(&self, key: &str, fields: &[(String, String)], replace: bool) -> bool {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if replace {
            pipe.del(key).ignore();
        }
        pipe.hset_multiple(key, fields).ignore();
        pipe.expire(key, self.ttl.as_secs() as i64).ignore();

        match pipe.query_async::<()>(&mut conn).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Redis write failed");
                false
            }
        }
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, id: &str) -> Option<SessionRecord> {
        let key = self.key(id);
        let mut conn = self.conn.clone();
        match redis::cmd("HGETALL")
            .arg(&key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
        {
            Ok(raw) if raw.is_empty() => None,
            Ok(raw) => Some(Self::decode(id, &raw)),
            Err(e) => {
                tracing::error!(thread_id = %id, error = %e, "Redis read failed");
                None
            }
        }
    }

    async fn set(&self, id: &str, mut record: SessionRecord) -> bool {
        record.touch();
        let fields = match Self::encode(&record) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(thread_id = %id, error = %e, "Session encode failed");
                return false;
            }
        };
        let ok = self.write_fields(&self.key(id), &fields, true).await;
        if ok {
            tracing::debug!(thread_id = %id, ttl_secs = self.ttl.as_secs(), "Session stored in Redis");
        }
        ok
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> bool {
        let key = self.key(id);
        let mut conn = self.conn.clone();

        // Only touch existing keys: a vanished (expired) conversation must
        // not be resurrected by a partial update.
        let exists: bool = match redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!(thread_id = %id, error = %e, "Redis EXISTS failed");
                return false;
            }
        };
        if !exists {
            tracing::warn!(thread_id = %id, "Update for unknown session");
            return false;
        }

        // Merge only the fields the update carries. History appends are
        // serialized by the per-conversation lock, so the narrow
        // read-extend-write on `messages` cannot lose an entry; updates
        // running outside the lock (metadata refresh, timeout marker)
        // never name `messages` and so can never clobber it.
        let current_messages = if update.append_messages.is_empty() {
            Vec::new()
        } else {
            match self.read_json_field(&key, FIELD_MESSAGES).await {
                Some(messages) => messages,
                None => return false,
            }
        };
        let current_metadata = if update.metadata.is_empty() {
            HashMap::new()
        } else {
            match self.read_json_field(&key, FIELD_METADATA).await {
                Some(metadata) => metadata,
                None => return false,
            }
        };

        let fields = match Self::encode_update(update, current_messages, current_metadata) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(thread_id = %id, error = %e, "Session encode failed");
                return false;
            }
        };
        let ok = self.write_fields(&key, &fields, false).await;
        if ok {
            tracing::debug!(thread_id = %id, "Session updated in Redis");
        }
        ok
    }

    async fn delete(&self, id: &str) -> bool {
        let key = self.key(id);
        let mut conn = self.conn.clone();
        match redis::cmd("DEL").arg(&key).query_async::<i64>(&mut conn).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                tracing::error!(thread_id = %id, error = %e, "Redis DEL failed");
                false
            }
        }
    }

    async fn exists(&self, id: &str) -> bool {
        let key = self.key(id);
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(&key)
            .query_async::<bool>(&mut conn)
            .await
            .unwrap_or(false)
    }

    async fn list_ids(&self) -> Vec<String> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut ids = Vec::new();

        match conn.scan_match::<_, String>(&pattern).await {
            Ok(mut iter) => {
                while let Some(key) = iter.next_item().await {
                    if let Some(id) = key.strip_prefix(&self.key_prefix) {
                        ids.push(id.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Redis SCAN failed");
            }
        }
        ids
    }

    async fn sweep_expired(&self, max_idle: Duration) -> usize {
        // Manual backstop to the native TTL; a key Redis already expired
        // simply no longer enumerates, so the two never double-count.
        let now = Utc::now().timestamp();
        let threshold = max_idle.as_secs() as i64;
        let mut removed = 0;

        for id in self.list_ids().await {
            let Some(record) = self.get(&id).await else { continue };
            if record.idle_seconds(now) > threshold && self.delete(&id).await {
                removed += 1;
                tracing::info!(thread_id = %id, "Expired session removed from Redis");
            }
        }
        removed
    }
}

// ============================================================================
// Store Factory
// ============================================================================

/// Construct the configured storage backend.
///
/// Selecting `Redis` when the server is unreachable logs the failure and
/// falls back to the in-memory store; fallback lives only here, never in
/// per-operation logic.
pub async fn create_store(
    backend: StoreBackend,
    redis: &RedisConfig,
    session_ttl: Duration,
) -> Arc<dyn SessionStore> {
    match backend {
        StoreBackend::Memory => {
            tracing::info!("In-memory session store ready");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => match RedisStore::connect(redis, session_ttl).await {
            Ok(store) => {
                tracing::info!(url = %redis.url, ttl_secs = session_ttl.as_secs(), "Redis session store ready");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory session store");
                Arc::new(MemoryStore::new())
            }
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChatMessage, TokenUsage};

    fn sample_record() -> SessionRecord {
        let mut record = SessionRecord::new();
        record.messages.push(ChatMessage::user("hola"));
        record.messages.push(ChatMessage::assistant("¿en qué puedo ayudar?"));
        record.usage = Some(TokenUsage::new(12, 34));
        record.metadata.insert("caller_id".into(), serde_json::json!("sub-1"));
        record
    }

    #[tokio::test]
    async fn test_memory_set_get_roundtrip() {
        let store = MemoryStore::new();
        let record = sample_record();

        assert!(store.set("t1", record.clone()).await);
        let loaded = store.get("t1").await.unwrap();

        assert_eq!(loaded.status, record.status);
        assert_eq!(loaded.messages, record.messages);
        assert_eq!(loaded.usage, record.usage);
        assert_eq!(loaded.metadata, record.metadata);
    }

    #[tokio::test]
    async fn test_memory_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.is_none());
        assert!(!store.exists("nope").await);
    }

    #[tokio::test]
    async fn test_memory_update_missing_fails_without_create() {
        let store = MemoryStore::new();
        let update = SessionUpdate::new().with_status(SessionStatus::Completed);

        assert!(!store.update("ghost", update).await);
        // No partial-create side effect
        assert!(!store.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_memory_update_scenario() {
        let store = MemoryStore::new();
        store.set("t1", SessionRecord::new()).await;

        let update = SessionUpdate::new()
            .with_status(SessionStatus::Completed)
            .with_response("hi");
        assert!(store.update("t1", update).await);

        let record = store.get("t1").await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.response.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryStore::new();
        store.set("t1", SessionRecord::new()).await;

        assert!(store.delete("t1").await);
        assert!(!store.delete("t1").await);
        assert!(!store.exists("t1").await);
    }

    #[tokio::test]
    async fn test_memory_list_ids() {
        let store = MemoryStore::new();
        store.set("a", SessionRecord::new()).await;
        store.set("b", SessionRecord::new()).await;

        let mut ids = store.list_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_memory_set_stamps_last_activity() {
        let store = MemoryStore::new();
        let mut record = SessionRecord::new();
        record.last_activity = 1; // stale stamp must be overwritten on write

        store.set("t1", record).await;
        let now = Utc::now().timestamp();
        let loaded = store.get("t1").await.unwrap();
        assert!(loaded.idle_seconds(now) <= 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_exactly_the_strictly_older() {
        let store = MemoryStore::new();
        let now = Utc::now().timestamp();

        for (id, idle) in [("fresh", 10), ("edge", 100), ("stale", 101), ("ancient", 5000)] {
            store.set(id, SessionRecord::new()).await;
            let mut sessions = store.sessions.write().await;
            sessions.get_mut(id).unwrap().last_activity = now - idle;
        }

        let removed = store.sweep_expired(Duration::from_secs(100)).await;
        assert_eq!(removed, 2);
        assert!(store.exists("fresh").await);
        // Idle time exactly at the threshold is not "strictly exceeds"
        assert!(store.exists("edge").await);
        assert!(!store.exists("stale").await);
        assert!(!store.exists("ancient").await);
    }

    #[tokio::test]
    async fn test_sweep_zero_removes_any_past_activity() {
        let store = MemoryStore::new();
        store.set("t1", SessionRecord::new()).await;
        {
            let mut sessions = store.sessions.write().await;
            sessions.get_mut("t1").unwrap().last_activity = Utc::now().timestamp() - 5;
        }

        let removed = store.sweep_expired(Duration::ZERO).await;
        assert_eq!(removed, 1);
        assert!(!store.exists("t1").await);
    }

    #[tokio::test]
    async fn test_sweep_empty_store_is_zero_not_error() {
        let store = MemoryStore::new();
        assert_eq!(store.sweep_expired(Duration::from_secs(1)).await, 0);
    }

    #[test]
    fn test_redis_codec_roundtrip() {
        let record = sample_record();
        let fields = RedisStore::encode(&record).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        let decoded = RedisStore::decode("t1", &raw);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_redis_codec_scalars_are_plain_text() {
        let mut record = sample_record();
        record.status = SessionStatus::Completed;
        record.response = Some("done".into());

        let fields = RedisStore::encode(&record).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        assert_eq!(raw[FIELD_STATUS], "completed");
        assert_eq!(raw[FIELD_RESPONSE], "done");
        assert_eq!(raw[FIELD_LAST_ACTIVITY], record.last_activity.to_string());
        // Structured fields are JSON text
        assert!(raw[FIELD_MESSAGES].starts_with('['));
        assert!(raw[FIELD_USAGE].starts_with('{'));
    }

    #[test]
    fn test_redis_codec_omits_null_fields() {
        let record = SessionRecord::new();
        let fields = RedisStore::encode(&record).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        assert!(!raw.contains_key(FIELD_RESPONSE));
        assert!(!raw.contains_key(FIELD_USAGE));

        let decoded = RedisStore::decode("t1", &raw);
        assert!(decoded.response.is_none());
        assert!(decoded.usage.is_none());
    }

    #[test]
    fn test_redis_codec_corrupt_field_degrades() {
        let record = sample_record();
        let fields = RedisStore::encode(&record).unwrap();
        let mut raw: HashMap<String, String> = fields.into_iter().collect();
        raw.insert(FIELD_MESSAGES.into(), "not json".into());

        let decoded = RedisStore::decode("t1", &raw);
        assert!(decoded.messages.is_empty());
        assert_eq!(decoded.usage, record.usage);
    }

    #[test]
    fn test_redis_update_encoding_writes_only_carried_fields() {
        let update = SessionUpdate::new().with_metadata("phone", serde_json::json!("555"));
        let fields = RedisStore::encode_update(update, Vec::new(), HashMap::new()).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        // A metadata-only refresh must never rewrite history or status
        assert!(!raw.contains_key(FIELD_MESSAGES));
        assert!(!raw.contains_key(FIELD_STATUS));
        assert!(!raw.contains_key(FIELD_RESPONSE));
        assert!(raw.contains_key(FIELD_METADATA));
        assert!(raw.contains_key(FIELD_LAST_ACTIVITY));
    }

    #[test]
    fn test_redis_update_encoding_timeout_marker_leaves_history_alone() {
        let update = SessionUpdate::new()
            .with_status(SessionStatus::Error)
            .with_response("Timeout: generation exceeded 60 seconds");
        let fields = RedisStore::encode_update(update, Vec::new(), HashMap::new()).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        assert_eq!(raw[FIELD_STATUS], "error");
        assert!(raw[FIELD_RESPONSE].starts_with("Timeout:"));
        assert!(!raw.contains_key(FIELD_MESSAGES));
        assert!(!raw.contains_key(FIELD_METADATA));
    }

    #[test]
    fn test_redis_update_encoding_appends_after_current_history() {
        let current = vec![ChatMessage::user("hola"), ChatMessage::assistant("hi")];
        let update = SessionUpdate::new().with_message(ChatMessage::user("otra"));
        let fields = RedisStore::encode_update(update, current.clone(), HashMap::new()).unwrap();
        let raw: HashMap<String, String> = fields.into_iter().collect();

        let merged: Vec<ChatMessage> = serde_json::from_str(&raw[FIELD_MESSAGES]).unwrap();
        assert_eq!(&merged[..2], &current[..]);
        assert_eq!(merged[2], ChatMessage::user("otra"));
    }

    #[tokio::test]
    async fn test_factory_memory() {
        let store = create_store(StoreBackend::Memory, &RedisConfig::default(), Duration::from_secs(60)).await;
        assert!(store.set("t1", SessionRecord::new()).await);
        assert!(store.exists("t1").await);
    }

    #[tokio::test]
    async fn test_factory_falls_back_when_redis_unreachable() {
        let redis = RedisConfig {
            url: "redis://127.0.0.1:1".into(), // nothing listens here
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let store = create_store(StoreBackend::Redis, &redis, Duration::from_secs(60)).await;

        // Fallback store still satisfies the contract
        assert!(store.set("t1", SessionRecord::new()).await);
        assert!(store.get("t1").await.is_some());
    }
}

// ============================================================================
// Redis Integration Tests (requires running Redis server)
// ============================================================================

#[cfg(test)]
mod redis_tests {
    use super::*;
    use crate::record::ChatMessage;

    fn test_config() -> RedisConfig {
        RedisConfig {
            key_prefix: format!("parley-test:{}:", uuid::Uuid::new_v4()),
            connect_timeout_secs: 1,
            ..Default::default()
        }
    }

    async fn connect() -> Option<RedisStore> {
        RedisStore::connect(&test_config(), Duration::from_secs(60)).await.ok()
    }

    #[tokio::test]
    async fn test_redis_set_get_roundtrip() {
        let Some(store) = connect().await else {
            eprintln!("Skipping Redis test: Redis not available");
            return;
        };

        let mut record = SessionRecord::new();
        record.messages.push(ChatMessage::user("hola"));
        record.metadata.insert("phone".into(), serde_json::json!("555"));

        assert!(store.set("t1", record.clone()).await);
        let loaded = store.get("t1").await.unwrap();
        assert_eq!(loaded.messages, record.messages);
        assert_eq!(loaded.metadata, record.metadata);

        store.delete("t1").await;
    }

    #[tokio::test]
    async fn test_redis_update_missing_fails() {
        let Some(store) = connect().await else {
            eprintln!("Skipping Redis test: Redis not available");
            return;
        };

        let update = SessionUpdate::new().with_status(SessionStatus::Completed);
        assert!(!store.update("ghost", update).await);
        assert!(!store.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_redis_metadata_update_preserves_history() {
        let Some(store) = connect().await else {
            eprintln!("Skipping Redis test: Redis not available");
            return;
        };

        let mut record = SessionRecord::new();
        record.messages.push(ChatMessage::user("hola"));
        store.set("t1", record).await;

        let update = SessionUpdate::new().with_metadata("phone", serde_json::json!("555"));
        assert!(store.update("t1", update).await);

        let loaded = store.get("t1").await.unwrap();
        assert_eq!(loaded.messages, vec![ChatMessage::user("hola")]);
        assert_eq!(loaded.metadata["phone"], serde_json::json!("555"));

        store.delete("t1").await;
    }

    #[tokio::test]
    async fn test_redis_list_ids_strips_prefix() {
        let Some(store) = connect().await else {
            eprintln!("Skipping Redis test: Redis not available");
            return;
        };

        store.set("a", SessionRecord::new()).await;
        store.set("b", SessionRecord::new()).await;

        let mut ids = store.list_ids().await;
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        store.delete("a").await;
        store.delete("b").await;
    }
}
