//! SessionStore: a typed façade over Redis enforcing the fixed key
//! schema. No other module is allowed to format a `session:*`/`agent:*`
//! key itself; everything goes through here.
//!
//! Every operation degrades silently on connectivity failure — returns
//! `None`/`false`/an empty collection and logs a `warn!`. Nothing here
//! ever raises to a caller.

use std::collections::HashMap;

use deadpool_redis::{Pool, redis::AsyncCommands};
use orchestrator_protocol::{Session, SessionConfigRecord, keys};

/// Lifecycle-phase index sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Ready,
}

impl Phase {
    fn key(self) -> &'static str {
        match self {
            Phase::Starting => keys::SESSION_STARTING_SET,
            Phase::Ready => keys::SESSION_READY_SET,
        }
    }
}

pub struct SessionStore {
    pool: Pool,
}

impl SessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Option<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!("Redis pool exhausted or unreachable: {e}");
                None
            }
        }
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = match conn.hgetall(keys::session(id)).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(session_id = %id, "Failed to read session hash: {e}");
                return None;
            }
        };
        if fields.is_empty() {
            return None;
        }
        Session::from_fields(&fields)
    }

    pub async fn get_config(&self, id: &str) -> Option<SessionConfigRecord> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = match conn.hgetall(keys::session_config(id)).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(session_id = %id, "Failed to read session config hash: {e}");
                return None;
            }
        };
        if fields.is_empty() {
            return None;
        }
        SessionConfigRecord::from_fields(&fields)
    }

    pub async fn put_session(&self, session: &Session, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let key = keys::session(&session.session_id);
        let fields = session.to_fields();
        if let Err(e) = conn.hset_multiple::<_, _, _, ()>(&key, &fields).await {
            tracing::warn!(session_id = %session.session_id, "Failed to write session hash: {e}");
            return false;
        }
        if ttl_secs > 0
            && let Err(e) = conn.expire::<_, ()>(&key, ttl_secs as i64).await
        {
            tracing::warn!(session_id = %session.session_id, "Failed to set session TTL: {e}");
        }
        true
    }

    pub async fn put_config(&self, id: &str, config: &SessionConfigRecord, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let key = keys::session_config(id);
        let fields = config.to_fields();
        if let Err(e) = conn.hset_multiple::<_, _, _, ()>(&key, &fields).await {
            tracing::warn!(session_id = %id, "Failed to write session config hash: {e}");
            return false;
        }
        if ttl_secs > 0
            && let Err(e) = conn.expire::<_, ()>(&key, ttl_secs as i64).await
        {
            tracing::warn!(session_id = %id, "Failed to set config TTL: {e}");
        }
        true
    }

    pub async fn add_to_phase(&self, phase: Phase, id: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.sadd::<_, _, ()>(phase.key(), id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, phase = phase.key(), "Failed to add to phase set: {e}");
                false
            }
        }
    }

    pub async fn remove_from_phase(&self, phase: Phase, id: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.srem::<_, _, ()>(phase.key(), id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, phase = phase.key(), "Failed to remove from phase set: {e}");
                false
            }
        }
    }

    pub async fn get_phase(&self, phase: Phase) -> std::collections::HashSet<String> {
        let Some(mut conn) = self.conn().await else {
            return Default::default();
        };
        match conn.smembers(phase.key()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(phase = phase.key(), "Failed to read phase set: {e}");
                Default::default()
            }
        }
    }

    /// `ListSessionIds` — simple `KEYS session:*` scan, filtered
    /// Acceptable for small deployments; `scan_session_ids` is the
    /// non-blocking equivalent and is preferred in production.
    pub async fn list_session_ids(&self) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let raw_keys: Vec<String> = match conn.keys("session:*").await {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!("Failed to list session keys: {e}");
                return Vec::new();
            }
        };
        let mut ids = Vec::new();
        for key in raw_keys {
            let Some(id) = keys::session_id_from_key(&key) else {
                continue;
            };
            // Defensive against schema drift: confirm the key is actually a hash.
            let kind: String = conn.key_type(&key).await.unwrap_or_default();
            if kind == "hash" {
                ids.push(id.to_string());
            }
        }
        ids
    }

    /// `ScanSessionIds` — cursor-based `SCAN` iteration, never blocks the
    /// server on a large keyspace the way `KEYS` can.
    pub async fn scan_session_ids(&self, batch: usize) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, chunk): (u64, Vec<String>) = match redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("session:*")
                .arg("COUNT")
                .arg(batch)
                .query_async(&mut conn)
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("SCAN failed: {e}");
                    break;
                }
            };
            for key in chunk {
                let Some(id) = keys::session_id_from_key(&key) else {
                    continue;
                };
                let kind: String = conn.key_type(&key).await.unwrap_or_default();
                if kind == "hash" {
                    ids.push(id.to_string());
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        ids
    }

    pub async fn set_agent_identity(&self, id: &str, pid: u32, pgid: u32, logfile: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let result: redis::RedisResult<()> = async {
            conn.set(keys::agent_pid(id), pid).await?;
            conn.set(keys::agent_logfile(id), logfile).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(session_id = %id, "Failed to write agent identity: {e}");
            return false;
        }
        true
    }

    /// Append a line to the agent's log ring buffer and trim it to the last
    /// `LOG_RING_CAPACITY` entries.
    pub async fn push_log(&self, id: &str, line: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let key = keys::agent_logs(id);
        let result: redis::RedisResult<()> = async {
            conn.rpush(&key, line).await?;
            conn.ltrim(&key, -keys::LOG_RING_CAPACITY, -1).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(session_id = %id, "Failed to append agent log line: {e}");
            return false;
        }
        true
    }

    pub async fn get_logs(&self, id: &str, limit: isize) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let limit = limit.max(0).min(keys::LOG_RING_CAPACITY);
        match conn.lrange(keys::agent_logs(id), -limit, -1).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(session_id = %id, "Failed to read agent logs: {e}");
                Vec::new()
            }
        }
    }

    pub async fn set_agent_health(&self, id: &str, fields: &[(&str, String)]) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn
            .hset_multiple::<_, _, _, ()>(keys::agent_health(id), fields)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, "Failed to write agent health hash: {e}");
                false
            }
        }
    }

    pub async fn set_user_session(&self, user_name: &str, id: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.set::<_, _, ()>(keys::session_user(user_name), id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(user_name, "Failed to write user->session mapping: {e}");
                false
            }
        }
    }

    pub async fn get_user_session(&self, user_name: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        conn.get(keys::session_user(user_name)).await.ok()
    }

    /// `CleanupSession` — deletes `session:{id}`, `session:{id}:config`,
    /// every `agent:{id}:*` key, the user mapping (if given), and removes
    /// the id from both phase sets, in one logical pass.
    pub async fn cleanup_session(&self, id: &str, user_name: Option<&str>) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(keys::session(id))
            .del(keys::session_config(id))
            .del(keys::agent_pid(id))
            .del(keys::agent_logfile(id))
            .del(keys::agent_logs(id))
            .del(keys::agent_health(id))
            .srem(keys::SESSION_READY_SET, id)
            .srem(keys::SESSION_STARTING_SET, id);
        if let Some(user_name) = user_name {
            pipe.del(keys::session_user(user_name));
        }
        match pipe.query_async::<()>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, "CleanupSession failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_protocol::SessionStatus;

    #[test]
    fn phase_keys_match_schema() {
        assert_eq!(Phase::Ready.key(), "session:ready");
        assert_eq!(Phase::Starting.key(), "session:starting");
    }

    #[test]
    fn session_fields_round_trip() {
        let mut session = Session::new(
            "session_1_abc".to_string(),
            "alice".to_string(),
            "Olivia".to_string(),
            1_000,
        );
        session.status = SessionStatus::Ready;
        session.agent_pid = Some(4242);
        session.conversation_start_time = Some(1_005);

        let fields: HashMap<String, String> = session.to_fields().into_iter().collect();
        let restored = Session::from_fields(&fields).expect("round trip");
        assert_eq!(restored.session_id, session.session_id);
        assert_eq!(restored.status, SessionStatus::Ready);
        assert_eq!(restored.agent_pid, Some(4242));
        assert_eq!(restored.conversation_start_time, Some(1_005));
        assert_eq!(restored.opening_line, None);
    }
}
