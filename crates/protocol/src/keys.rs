//! The fixed Redis key schema. Centralized here so the session store is
//! the only place that builds a key string — every other component goes
//! through its typed operations instead of formatting keys itself.

/// `session:{id}` — hash of Session attributes.
pub fn session(id: &str) -> String {
    format!("session:{id}")
}

/// `session:{id}:config` — hash of SessionConfig.
pub fn session_config(id: &str) -> String {
    format!("session:{id}:config")
}

/// `session:ready` — set of session ids with a running, reachable agent.
pub const SESSION_READY_SET: &str = "session:ready";

/// `session:starting` — set of session ids whose spawn is in flight.
pub const SESSION_STARTING_SET: &str = "session:starting";

/// `session:user:{userName}` — string mapping to the user's active session id.
pub fn session_user(user_name: &str) -> String {
    format!("session:user:{user_name}")
}

/// `agent:{id}:pid`
pub fn agent_pid(id: &str) -> String {
    format!("agent:{id}:pid")
}

/// `agent:{id}:logfile`
pub fn agent_logfile(id: &str) -> String {
    format!("agent:{id}:logfile")
}

/// `agent:{id}:logs` — list, trimmed to the last `LOG_RING_CAPACITY` entries.
pub fn agent_logs(id: &str) -> String {
    format!("agent:{id}:logs")
}

/// `agent:{id}:health` — hash.
pub fn agent_health(id: &str) -> String {
    format!("agent:{id}:health")
}

/// `credit:billed:{sessionId}:{minuteNumber}` — fast-path idempotency marker.
/// The `billed_minutes` table (Postgres) is the correctness authority; this
/// marker exists only to short-circuit the common case before opening a
/// transaction.
pub fn credit_billed_marker(session_id: &str, minute_number: u32) -> String {
    format!("credit:billed:{session_id}:{minute_number}")
}

/// Bounded ring buffer capacity for `agent:{id}:logs`.
pub const LOG_RING_CAPACITY: isize = 100;

/// Prefixes `ListSessionIds`/`ScanSessionIds` must skip.
pub fn is_session_hash_key(key: &str) -> bool {
    key.starts_with("session:")
        && !key.ends_with(":config")
        && key != SESSION_READY_SET
        && key != SESSION_STARTING_SET
        && !key.starts_with("session:user:")
}

/// Extract the bare session id from a `session:{id}` key, or `None` if the
/// key doesn't match that shape (used by the scan filter above).
pub fn session_id_from_key(key: &str) -> Option<&str> {
    if is_session_hash_key(key) {
        key.strip_prefix("session:")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_config_and_index_keys() {
        assert!(is_session_hash_key("session:abc123"));
        assert!(!is_session_hash_key("session:abc123:config"));
        assert!(!is_session_hash_key("session:ready"));
        assert!(!is_session_hash_key("session:starting"));
        assert!(!is_session_hash_key("session:user:alice"));
    }

    #[test]
    fn extracts_id_only_from_hash_keys() {
        assert_eq!(session_id_from_key("session:abc123"), Some("abc123"));
        assert_eq!(session_id_from_key("session:abc123:config"), None);
        assert_eq!(session_id_from_key("session:user:alice"), None);
    }
}
