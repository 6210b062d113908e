use serde::{Deserialize, Serialize};

/// The fixed voice enumeration. Unknown values fall
/// back to `Ashley` rather than rejecting the request.
pub const VALID_VOICES: &[&str] = &["Ashley", "Craig", "Edward", "Olivia", "Wendy", "Priya"];
pub const DEFAULT_VOICE: &str = "Ashley";

/// Normalize a requested voice id against `VALID_VOICES`, returning the
/// validated id and whether the original request was honored verbatim.
pub fn normalize_voice(requested: Option<&str>) -> (String, bool) {
    match requested {
        Some(v) if VALID_VOICES.contains(&v) => (v.to_string(), true),
        _ => (DEFAULT_VOICE.to_string(), false),
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Ready,
    Active,
    Error,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Ready => "ready",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(SessionStatus::Starting),
            "ready" => Ok(SessionStatus::Ready),
            "active" => Ok(SessionStatus::Active),
            "error" => Ok(SessionStatus::Error),
            "terminated" => Ok(SessionStatus::Terminated),
            _ => Err(()),
        }
    }
}

/// The orchestration unit. This is the
/// in-memory/wire shape; `SessionStore` maps it onto the `session:{id}`
/// hash field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_name: String,
    pub voice_id: String,
    pub opening_line: Option<String>,
    pub system_prompt: Option<String>,
    pub status: SessionStatus,
    pub agent_pid: Option<u32>,
    pub agent_pgid: Option<u32>,
    pub queue_task_id: Option<String>,
    pub log_file_path: Option<String>,
    pub start_time: u64,
    pub conversation_start_time: Option<u64>,
    pub conversation_duration: Option<u64>,
    pub conversation_duration_minutes: Option<u64>,
    pub termination_reason: Option<String>,
    pub last_active: u64,
    pub error: Option<String>,
    pub startup_time_secs: Option<f64>,
}

impl Session {
    pub fn new(session_id: String, user_name: String, voice_id: String, now: u64) -> Self {
        Self {
            session_id,
            user_name,
            voice_id,
            opening_line: None,
            system_prompt: None,
            status: SessionStatus::Starting,
            agent_pid: None,
            agent_pgid: None,
            queue_task_id: None,
            log_file_path: None,
            start_time: now,
            conversation_start_time: None,
            conversation_duration: None,
            conversation_duration_minutes: None,
            termination_reason: None,
            last_active: now,
            error: None,
            startup_time_secs: None,
        }
    }

    /// Flatten to the field/value pairs written into the `session:{id}`
    /// hash. Absent optionals are simply omitted — a missing field reads
    /// back as `None`.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("session_id".to_string(), self.session_id.clone()),
            ("user_name".to_string(), self.user_name.clone()),
            ("voice_id".to_string(), self.voice_id.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("start_time".to_string(), self.start_time.to_string()),
            ("last_active".to_string(), self.last_active.to_string()),
        ];
        let mut push = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                fields.push((k.to_string(), v));
            }
        };
        push("opening_line", self.opening_line.clone());
        push("system_prompt", self.system_prompt.clone());
        push("agent_pid", self.agent_pid.map(|v| v.to_string()));
        push("agent_pgid", self.agent_pgid.map(|v| v.to_string()));
        push("queue_task_id", self.queue_task_id.clone());
        push("log_file_path", self.log_file_path.clone());
        push(
            "conversation_start_time",
            self.conversation_start_time.map(|v| v.to_string()),
        );
        push(
            "conversation_duration",
            self.conversation_duration.map(|v| v.to_string()),
        );
        push(
            "conversation_duration_minutes",
            self.conversation_duration_minutes.map(|v| v.to_string()),
        );
        push("termination_reason", self.termination_reason.clone());
        push("error", self.error.clone());
        push(
            "startup_time_secs",
            self.startup_time_secs.map(|v| v.to_string()),
        );
        fields
    }

    /// Rebuild a Session from a flattened hash, as returned by `HGETALL`.
    /// Returns `None` when the hash is empty or missing a required field —
    /// both read as "session does not exist" to callers.
    pub fn from_fields(fields: &std::collections::HashMap<String, String>) -> Option<Self> {
        let get = |k: &str| fields.get(k).cloned();
        let session_id = get("session_id")?;
        let user_name = get("user_name")?;
        let voice_id = get("voice_id")?;
        let status = get("status")?.parse().ok()?;
        let start_time = get("start_time")?.parse().ok()?;
        let last_active = get("last_active")?.parse().ok()?;

        Some(Self {
            session_id,
            user_name,
            voice_id,
            opening_line: get("opening_line"),
            system_prompt: get("system_prompt"),
            status,
            agent_pid: get("agent_pid").and_then(|v| v.parse().ok()),
            agent_pgid: get("agent_pgid").and_then(|v| v.parse().ok()),
            queue_task_id: get("queue_task_id"),
            log_file_path: get("log_file_path"),
            start_time,
            conversation_start_time: get("conversation_start_time").and_then(|v| v.parse().ok()),
            conversation_duration: get("conversation_duration").and_then(|v| v.parse().ok()),
            conversation_duration_minutes: get("conversation_duration_minutes")
                .and_then(|v| v.parse().ok()),
            termination_reason: get("termination_reason"),
            last_active,
            error: get("error"),
            startup_time_secs: get("startup_time_secs").and_then(|v| v.parse().ok()),
        })
    }
}

impl SessionConfigRecord {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("voice_id".to_string(), self.voice_id.clone()),
            ("user_name".to_string(), self.user_name.clone()),
            ("updated_at".to_string(), self.updated_at.to_string()),
        ];
        if let Some(ref v) = self.opening_line {
            fields.push(("opening_line".to_string(), v.clone()));
        }
        if let Some(ref v) = self.system_prompt {
            fields.push(("system_prompt".to_string(), v.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &std::collections::HashMap<String, String>) -> Option<Self> {
        Some(Self {
            voice_id: fields.get("voice_id").cloned()?,
            user_name: fields.get("user_name").cloned()?,
            opening_line: fields.get("opening_line").cloned(),
            system_prompt: fields.get("system_prompt").cloned(),
            updated_at: fields.get("updated_at")?.parse().ok()?,
        })
    }
}

/// The separate voice-configuration record the agent reads back at spawn
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfigRecord {
    pub voice_id: String,
    pub user_name: String,
    pub opening_line: Option<String>,
    pub system_prompt: Option<String>,
    pub updated_at: u64,
}

/// Generate a `session_<ms>_<rand>` id.
pub fn generate_session_id(now_ms: u128, rand_suffix: &str) -> String {
    format!("session_{now_ms}_{rand_suffix}")
}

// ---- HTTP wire types ----

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartRequest {
    pub user_name: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub opening_line: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub correlation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStartResponse {
    pub success: bool,
    pub session_id: String,
    pub token: String,
    pub server_url: String,
    pub initial_credit_deducted: bool,
    pub credits_remaining: Option<i64>,
    pub minute_billed: u32,
    pub voice_validated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEndRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEndResponse {
    pub success: bool,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute_billed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_billed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveKitWebhookEvent {
    pub event: String,
    #[serde(default)]
    pub room: Option<RoomRef>,
    #[serde(default)]
    pub participant: Option<ParticipantRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantRef {
    #[serde(default)]
    pub identity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_voice_accepts_valid() {
        let (v, ok) = normalize_voice(Some("Olivia"));
        assert_eq!(v, "Olivia");
        assert!(ok);
    }

    #[test]
    fn normalize_voice_falls_back_on_unknown() {
        let (v, ok) = normalize_voice(Some("Bogus"));
        assert_eq!(v, "Ashley");
        assert!(!ok);
    }

    #[test]
    fn normalize_voice_falls_back_on_missing() {
        let (v, ok) = normalize_voice(None);
        assert_eq!(v, "Ashley");
        assert!(!ok);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["starting", "ready", "active", "error", "terminated"] {
            let parsed: SessionStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn generated_session_id_has_expected_shape() {
        let id = generate_session_id(1_700_000_000_000, "abc123def");
        assert_eq!(id, "session_1700000000000_abc123def");
    }
}
