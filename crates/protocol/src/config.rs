use serde::{Deserialize, Serialize};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub room_service: RoomServiceConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionTimingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection details for the external real-time audio broker ("room
/// service"). The broker itself is an external collaborator;
/// this crate only mints join credentials and verifies webhook signatures
/// against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomServiceConfig {
    /// Public URL handed back to clients so they know where to connect.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

/// Shared key/value store — the session store and the durable spawn queue
/// both live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// PostgreSQL connection for the credit-billing tables. This database is
/// an external collaborator — its schema is owned elsewhere; this crate
/// only reads/writes `students`, `simulation_attempts`, and
/// `credit_transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimingConfig {
    /// Reaper TTL: sessions idle longer than this are torn down.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Spawner readiness deadline.
    #[serde(default = "default_bot_startup_timeout")]
    pub bot_startup_timeout_secs: u64,
    /// Session/config record TTL in the store.
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u64,
    /// Room-join credential TTL.
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path to the agent binary on disk (argv[0] for the Spawner).
    #[serde(default = "default_agent_binary")]
    pub binary_path: String,
    /// Directory the Spawner writes per-session agent log files into.
    #[serde(default = "default_agent_log_dir")]
    pub log_dir: String,
    /// URL the agent POSTs heartbeats back to.
    #[serde(default)]
    pub orchestrator_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `console` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}
fn default_pool_size() -> u32 {
    5
}
fn default_session_timeout() -> u64 {
    14_400
}
fn default_bot_startup_timeout() -> u64 {
    30
}
fn default_record_ttl() -> u64 {
    14_400
}
fn default_credential_ttl() -> u64 {
    7_200
}
fn default_agent_binary() -> String {
    "orchestrator-agent".to_string()
}
fn default_agent_log_dir() -> String {
    "/var/log/orchestrator/agents".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "console".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for RoomServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_pool_size(),
        }
    }
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            bot_startup_timeout_secs: default_bot_startup_timeout(),
            record_ttl_secs: default_record_ttl(),
            credential_ttl_secs: default_credential_ttl(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: default_agent_binary(),
            log_dir: default_agent_log_dir(),
            orchestrator_url: String::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            room_service: RoomServiceConfig::default(),
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            session: SessionTimingConfig::default(),
            agent: AgentConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Overlay environment variables onto a loaded config. Values explicitly
    /// present in the TOML file are not overridden unless the corresponding
    /// env var is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LIVEKIT_URL") {
            self.room_service.url = v;
        }
        if let Ok(v) = std::env::var("LIVEKIT_API_KEY") {
            self.room_service.api_key = v;
        }
        if let Ok(v) = std::env::var("LIVEKIT_API_SECRET") {
            self.room_service.api_secret = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_URL") {
            self.agent.orchestrator_url = v;
        }
        if let Ok(v) = std::env::var("AGENT_LOG_DIR") {
            self.agent.log_dir = v;
        }
        if let Ok(v) = std::env::var("SESSION_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.session.session_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("BOT_STARTUP_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.session.bot_startup_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            self.log.format = v;
        }
    }

    /// Validate configuration semantics, returning a list of ERROR/WARNING
    /// strings. An `Err` is only returned when at least one ERROR is present;
    /// warnings alone are reported via `Ok` so the caller can log-and-continue.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must not be 0".to_string());
        }

        if self.room_service.url.is_empty() {
            issues.push("ERROR: room_service.url (LIVEKIT_URL) is required".to_string());
        }
        if self.room_service.api_key.is_empty() || self.room_service.api_secret.is_empty() {
            issues.push(
                "ERROR: room_service.api_key and api_secret (LIVEKIT_API_KEY/SECRET) are required"
                    .to_string(),
            );
        }

        if self.database.url.is_empty() {
            issues.push("ERROR: database.url (DATABASE_URL) is required".to_string());
        }

        if self.session.bot_startup_timeout_secs == 0 {
            issues.push("ERROR: session.bot_startup_timeout_secs must not be 0".to_string());
        }
        if self.session.session_timeout_secs < 60 {
            issues.push(
                "WARNING: session.session_timeout_secs is under 60s, the reaper will be very aggressive"
                    .to_string(),
            );
        }

        if !matches!(self.log.format.as_str(), "console" | "json") {
            issues.push(format!(
                "WARNING: log.format '{}' is not 'console' or 'json', defaulting to console",
                self.log.format
            ));
        }

        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        if has_errors { Err(issues) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.room_service.url = "wss://room.example".to_string();
        config.room_service.api_key = "key".to_string();
        config.room_service.api_secret = "secret".to_string();
        config.database.url = "postgres://localhost/voice".to_string();
        config
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_room_service_url_is_error() {
        let mut config = valid_config();
        config.room_service.url.clear();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("room_service.url")));
    }

    #[test]
    fn missing_database_url_is_error() {
        let mut config = valid_config();
        config.database.url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_zero_is_error() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_session_timeout_is_warning_not_error() {
        let mut config = valid_config();
        config.session.session_timeout_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.session.session_timeout_secs, 14_400);
        assert_eq!(config.session.bot_startup_timeout_secs, 30);
        assert_eq!(config.session.record_ttl_secs, 14_400);
        assert_eq!(config.session.credential_ttl_secs, 7_200);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: tests run single-threaded within this process for env vars
        // that only this test touches.
        unsafe {
            std::env::set_var("SESSION_TIMEOUT", "99");
        }
        let mut config = OrchestratorConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.session.session_timeout_secs, 99);
        unsafe {
            std::env::remove_var("SESSION_TIMEOUT");
        }
    }
}
