//! Spawner: consumes `SpawnAgent` jobs, launches the agent binary as a
//! process-group leader, tails its output, and waits for a readiness
//! marker within a bounded timeout. Retries with exponential backoff plus
//! jitter, up to three attempts.

use std::io::Write as _;
use std::os::unix::process::CommandExt as _;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use orchestrator_protocol::{Session, SessionConfigRecord, SessionStatus};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::store::{Phase, SessionStore};

/// Readiness markers.
const READINESS_MARKERS: &[&str] = &[
    "Connected to",
    "Pipeline started",
    "Room joined",
    "Participant joined",
];

const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF_SECS: u64 = 60;
/// Spawner readiness-timeout grace wait before force-kill.
const TIMEOUT_GRACE_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpawnJob {
    pub task_id: String,
    pub session_id: String,
    pub user_name: Option<String>,
}

/// Durable work queue for `SpawnAgent` jobs, backed by the same Redis
/// instance as the session store.
pub struct SpawnQueue {
    pool: deadpool_redis::Pool,
}

const QUEUE_KEY: &str = "spawn:queue";

impl SpawnQueue {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    /// Enqueue a job and return its task id (persisted onto the Session
    /// record by the caller so cleanup can later attempt revocation).
    pub async fn enqueue(&self, session_id: &str, user_name: Option<&str>) -> Option<String> {
        let job = SpawnJob {
            task_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_name: user_name.map(str::to_string),
        };
        let payload = serde_json::to_string(&job).ok()?;
        let mut conn = self.pool.get().await.ok()?;
        deadpool_redis::redis::AsyncCommands::rpush::<_, _, ()>(&mut conn, QUEUE_KEY, payload)
            .await
            .ok()?;
        Some(job.task_id)
    }

    /// Blocking pop with a timeout, for the dispatcher loop to poll.
    pub async fn dequeue(&self, timeout_secs: f64) -> Option<SpawnJob> {
        let mut conn = self.pool.get().await.ok()?;
        let result: Option<(String, String)> = deadpool_redis::redis::AsyncCommands::blpop(
            &mut conn,
            QUEUE_KEY,
            timeout_secs,
        )
        .await
        .ok()?;
        let (_key, payload) = result?;
        serde_json::from_str(&payload).ok()
    }

    /// Best-effort revocation: remove any still-queued job matching this
    /// task id. A job already popped by the dispatcher cannot be revoked
    /// this way; that is an accepted race.
    pub async fn revoke(&self, task_id: &str) -> bool {
        let Ok(mut conn) = self.pool.get().await else {
            return false;
        };
        let items: Vec<String> = match deadpool_redis::redis::AsyncCommands::lrange(&mut conn, QUEUE_KEY, 0, -1).await {
            Ok(v) => v,
            Err(_) => return false,
        };
        for payload in items {
            if let Ok(job) = serde_json::from_str::<SpawnJob>(&payload)
                && job.task_id == task_id
            {
                let _: Result<i64, _> =
                    deadpool_redis::redis::AsyncCommands::lrem(&mut conn, QUEUE_KEY, 1, &payload).await;
                return true;
            }
        }
        false
    }
}

pub struct SpawnerConfig {
    pub agent_binary_path: String,
    pub agent_log_dir: String,
    pub orchestrator_url: String,
    pub bot_startup_timeout: Duration,
    pub record_ttl_secs: u64,
}

pub struct Spawner {
    store: Arc<SessionStore>,
    config: SpawnerConfig,
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Spawner {
    pub fn new(store: Arc<SessionStore>, config: SpawnerConfig) -> Self {
        Self { store, config }
    }

    /// Process the `SpawnAgent` job end to end, including the retry loop
    /// (max 3 attempts, exponential backoff with jitter).
    pub async fn process(&self, job: SpawnJob) {
        let config_record = self.store.get_config(&job.session_id).await;
        let (voice_id, opening_line, system_prompt) = match &config_record {
            Some(SessionConfigRecord {
                voice_id,
                opening_line,
                system_prompt,
                ..
            }) => (voice_id.clone(), opening_line.clone(), system_prompt.clone()),
            None => {
                tracing::warn!(
                    session_id = %job.session_id,
                    "No SessionConfig found at spawn time, defaulting voice"
                );
                ("Ashley".to_string(), None, None)
            }
        };

        self.store.add_to_phase(Phase::Starting, &job.session_id).await;
        if let Some(mut session) = self.store.get_session(&job.session_id).await {
            session.status = SessionStatus::Starting;
            self.store.put_session(&session, self.config.record_ttl_secs).await;
        }

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = (1u64 << attempt).min(MAX_BACKOFF_SECS);
                let jitter_ms = rand::thread_rng().gen_range(0..1000);
                tracing::warn!(
                    session_id = %job.session_id,
                    attempt,
                    backoff_secs = backoff,
                    "Retrying agent spawn"
                );
                tokio::time::sleep(Duration::from_secs(backoff) + Duration::from_millis(jitter_ms)).await;
            }

            let start = std::time::Instant::now();
            match self
                .try_spawn_once(&job.session_id, &voice_id, opening_line.as_deref(), system_prompt.as_deref())
                .await
            {
                Ok(()) => {
                    self.mark_ready(&job, start.elapsed().as_secs_f64()).await;
                    return;
                }
                Err(e) => {
                    tracing::error!(session_id = %job.session_id, attempt, "Spawn attempt failed: {e}");
                    last_error = e.to_string();
                }
            }
        }

        self.mark_failed(&job.session_id, &last_error).await;
    }

    async fn mark_ready(&self, job: &SpawnJob, startup_time_secs: f64) {
        self.store.remove_from_phase(Phase::Starting, &job.session_id).await;
        self.store.add_to_phase(Phase::Ready, &job.session_id).await;
        if let Some(mut session) = self.store.get_session(&job.session_id).await {
            session.status = SessionStatus::Ready;
            session.startup_time_secs = Some(startup_time_secs);
            session.last_active = now_unix();
            self.store.put_session(&session, self.config.record_ttl_secs).await;
        }
        if let Some(user_name) = &job.user_name {
            self.store.set_user_session(user_name, &job.session_id).await;
        }
        tracing::info!(session_id = %job.session_id, startup_time_secs, "Agent ready");
    }

    async fn mark_failed(&self, session_id: &str, error: &str) {
        self.store.remove_from_phase(Phase::Starting, session_id).await;
        if let Some(mut session) = self.store.get_session(session_id).await {
            session.status = SessionStatus::Error;
            session.error = Some(error.to_string());
            self.store.put_session(&session, self.config.record_ttl_secs).await;
        }
        tracing::error!(session_id, error, "Agent spawn failed after retries");
    }

    /// A single spawn attempt: launch, drain, wait for readiness (or the
    /// bounded timeout), persist identity. Does not retry.
    async fn try_spawn_once(
        &self,
        session_id: &str,
        voice_id: &str,
        opening_line: Option<&str>,
        system_prompt: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.config.agent_binary_path);
        cmd.arg("--room")
            .arg(session_id)
            .arg("--voice-id")
            .arg(voice_id);
        if let Some(opening_line) = opening_line {
            cmd.arg("--opening-line").arg(opening_line);
        }
        if let Some(system_prompt) = system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }
        cmd.env("ORCHESTRATOR_URL", &self.config.orchestrator_url);
        cmd.env("RUST_LOG", "info");

        // Process-group-leader spawn: the POSIX equivalent of `setsid` in
        // the child, so signalling the group later (reaper, cleanup) reaches
        // every descendant without touching unrelated processes. Also dup
        // stderr onto stdout's fd so the single piped stream the reader
        // drains below carries both — spec requires stdout/stderr merged,
        // and the readiness-marker scan only ever looks at that one stream.
        //
        // SAFETY: setsid()/dup2() are async-signal-safe and are the only
        // things this closure does between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                nix::unistd::dup2(1, 2).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        std::fs::create_dir_all(&self.config.agent_log_dir).ok();
        let log_path = format!("{}/{}.log", self.config.agent_log_dir, session_id);
        let log_file = std::fs::File::create(&log_path)?;

        // IMPORTANT: never use Stdio::piped() without continuously draining
        // it — a full 64KB pipe buffer stalls the agent indefinitely.
        cmd.stdout(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("agent exited immediately after spawn"))?;
        let pgid = nix::unistd::getpgid(Some(Pid::from_raw(pid as i32)))
            .map(|p| p.as_raw() as u32)
            .unwrap_or(pid);
        if pgid != pid {
            tracing::warn!(session_id, pid, pgid, "Agent pgid != pid, kills may be incomplete");
        }

        self.store.set_agent_identity(session_id, pid, pgid, &log_path).await;
        if let Some(mut session) = self.store.get_session(session_id).await {
            session.agent_pid = Some(pid);
            session.agent_pgid = Some(pgid);
            session.log_file_path = Some(log_path.clone());
            self.store.put_session(&session, self.config.record_ttl_secs).await;
        }

        let stdout = child.stdout.take().expect("stdout piped above");
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let store = Arc::clone(&self.store);
        let session_id_owned = session_id.to_string();

        // Detached reader: drains stdout for the lifetime of the process,
        // independent of whether readiness is ever observed.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut log_file = log_file;
            let mut ready_tx = Some(ready_tx);
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let _ = writeln!(log_file, "{line}");
                        store.push_log(&session_id_owned, &line).await;
                        if let Some(tx) = ready_tx.take_if(|_| {
                            READINESS_MARKERS.iter().any(|m| line.contains(m))
                        }) {
                            let _ = tx.send(());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id_owned, "Agent log reader error: {e}");
                        break;
                    }
                }
            }
        });

        let wait = tokio::time::timeout(self.config.bot_startup_timeout, ready_rx).await;
        match wait {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_recv_error)) => {
                // Sender dropped without signaling: stdout closed (agent
                // exited) before any readiness marker appeared.
                Err(anyhow::anyhow!("agent exited before signalling readiness"))
            }
            Err(_timeout) => {
                tracing::warn!(session_id, pid, pgid, "Readiness timeout, terminating agent");
                terminate_process_group(pgid, TIMEOUT_GRACE_WAIT).await;
                Err(anyhow::anyhow!("timed out waiting for readiness marker"))
            }
        }
    }
}

/// Graceful-term the process group, wait, then force-kill if still alive.
/// Used by the Spawner on readiness timeout; the Reaper and Cleanup paths
/// implement their own variants with their own grace windows.
pub async fn terminate_process_group(pgid: u32, grace: Duration) {
    let pgid_signed = Pid::from_raw(-(pgid as i32));
    let _ = signal::kill(pgid_signed, Signal::SIGTERM);
    tokio::time::sleep(grace).await;
    if process_group_alive(pgid) {
        let _ = signal::kill(pgid_signed, Signal::SIGKILL);
    }
}

/// Signal-0 probe of a process group leader — returns true if the process
/// (and therefore very likely the group) is still alive.
pub fn process_group_alive(pgid: u32) -> bool {
    signal::kill(Pid::from_raw(pgid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_markers_cover_known_startup_lines() {
        assert!(READINESS_MARKERS.contains(&"Connected to"));
        assert!(READINESS_MARKERS.contains(&"Pipeline started"));
        assert!(READINESS_MARKERS.contains(&"Room joined"));
        assert!(READINESS_MARKERS.contains(&"Participant joined"));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let values: Vec<u64> = (0..MAX_ATTEMPTS).map(|a| (1u64 << a).min(MAX_BACKOFF_SECS)).collect();
        assert_eq!(values, vec![1, 2, 4]);
    }
}
