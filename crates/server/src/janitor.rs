//! Janitors: the two periodic background loops that keep the session
//! store honest — `HealthCheck` (liveness demotion) and `Reaper` (stale
//! session teardown). Both delegate teardown to the shared cleanup routine
//! rather than duplicating key deletion inline.

use std::sync::Arc;
use std::time::Duration;

use orchestrator_protocol::SessionStatus;

use crate::cleanup::{self, CleanupGuard, CleanupTrigger};
use crate::spawn::SpawnQueue;
use crate::store::{Phase, SessionStore};

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const REAPER_INTERVAL: Duration = Duration::from_secs(300);

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Defense-in-depth identity check alongside the signal-0 probe: confirms
/// the pid still refers to the agent binary, guarding against the pid
/// having been recycled by an unrelated process between record and probe.
fn is_still_agent(pid: u32, agent_binary_name: &str) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|name| name.trim() == agent_binary_name)
        .unwrap_or(false)
}

/// `HealthCheck`: every 60s, probe every `ready`/`active`
/// session's agent process with signal 0. Demote dead ones to `error` and
/// drop them from the ready set.
pub async fn health_check_loop(
    store: Arc<SessionStore>,
    agent_binary_name: String,
    record_ttl_secs: u64,
) {
    loop {
        tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        let ready_ids = store.get_phase(Phase::Ready).await;
        for id in ready_ids {
            let Some(mut session) = store.get_session(&id).await else {
                store.remove_from_phase(Phase::Ready, &id).await;
                continue;
            };
            if !matches!(session.status, SessionStatus::Ready | SessionStatus::Active) {
                continue;
            }
            let Some(pid) = session.agent_pid else {
                continue;
            };
            let alive = crate::spawn::process_group_alive(pid) && is_still_agent(pid, &agent_binary_name);
            if !alive {
                tracing::warn!(session_id = %id, pid, "Process died unexpectedly");
                session.status = SessionStatus::Error;
                session.error = Some("Process died unexpectedly".to_string());
                store.put_session(&session, record_ttl_secs).await;
                store.remove_from_phase(Phase::Ready, &id).await;
            }
        }
    }
}

/// `Reaper`: every 300s, tear down any session idle beyond
/// `SESSION_TIMEOUT` (default 14400s).
pub async fn reaper_loop(
    store: Arc<SessionStore>,
    session_timeout_secs: u64,
    credit_engine: Arc<crate::billing::CreditEngine>,
    queue: Arc<SpawnQueue>,
    guard: Arc<CleanupGuard>,
) {
    loop {
        tokio::time::sleep(REAPER_INTERVAL).await;
        let ids = store.scan_session_ids(100).await;
        let now = now_unix();
        for id in ids {
            let Some(session) = store.get_session(&id).await else {
                continue;
            };
            if now.saturating_sub(session.last_active) <= session_timeout_secs {
                continue;
            }
            tracing::info!(session_id = %id, "Reaping stale session (idle timeout exceeded)");
            let detail = cleanup::run(
                &store,
                &credit_engine,
                Some(&queue),
                &guard,
                &id,
                CleanupTrigger::Reaper,
            )
            .await;
            if !detail.errors.is_empty() {
                tracing::warn!(session_id = %id, errors = ?detail.errors, "Reaper cleanup had errors");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadences_are_one_and_five_minutes() {
        assert_eq!(HEALTH_CHECK_INTERVAL, Duration::from_secs(60));
        assert_eq!(REAPER_INTERVAL, Duration::from_secs(300));
    }
}
