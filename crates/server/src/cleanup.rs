//! Shared cleanup routine plus the single-shot guard that ensures a
//! session's teardown runs exactly once no matter how many disconnect
//! triggers fire concurrently (user end, webhook, reaper, billing
//! exhaustion).
//!
//! Every call runs all seven teardown steps; `self_terminated` is recorded
//! as a flag on the result rather than short-circuiting the remaining
//! steps, so store cleanup always happens regardless of how the agent
//! process went away.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use orchestrator_protocol::SessionStatus;
use serde::Serialize;

use crate::billing::CreditEngine;
use crate::spawn::{self, SpawnQueue};
use crate::store::{Phase, SessionStore};

/// Self-termination probe cadence during cleanup step 5a.
const SELF_TERM_PROBE_INTERVAL: Duration = Duration::from_millis(200);
/// Self-termination grace window.
const SELF_TERM_WINDOW: Duration = Duration::from_secs(3);
/// Graceful-term grace window before force-kill.
const GRACEFUL_TERM_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub enum CleanupTrigger {
    EndSession,
    Webhook,
    Reaper,
    InsufficientCredits,
}

#[derive(Debug, Default, Serialize)]
pub struct CleanupDetail {
    #[serde(rename = "celeryTaskRevoked")]
    pub queue_task_revoked: bool,
    #[serde(rename = "processKilled")]
    pub process_killed: bool,
    #[serde(rename = "selfTerminated", skip_serializing_if = "Option::is_none")]
    pub self_terminated: Option<bool>,
    #[serde(rename = "redisCleaned")]
    pub redis_cleaned: bool,
    #[serde(rename = "durationSeconds", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(rename = "durationMinutes", skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u64>,
    #[serde(rename = "billingReconciled")]
    pub billing_reconciled: bool,
    #[serde(rename = "minutesBilled", skip_serializing_if = "Option::is_none")]
    pub minutes_billed: Option<u32>,
    pub errors: Vec<String>,
}

impl CleanupDetail {
    fn not_found() -> Self {
        Self {
            errors: vec!["Session not found".to_string()],
            ..Default::default()
        }
    }
}

/// Single-shot guard: the first caller for a given session id "wins" and
/// runs the real teardown; every concurrent caller observes the cleanup
/// already in flight and gets the same "Session not found" detail the real
/// teardown's own step 1 would produce on a second run. This is what makes
/// `EndSession`/webhook/reaper races resolve to exactly one reconciliation.
///
/// The claim is released once the winning call finishes (`release`, called
/// from every return path in `run` below once `try_claim` succeeds) — this
/// is single-shot per cleanup *run*, not a permanent tombstone. `sessionId`
/// is an upstream-minted correlation token that can recur, so a claim left
/// in place forever would both leak memory and make a later, genuinely new
/// session with the same id uncleanable.
pub struct CleanupGuard {
    claimed: Mutex<HashSet<String>>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self {
            claimed: Mutex::new(HashSet::new()),
        }
    }

    fn try_claim(&self, session_id: &str) -> bool {
        self.claimed.lock().unwrap().insert(session_id.to_string())
    }

    fn release(&self, session_id: &str) {
        self.claimed.lock().unwrap().remove(session_id);
    }
}

impl Default for CleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: &SessionStore,
    credit_engine: &CreditEngine,
    queue: Option<&SpawnQueue>,
    guard: &CleanupGuard,
    session_id: &str,
    trigger: CleanupTrigger,
) -> CleanupDetail {
    if !guard.try_claim(session_id) {
        tracing::info!(session_id, ?trigger, "Cleanup already claimed by a concurrent trigger");
        return CleanupDetail::not_found();
    }

    // Step 1
    let Some(session) = store.get_session(session_id).await else {
        guard.release(session_id);
        return CleanupDetail::not_found();
    };

    let mut detail = CleanupDetail::default();

    // Step 2
    let duration_seconds = session.conversation_duration;
    let duration_minutes = session.conversation_duration_minutes;
    detail.duration_seconds = duration_seconds;
    detail.duration_minutes = duration_minutes;

    // Step 3
    if let Some(minutes) = duration_minutes
        && minutes > 0
    {
        let outcome = credit_engine.reconcile_session(session_id, minutes as u32).await;
        detail.billing_reconciled = outcome.success;
        detail.minutes_billed = Some(outcome.total_billed);
        if !outcome.success {
            detail.errors.push(format!(
                "Reconciliation incomplete: failed minutes {:?}",
                outcome.failed_minutes
            ));
        }
    }

    // Step 4 — best effort, never fatal.
    if let (Some(task_id), Some(queue)) = (&session.queue_task_id, queue) {
        detail.queue_task_revoked = queue.revoke(task_id).await;
    }

    // Step 5
    let mut self_terminated = false;
    let mut process_killed = false;
    if let Some(pid) = session.agent_pid {
        let pgid = session.agent_pgid.unwrap_or(pid);

        // 5a: give the agent's own participant-left handler a chance to
        // exit gracefully first.
        let deadline = tokio::time::Instant::now() + SELF_TERM_WINDOW;
        loop {
            if !spawn::process_group_alive(pgid) {
                self_terminated = true;
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SELF_TERM_PROBE_INTERVAL).await;
        }

        if !self_terminated {
            // 5b/5c: graceful-term the process group, then force-kill.
            spawn::terminate_process_group(pgid, GRACEFUL_TERM_WINDOW).await;
            process_killed = true;
        }
    }
    detail.self_terminated = Some(self_terminated);
    detail.process_killed = process_killed || self_terminated;

    // Step 6
    detail.redis_cleaned = store.cleanup_session(session_id, Some(&session.user_name)).await;
    store.remove_from_phase(Phase::Ready, session_id).await;
    store.remove_from_phase(Phase::Starting, session_id).await;

    tracing::info!(
        session_id,
        ?trigger,
        queue_task_revoked = detail.queue_task_revoked,
        process_killed = detail.process_killed,
        self_terminated,
        redis_cleaned = detail.redis_cleaned,
        "Session cleanup complete"
    );

    guard.release(session_id);
    detail
}

/// Helper used by the Heartbeat handler when it spawns an async terminator
/// on insufficient credits — flips status to `terminated` first so any
/// racing introspection call observes the intent even before cleanup
/// finishes.
pub async fn mark_terminating(store: &SessionStore, session_id: &str, record_ttl_secs: u64) {
    if let Some(mut session) = store.get_session(session_id).await {
        session.status = SessionStatus::Terminated;
        session.termination_reason = Some("insufficient_credits".to_string());
        store.put_session(&session, record_ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_claims_exactly_once_while_held() {
        let guard = CleanupGuard::new();
        assert!(guard.try_claim("s1"));
        assert!(!guard.try_claim("s1"));
        assert!(guard.try_claim("s2"));
    }

    #[test]
    fn guard_allows_reclaim_after_release() {
        // A recurring correlation token must be cleanable again once its
        // prior cleanup run has finished, not tombstoned forever.
        let guard = CleanupGuard::new();
        assert!(guard.try_claim("s1"));
        guard.release("s1");
        assert!(guard.try_claim("s1"));
    }
}
