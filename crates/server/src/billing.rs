//! CreditEngine: the transactional per-minute billing meter.
//!
//! `minutes_billed` is written with `GREATEST(minutes_billed, $minute)`
//! instead of an unconditional overwrite, and the
//! `billed_minutes(session_id, minute_number)` unique-constraint table —
//! not the Redis marker — is the authority for "has this minute already
//! been billed". The Redis marker is kept as a cheap fast-path check
//! before opening a transaction, but it is no longer load-bearing for
//! correctness.

use deadpool_redis::{Pool as RedisPool, redis::AsyncCommands};
use orchestrator_protocol::keys;
use sqlx::PgPool;

const IDEMPOTENCY_MARKER_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductMinuteResult {
    Success,
    AlreadyBilled,
    InsufficientCredits,
    SessionNotFound,
    StudentNotFound,
}

#[derive(thiserror::Error, Debug)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct DeductOutcome {
    pub result: DeductMinuteResult,
    pub balance_after: Option<i64>,
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub success: bool,
    pub billed_now: u32,
    pub total_billed: u32,
    pub failed_minutes: Vec<u32>,
}

pub struct CreditEngine {
    db: PgPool,
    redis: RedisPool,
}

impl CreditEngine {
    pub fn new(db: PgPool, redis: RedisPool) -> Self {
        Self { db, redis }
    }

    /// `GetStudentId` — looks up `simulation_attempts.student_id` by
    /// `correlation_token`.
    pub async fn get_student_id(&self, session_id: &str) -> Option<String> {
        match sqlx::query_scalar::<_, String>(
            r#"SELECT student_id FROM simulation_attempts WHERE correlation_token = $1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(session_id, "Failed to look up student id: {e}");
                None
            }
        }
    }

    /// `CheckSufficient` — compares `credit_balance >= n`.
    pub async fn check_sufficient(&self, student_id: &str, required: i64) -> bool {
        match sqlx::query_scalar::<_, i64>(
            r#"SELECT credit_balance FROM students WHERE id = $1"#,
        )
        .bind(student_id)
        .fetch_optional(&self.db)
        .await
        {
            Ok(Some(balance)) => balance >= required,
            Ok(None) => {
                tracing::warn!(student_id, "Student not found during credit check");
                false
            }
            Err(e) => {
                tracing::error!(student_id, "Failed to check credit balance: {e}");
                false
            }
        }
    }

    /// `DeductMinute` — the critical path.
    pub async fn deduct_minute(&self, session_id: &str, minute_number: u32) -> DeductOutcome {
        let marker = keys::credit_billed_marker(session_id, minute_number);
        if let Ok(mut conn) = self.redis.get().await
            && conn.exists::<_, bool>(&marker).await.unwrap_or(false)
        {
            tracing::debug!(session_id, minute_number, "Minute already billed (Redis fast path)");
            return DeductOutcome {
                result: DeductMinuteResult::AlreadyBilled,
                balance_after: None,
            };
        }

        let Some(student_id) = self.get_student_id(session_id).await else {
            tracing::error!(session_id, "Cannot bill session: SimulationAttempt not found");
            return DeductOutcome {
                result: DeductMinuteResult::SessionNotFound,
                balance_after: None,
            };
        };

        let outcome = self
            .deduct_minute_tx(session_id, &student_id, minute_number)
            .await;

        match outcome {
            Ok(DeductOutcome {
                result: DeductMinuteResult::Success,
                balance_after,
            }) => {
                if let Ok(mut conn) = self.redis.get().await {
                    let _: Result<(), _> = conn
                        .set_ex(&marker, "1", IDEMPOTENCY_MARKER_TTL_SECS)
                        .await;
                }
                DeductOutcome {
                    result: DeductMinuteResult::Success,
                    balance_after,
                }
            }
            Ok(other) => other,
            Err(e) => {
                tracing::error!(
                    session_id,
                    minute_number,
                    "Error deducting credit: {e}"
                );
                DeductOutcome {
                    result: DeductMinuteResult::SessionNotFound,
                    balance_after: None,
                }
            }
        }
    }

    async fn deduct_minute_tx(
        &self,
        session_id: &str,
        student_id: &str,
        minute_number: u32,
    ) -> Result<DeductOutcome, BillingError> {
        let mut tx = self.db.begin().await?;

        // `billed_minutes` is the correctness authority: a retry after a crash between commit and Redis
        // `SETEX` inserts zero rows here and the balance update below is
        // skipped entirely.
        let inserted = sqlx::query(
            r#"INSERT INTO billed_minutes (session_id, minute_number)
               VALUES ($1, $2)
               ON CONFLICT (session_id, minute_number) DO NOTHING"#,
        )
        .bind(session_id)
        .bind(minute_number as i32)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(DeductOutcome {
                result: DeductMinuteResult::AlreadyBilled,
                balance_after: None,
            });
        }

        let balance: Option<i64> = sqlx::query_scalar(
            r#"SELECT credit_balance FROM students WHERE id = $1 FOR UPDATE"#,
        )
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current_balance) = balance else {
            tx.rollback().await?;
            return Ok(DeductOutcome {
                result: DeductMinuteResult::StudentNotFound,
                balance_after: None,
            });
        };

        if current_balance < 1 {
            tx.rollback().await?;
            return Ok(DeductOutcome {
                result: DeductMinuteResult::InsufficientCredits,
                balance_after: Some(current_balance),
            });
        }

        let new_balance = current_balance - 1;
        sqlx::query(r#"UPDATE students SET credit_balance = $1 WHERE id = $2"#)
            .bind(new_balance)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO credit_transactions
                 (id, student_id, transaction_type, amount, balance_after,
                  source_type, source_id, description, created_at)
               VALUES (gen_random_uuid(), $1, 'DEBIT', 1, $2, 'SIMULATION', $3, $4, now())"#,
        )
        .bind(student_id)
        .bind(new_balance)
        .bind(session_id)
        .bind(format!("Voice simulation - minute {minute_number}"))
        .execute(&mut *tx)
        .await?;

        // GREATEST, not unconditional overwrite, keeps this monotonic even if
        // an older minute is billed after a newer one during reconciliation.
        sqlx::query(
            r#"UPDATE simulation_attempts
               SET minutes_billed = GREATEST(minutes_billed, $1)
               WHERE correlation_token = $2"#,
        )
        .bind(minute_number as i32)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            student_id,
            session_id,
            minute_number,
            balance_before = current_balance,
            balance_after = new_balance,
            "Credit deducted"
        );

        Ok(DeductOutcome {
            result: DeductMinuteResult::Success,
            balance_after: Some(new_balance),
        })
    }

    /// `ReconcileSession` — bills any minutes elapsed but not yet billed,
    /// stopping at the first insufficient-credits failure.
    pub async fn reconcile_session(&self, session_id: &str, total_minutes: u32) -> ReconcileOutcome {
        let row = sqlx::query_as::<_, (i32,)>(
            r#"SELECT minutes_billed FROM simulation_attempts WHERE correlation_token = $1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await;

        let last_billed = match row {
            Ok(Some((n,))) => n.max(0) as u32,
            Ok(None) => {
                tracing::error!(session_id, "Cannot reconcile: session not found");
                return ReconcileOutcome {
                    success: false,
                    billed_now: 0,
                    total_billed: 0,
                    failed_minutes: Vec::new(),
                };
            }
            Err(e) => {
                tracing::error!(session_id, "Failed to read minutes_billed: {e}");
                return ReconcileOutcome {
                    success: false,
                    billed_now: 0,
                    total_billed: 0,
                    failed_minutes: Vec::new(),
                };
            }
        };

        let mut billed_now = 0u32;
        let mut failed_minutes = Vec::new();

        for minute in (last_billed + 1)..=total_minutes {
            let outcome = self.deduct_minute(session_id, minute).await;
            match outcome.result {
                DeductMinuteResult::Success | DeductMinuteResult::AlreadyBilled => {
                    billed_now += 1;
                }
                DeductMinuteResult::InsufficientCredits => {
                    tracing::warn!(session_id, minute, "Insufficient credits during reconciliation");
                    failed_minutes.push(minute);
                    break;
                }
                other => {
                    tracing::error!(session_id, minute, ?other, "Failed to bill minute during reconciliation");
                    failed_minutes.push(minute);
                }
            }
        }

        ReconcileOutcome {
            success: failed_minutes.is_empty(),
            billed_now,
            total_billed: last_billed + billed_now,
            failed_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduct_minute_result_equality() {
        assert_eq!(DeductMinuteResult::Success, DeductMinuteResult::Success);
        assert_ne!(DeductMinuteResult::Success, DeductMinuteResult::AlreadyBilled);
    }
}
