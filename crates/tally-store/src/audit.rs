//! Query audit log
//!
//! One `analysis_queries` row per question, one `analysis_query_attempts`
//! row per generate/validate/execute cycle. Writes happen synchronously
//! with each pipeline transition so a crash mid-run still leaves the
//! attempts that completed. Identifiers and timestamps are stored as TEXT
//! (UUID string, RFC 3339).

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use tally_core::{AttemptRecord, QueryRecord, QueryStatus};

use crate::StoreError;

#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the audit tables if absent. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis_queries (
                id TEXT PRIMARY KEY,
                household_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                final_sql TEXT,
                final_answer TEXT,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis_query_attempts (
                id TEXT PRIMARY KEY,
                query_id TEXT NOT NULL REFERENCES analysis_queries(id),
                attempt_number INTEGER NOT NULL,
                generated_sql TEXT NOT NULL,
                llm_reason TEXT,
                validation_ok INTEGER NOT NULL,
                validation_reason TEXT,
                execution_ok INTEGER NOT NULL,
                db_error TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (query_id, attempt_number)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_queries_household
             ON analysis_queries (household_id, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_attempts_query
             ON analysis_query_attempts (query_id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the question row in `running` state. Returns its id.
    pub async fn start_query(
        &self,
        household_id: Uuid,
        user_id: Uuid,
        provider: &str,
        model: &str,
        question: &str,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO analysis_queries
             (id, household_id, user_id, provider, model, question, status,
              attempt_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
        )
        .bind(id.to_string())
        .bind(household_id.to_string())
        .bind(user_id.to_string())
        .bind(provider)
        .bind(model)
        .bind(question)
        .bind(QueryStatus::Running.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        debug!(query = %id, "audit: query started");
        Ok(id)
    }

    /// Persist one attempt and bump the parent's attempt count in a single
    /// transaction.
    pub async fn record_attempt(
        &self,
        query_id: Uuid,
        attempt: &AttemptRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO analysis_query_attempts
             (id, query_id, attempt_number, generated_sql, llm_reason,
              validation_ok, validation_reason, execution_ok, db_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(query_id.to_string())
        .bind(attempt.attempt_number as i64)
        .bind(&attempt.generated_sql)
        .bind(&attempt.llm_reason)
        .bind(attempt.validation_ok as i64)
        .bind(&attempt.validation_reason)
        .bind(attempt.execution_ok as i64)
        .bind(&attempt.db_error)
        .bind(attempt.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE analysis_queries
             SET attempt_count = MAX(attempt_count, ?2), updated_at = ?3
             WHERE id = ?1",
        )
        .bind(query_id.to_string())
        .bind(attempt.attempt_number as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(query = %query_id, attempt = attempt.attempt_number, "audit: attempt recorded");
        Ok(())
    }

    /// Close the question row with its terminal status.
    pub async fn finalize_query(
        &self,
        query_id: Uuid,
        status: QueryStatus,
        final_sql: Option<&str>,
        final_answer: Option<&str>,
        failure_reason: Option<&str>,
        attempt_count: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE analysis_queries
             SET status = ?2, final_sql = ?3, final_answer = ?4,
                 failure_reason = ?5, attempt_count = ?6, updated_at = ?7
             WHERE id = ?1",
        )
        .bind(query_id.to_string())
        .bind(status.as_str())
        .bind(final_sql)
        .bind(final_answer)
        .bind(failure_reason)
        .bind(attempt_count as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(query = %query_id, status = status.as_str(), "audit: query finalized");
        Ok(())
    }

    /// Ids of a household's questions, newest first.
    pub async fn household_queries(&self, household_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM analysis_queries
             WHERE household_id = ?1
             ORDER BY created_at DESC",
        )
        .bind(household_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                parse_uuid(&id)
            })
            .collect()
    }

    /// Fetch one question with its attempts, ordered by attempt number.
    pub async fn load_query(
        &self,
        query_id: Uuid,
    ) -> Result<(QueryRecord, Vec<AttemptRecord>), StoreError> {
        let row = sqlx::query(
            "SELECT id, household_id, user_id, provider, model, question, status,
                    attempt_count, final_sql, final_answer, failure_reason,
                    created_at, updated_at
             FROM analysis_queries WHERE id = ?1",
        )
        .bind(query_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let status_text: String = row.try_get("status")?;
        let record = QueryRecord {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            household_id: parse_uuid(&row.try_get::<String, _>("household_id")?)?,
            user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            question: row.try_get("question")?,
            status: QueryStatus::parse(&status_text)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{status_text}'")))?,
            attempt_count: row.try_get::<i64, _>("attempt_count")? as u32,
            final_sql: row.try_get("final_sql")?,
            final_answer: row.try_get("final_answer")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        };

        let rows = sqlx::query(
            "SELECT attempt_number, generated_sql, llm_reason, validation_ok,
                    validation_reason, execution_ok, db_error, created_at
             FROM analysis_query_attempts
             WHERE query_id = ?1
             ORDER BY attempt_number",
        )
        .bind(query_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut attempts = Vec::with_capacity(rows.len());
        for row in rows {
            attempts.push(AttemptRecord {
                attempt_number: row.try_get::<i64, _>("attempt_number")? as u32,
                generated_sql: row.try_get("generated_sql")?,
                llm_reason: row.try_get("llm_reason")?,
                validation_ok: row.try_get::<i64, _>("validation_ok")? != 0,
                validation_reason: row.try_get("validation_reason")?,
                execution_ok: row.try_get::<i64, _>("execution_ok")? != 0,
                db_error: row.try_get("db_error")?,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            });
        }
        Ok((record, attempts))
    }
}

fn parse_uuid(text: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|e| StoreError::Corrupt(format!("bad uuid '{text}': {e}")))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_pool;

    async fn log() -> (AuditLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("audit.db")).await.unwrap();
        let log = AuditLog::new(pool);
        log.migrate().await.unwrap();
        (log, dir)
    }

    fn attempt(n: u32, validation_ok: bool, execution_ok: bool) -> AttemptRecord {
        AttemptRecord {
            attempt_number: n,
            generated_sql: format!("SELECT {n}"),
            llm_reason: Some("sums the month".into()),
            validation_ok,
            validation_reason: (!validation_ok).then(|| "statement kind not allowed".into()),
            execution_ok,
            db_error: (validation_ok && !execution_ok).then(|| "no such column: categry".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_round_trips() {
        let (log, _dir) = log().await;
        let household = Uuid::new_v4();
        let user = Uuid::new_v4();
        let id = log
            .start_query(household, user, "openai", "gpt-4o-mini", "food spend?")
            .await
            .unwrap();

        log.record_attempt(id, &attempt(1, false, false)).await.unwrap();
        log.record_attempt(id, &attempt(2, true, true)).await.unwrap();
        log.finalize_query(
            id,
            QueryStatus::Success,
            Some("SELECT 2"),
            Some("You spent 49.50 in total."),
            None,
            2,
        )
        .await
        .unwrap();

        let (record, attempts) = log.load_query(id).await.unwrap();
        assert_eq!(record.household_id, household);
        assert_eq!(record.status, QueryStatus::Success);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.final_sql.as_deref(), Some("SELECT 2"));
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].validation_ok);
        assert_eq!(
            attempts[0].validation_reason.as_deref(),
            Some("statement kind not allowed")
        );
        assert!(attempts[1].execution_ok);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (log, _dir) = log().await;
        log.migrate().await.unwrap();
        log.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn failed_run_keeps_failure_reason() {
        let (log, _dir) = log().await;
        let id = log
            .start_query(Uuid::new_v4(), Uuid::new_v4(), "mock", "scripted", "q")
            .await
            .unwrap();
        for n in 1..=3 {
            log.record_attempt(id, &attempt(n, true, false)).await.unwrap();
        }
        log.finalize_query(
            id,
            QueryStatus::Failed,
            None,
            None,
            Some("no such column: categry"),
            3,
        )
        .await
        .unwrap();

        let (record, attempts) = log.load_query(id).await.unwrap();
        assert_eq!(record.status, QueryStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("no such column: categry"));
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].db_error.as_deref(), Some("no such column: categry"));
    }

    #[tokio::test]
    async fn duplicate_attempt_number_is_rejected() {
        let (log, _dir) = log().await;
        let id = log
            .start_query(Uuid::new_v4(), Uuid::new_v4(), "mock", "scripted", "q")
            .await
            .unwrap();
        log.record_attempt(id, &attempt(1, true, true)).await.unwrap();
        let err = log.record_attempt(id, &attempt(1, true, true)).await;
        assert!(err.is_err());
    }
}
