//! Scoped read-only execution
//!
//! Accepted SQL never runs as-is. The executor wraps it structurally:
//!
//! ```text
//! WITH household_expenses AS (… WHERE e.household_id = ?1 …)
//! SELECT * FROM ( <candidate sql> ) AS agent_result
//! LIMIT <row_limit>
//! ```
//!
//! The household id is a bound parameter, never interpolated, so scoping
//! holds regardless of what the model generated. The pool underneath is
//! opened read-only and the whole statement runs under a timeout.

use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};
use uuid::Uuid;

use tally_core::{Cell, ResultSet};

/// Execution failure carrying the literal database error text. The repair
/// prompt forwards this verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ExecFailure(pub String);

/// Household-filtered projection of the expense table, joined with the
/// member who logged each entry. This is the only relation candidate SQL
/// may reference.
const HOUSEHOLD_CTE: &str = "\
WITH household_expenses AS (
    SELECT
        e.id AS expense_id,
        e.household_id,
        e.logged_by_user_id,
        COALESCE(u.full_name, 'Unknown') AS logged_by,
        e.status,
        COALESCE(e.category, 'Other') AS category,
        e.subcategory,
        e.description,
        e.merchant_or_item,
        e.amount,
        e.currency,
        e.date_incurred,
        e.is_recurring,
        e.created_at,
        e.updated_at
    FROM expenses e
    LEFT JOIN users u ON u.id = e.logged_by_user_id
    WHERE e.household_id = ?1
)";

pub struct ScopedExecutor {
    pool: SqlitePool,
    statement_timeout: Duration,
    row_limit: u32,
}

impl ScopedExecutor {
    pub fn new(pool: SqlitePool, statement_timeout: Duration, row_limit: u32) -> Self {
        Self {
            pool,
            statement_timeout,
            row_limit,
        }
    }

    fn wrap(&self, sql: &str) -> String {
        format!(
            "{HOUSEHOLD_CTE}\nSELECT * FROM (\n{}\n) AS agent_result\nLIMIT {}",
            sql.trim(),
            self.row_limit
        )
    }

    /// Run validated SQL for one household. Returns the rows or the literal
    /// database error text; the caller decides whether to retry.
    pub async fn execute(&self, sql: &str, household_id: Uuid) -> Result<ResultSet, ExecFailure> {
        let wrapped = self.wrap(sql);
        debug!(household = %household_id, "executing scoped query");

        let query = sqlx::query(&wrapped).bind(household_id.to_string());
        let rows = match tokio::time::timeout(self.statement_timeout, query.fetch_all(&self.pool))
            .await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => {
                let message = err.to_string();
                warn!(household = %household_id, error = %message, "scoped query failed");
                return Err(ExecFailure(message));
            }
            Err(_) => {
                warn!(household = %household_id, "scoped query timed out");
                return Err(ExecFailure(format!(
                    "statement timed out after {}s",
                    self.statement_timeout.as_secs()
                )));
            }
        };

        Ok(rows_to_result_set(&rows))
    }
}

fn rows_to_result_set(rows: &[SqliteRow]) -> ResultSet {
    let Some(first) = rows.first() else {
        return ResultSet::default();
    };
    let columns: Vec<String> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let decoded = rows
        .iter()
        .map(|row| (0..columns.len()).map(|i| decode_cell(row, i)).collect())
        .collect();
    ResultSet {
        columns,
        rows: decoded,
    }
}

/// Decode one SQLite value into a [`Cell`] without trusting declared column
/// types; SQLite stores whatever each row actually holds.
fn decode_cell(row: &SqliteRow, index: usize) -> Cell {
    let Ok(raw) = row.try_get_raw(index) else {
        return Cell::Null;
    };
    if raw.is_null() {
        return Cell::Null;
    }
    match raw.type_info().name() {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<i64, _>(index)
            .map(Cell::Int)
            .unwrap_or(Cell::Null),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(Cell::Float)
            .unwrap_or(Cell::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Cell::Text)
            .unwrap_or(Cell::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{open_pool, open_read_pool};

    async fn seeded(dir: &tempfile::TempDir, household: Uuid) -> SqlitePool {
        let path = dir.path().join("tally.db");
        let pool = open_pool(&path).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id TEXT PRIMARY KEY, full_name TEXT NOT NULL,
             household_id TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE expenses (
                id TEXT PRIMARY KEY, household_id TEXT NOT NULL,
                logged_by_user_id TEXT NOT NULL, amount REAL, currency TEXT,
                category TEXT, subcategory TEXT, description TEXT,
                merchant_or_item TEXT, date_incurred TEXT NOT NULL,
                is_recurring INTEGER NOT NULL DEFAULT 0, status TEXT NOT NULL,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO users (id, full_name, household_id) VALUES ('u1', 'Asha', ?1)")
            .bind(household.to_string())
            .execute(&pool)
            .await
            .unwrap();
        for (id, hh, amount, category) in [
            ("e1", household.to_string(), 42.5, "Food"),
            ("e2", household.to_string(), 7.0, "Transport"),
            ("e3", Uuid::new_v4().to_string(), 999.0, "Food"),
        ] {
            sqlx::query(
                "INSERT INTO expenses
                 (id, household_id, logged_by_user_id, amount, category, date_incurred,
                  status, created_at, updated_at)
                 VALUES (?1, ?2, 'u1', ?3, ?4, '2026-08-10', 'confirmed', 'now', 'now')",
            )
            .bind(id)
            .bind(hh)
            .bind(amount)
            .bind(category)
            .execute(&pool)
            .await
            .unwrap();
        }
        drop(pool);
        open_read_pool(&path).await.unwrap()
    }

    #[tokio::test]
    async fn only_sees_own_household_rows() {
        let dir = tempfile::tempdir().unwrap();
        let household = Uuid::new_v4();
        let pool = seeded(&dir, household).await;
        let exec = ScopedExecutor::new(pool, Duration::from_secs(10), 200);

        let result = exec
            .execute(
                "SELECT SUM(amount) AS total FROM household_expenses",
                household,
            )
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["total"]);
        assert_eq!(result.rows, vec![vec![Cell::Float(49.5)]]);
    }

    #[tokio::test]
    async fn outer_limit_caps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let household = Uuid::new_v4();
        let pool = seeded(&dir, household).await;
        let exec = ScopedExecutor::new(pool, Duration::from_secs(10), 1);

        let result = exec
            .execute("SELECT category FROM household_expenses", household)
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn db_error_text_surfaces_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let household = Uuid::new_v4();
        let pool = seeded(&dir, household).await;
        let exec = ScopedExecutor::new(pool, Duration::from_secs(10), 200);

        let err = exec
            .execute("SELECT categry FROM household_expenses", household)
            .await
            .unwrap_err();
        assert!(err.0.contains("categry"), "got: {}", err.0);
    }

    #[tokio::test]
    async fn empty_result_has_no_columns() {
        let dir = tempfile::tempdir().unwrap();
        let household = Uuid::new_v4();
        let pool = seeded(&dir, household).await;
        let exec = ScopedExecutor::new(pool, Duration::from_secs(10), 200);

        let result = exec
            .execute(
                "SELECT category FROM household_expenses WHERE amount > 100000",
                household,
            )
            .await
            .unwrap();
        assert!(result.columns.is_empty());
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn joined_member_name_is_exposed() {
        let dir = tempfile::tempdir().unwrap();
        let household = Uuid::new_v4();
        let pool = seeded(&dir, household).await;
        let exec = ScopedExecutor::new(pool, Duration::from_secs(10), 200);

        let result = exec
            .execute(
                "SELECT DISTINCT logged_by FROM household_expenses",
                household,
            )
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![Cell::Text("Asha".into())]]);
    }
}
