//! Schema context provider
//!
//! Rebuilt from the live store on every request so taxonomy and membership
//! changes reach the prompts without a redeploy. Fails closed: if
//! introspection errors or comes back empty, the whole request aborts as a
//! setup failure before any attempt runs.

use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use tally_core::{HouseholdHints, SchemaContext, TableSchema};

use crate::{StoreError, SCOPED_VIEW};

pub struct SchemaProvider {
    pool: SqlitePool,
    hint_limit: u32,
}

impl SchemaProvider {
    pub fn new(pool: SqlitePool, hint_limit: u32) -> Self {
        Self { pool, hint_limit }
    }

    /// Build the context for one request.
    pub async fn load(&self, household_id: Uuid) -> Result<SchemaContext, StoreError> {
        let table = self.scoped_view_schema().await?;
        let hints = self.household_hints(household_id).await?;
        debug!(
            household = %household_id,
            columns = table.columns.len(),
            "schema context loaded"
        );
        Ok(SchemaContext {
            household_id,
            allowed_tables: vec![SCOPED_VIEW.to_string()],
            tables: vec![table],
            hints,
        })
    }

    /// Column model of the scoped view, derived from the live `expenses`
    /// table so column additions show up automatically.
    async fn scoped_view_schema(&self) -> Result<TableSchema, StoreError> {
        let rows = sqlx::query("PRAGMA table_info(expenses)")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::SchemaUnavailable(e.to_string()))?;
        if rows.is_empty() {
            return Err(StoreError::SchemaUnavailable(
                "expenses table not found".to_string(),
            ));
        }

        let mut columns: Vec<(String, String)> = Vec::with_capacity(rows.len() + 2);
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| StoreError::SchemaUnavailable(e.to_string()))?;
            let ty: String = row
                .try_get("type")
                .map_err(|e| StoreError::SchemaUnavailable(e.to_string()))?;
            let ty = if ty.trim().is_empty() {
                "TEXT".to_string()
            } else {
                ty
            };
            // The view renames the expense primary key and hides nothing
            // else from the base table.
            let exposed = if name == "id" {
                "expense_id".to_string()
            } else {
                name
            };
            columns.push((exposed, ty));
        }
        // Joined member display name, added by the scoping CTE.
        columns.push(("logged_by".to_string(), "TEXT".to_string()));

        Ok(TableSchema {
            name: SCOPED_VIEW.to_string(),
            columns,
        })
    }

    /// Household vocabulary that grounds generated SQL: distinct categories,
    /// member display names, and merchant strings.
    async fn household_hints(&self, household_id: Uuid) -> Result<HouseholdHints, StoreError> {
        let household = household_id.to_string();
        let limit = self.hint_limit as i64;

        let categories = self
            .string_column(
                "SELECT DISTINCT TRIM(COALESCE(category, 'Other')) AS v
                 FROM expenses
                 WHERE household_id = ?1
                   AND category IS NOT NULL AND TRIM(category) <> ''
                 ORDER BY v LIMIT ?2",
                &household,
                limit,
            )
            .await?;
        let members = self
            .string_column(
                "SELECT DISTINCT TRIM(COALESCE(u.full_name, 'Unknown')) AS v
                 FROM expenses e
                 LEFT JOIN users u ON u.id = e.logged_by_user_id
                 WHERE e.household_id = ?1
                 ORDER BY v LIMIT ?2",
                &household,
                limit,
            )
            .await?;
        let merchants = self
            .string_column(
                "SELECT DISTINCT TRIM(COALESCE(merchant_or_item, '')) AS v
                 FROM expenses
                 WHERE household_id = ?1
                   AND merchant_or_item IS NOT NULL AND TRIM(merchant_or_item) <> ''
                 ORDER BY v LIMIT ?2",
                &household,
                limit,
            )
            .await?;

        Ok(HouseholdHints {
            categories,
            members,
            merchants,
        })
    }

    async fn string_column(
        &self,
        sql: &str,
        household: &str,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(household)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::SchemaUnavailable(e.to_string()))?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value: String = row
                .try_get("v")
                .map_err(|e| StoreError::SchemaUnavailable(e.to_string()))?;
            if !value.is_empty() {
                values.push(value);
            }
        }
        Ok(values)
    }
}
