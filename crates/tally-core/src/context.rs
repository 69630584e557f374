//! Schema context handed to the prompt composer
//!
//! Built fresh from the live store for every request so taxonomy and
//! membership changes show up without redeploying the agent. Immutable once
//! constructed; the agent only reads it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column model for one queryable relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// `(column_name, sql_type)` pairs in declaration order.
    pub columns: Vec<(String, String)>,
}

impl TableSchema {
    /// Prompt-ready one-liner: `name(col type, col type, …)`.
    pub fn to_prompt_line(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect();
        format!("{}({})", self.name, cols.join(", "))
    }
}

/// Household-specific vocabulary that grounds generated SQL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdHints {
    pub categories: Vec<String>,
    pub members: Vec<String>,
    pub merchants: Vec<String>,
}

impl HouseholdHints {
    pub fn to_prompt_text(&self) -> String {
        fn list(values: &[String]) -> String {
            if values.is_empty() {
                "none".to_string()
            } else {
                values.join(", ")
            }
        }
        format!(
            "Known categories in this household: {}\n\
             Known household member names: {}\n\
             Known merchant_or_item values: {}",
            list(&self.categories),
            list(&self.members),
            list(&self.merchants),
        )
    }
}

/// Everything the prompt composer and validator need for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContext {
    /// Tenant boundary; injected server-side, never from request input.
    pub household_id: Uuid,
    /// Relations generated SQL may reference. The executor scopes these.
    pub allowed_tables: Vec<String>,
    /// Column model of the allowed relations.
    pub tables: Vec<TableSchema>,
    pub hints: HouseholdHints,
}

impl SchemaContext {
    /// Prompt-ready schema description, one relation per line.
    pub fn schema_text(&self) -> String {
        self.tables
            .iter()
            .map(TableSchema::to_prompt_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
