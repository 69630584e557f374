//! Tally Core: shared domain types for the analytics agent
//!
//! The analytics agent turns a free-text question about household spending
//! into a validated, household-scoped SQL query and a rendered answer:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    ANALYTICS PIPELINE                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  question ──► Controller ──► Prompt ──► Model ──► Candidate SQL  │
//! │                   ▲                                     │        │
//! │                   │ repair (verbatim failure)           ▼        │
//! │                   │                                 SqlGuard     │
//! │                   │                                     │        │
//! │                   └──────── Executor ◄──────────────────┘        │
//! │                                 │                                │
//! │                                 ▼                                │
//! │                       Summarizer ──► answer + chart + table      │
//! │                                                                  │
//! │  every attempt ──► Audit Log (one row per cycle)                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate holds the types every other `tally-*` crate agrees on: the
//! request/response surface, the query/attempt audit records, result cells,
//! the schema context handed to prompts, and the agent configuration.

pub mod config;
pub mod context;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::AgentConfig;
pub use context::{HouseholdHints, SchemaContext, TableSchema};

// ============================================================================
// Request / response surface
// ============================================================================

/// An analytics question, with identities already resolved by the caller.
///
/// `household_id` and `user_id` come from a verified session on the HTTP
/// side; the agent never accepts them from untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub household_id: Uuid,
    pub user_id: Uuid,
}

/// Final outcome of one analytics question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub status: QueryStatus,
    pub answer: String,
    /// SQL that actually executed, present only on success.
    pub final_sql: Option<String>,
    pub attempt_count: u32,
    pub table: Option<AnalysisTable>,
    pub chart: Option<AnalysisChart>,
}

/// Normalized tabular payload for the rendering layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Chart descriptor derived from a two-column result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisChart {
    pub chart_type: ChartType,
    pub title: String,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

// ============================================================================
// Result cells
// ============================================================================

/// One value returned by the scoped executor.
///
/// SQLite's dynamic typing collapses to these four shapes; NULL renders as
/// an empty string for the UI, matching the rest of the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Null => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

/// Ordered columns plus row tuples from a successful execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

// ============================================================================
// Audit records
// ============================================================================

/// Lifecycle of one logged question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Running,
    Success,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Running => "running",
            QueryStatus::Success => "success",
            QueryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(QueryStatus::Running),
            "success" => Some(QueryStatus::Success),
            "failed" => Some(QueryStatus::Failed),
            _ => None,
        }
    }
}

/// One persisted question, owned by a household.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub household_id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub model: String,
    pub question: String,
    pub status: QueryStatus,
    pub attempt_count: u32,
    pub final_sql: Option<String>,
    pub final_answer: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One generate → validate → execute cycle.
///
/// `validation_reason` and `db_error` are populated only on the respective
/// failure; `llm_reason` is the model's own rationale for the candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub generated_sql: String,
    pub llm_reason: Option<String>,
    pub validation_ok: bool,
    pub validation_reason: Option<String>,
    pub execution_ok: bool,
    pub db_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
