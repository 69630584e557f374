//! Analytics engine: question in, audited answer out
//!
//! Wires the pipeline together behind one entry point:
//!
//! ```text
//! AnalyticsEngine::ask
//!   ├─ SchemaProvider       live schema + household hints (fail closed)
//!   ├─ Controller           generate → validate → execute, repair loop
//!   │    ├─ LanguageModel   JSON completion seam (injected)
//!   │    ├─ SqlGuard        AST + deny-list validation
//!   │    ├─ ScopedExecutor  household CTE, read-only, timeout
//!   │    └─ AuditLog        one row per question, one per attempt
//!   └─ Summarizer           deterministic answer + table + chart
//! ```

pub mod controller;
pub mod summarize;

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use tally_core::{AgentConfig, AskRequest, AskResponse};
use tally_llm::LanguageModel;
use tally_sqlguard::SqlGuard;
use tally_store::{AuditLog, SchemaProvider, ScopedExecutor, StoreError, SCOPED_VIEW};

pub use controller::{CandidateOutcome, Controller};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The request could not even begin (schema introspection failed);
    /// no query row exists for it.
    #[error("analysis setup failed: {0}")]
    Setup(StoreError),
    /// The audit log itself failed; the pipeline never proceeds past an
    /// unrecorded transition.
    #[error("audit log failure: {0}")]
    Audit(StoreError),
}

pub struct AnalyticsEngine {
    config: AgentConfig,
    model: Arc<dyn LanguageModel>,
    schema: SchemaProvider,
    guard: SqlGuard,
    executor: ScopedExecutor,
    audit: AuditLog,
}

impl AnalyticsEngine {
    /// `pool` serves introspection and audit writes; `read_pool` should be
    /// opened read-only and serves generated SQL exclusively.
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn LanguageModel>,
        pool: SqlitePool,
        read_pool: SqlitePool,
    ) -> Self {
        let schema = SchemaProvider::new(pool.clone(), config.hint_limit);
        let executor = ScopedExecutor::new(read_pool, config.statement_timeout, config.row_limit);
        let audit = AuditLog::new(pool);
        Self {
            config,
            model,
            schema,
            guard: SqlGuard::new([SCOPED_VIEW]),
            executor,
            audit,
        }
    }

    /// Create the audit tables. Call once at startup.
    pub async fn migrate(&self) -> Result<(), AgentError> {
        self.audit.migrate().await.map_err(AgentError::Audit)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Answer one analytics question end to end.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse, AgentError> {
        info!(
            household = %request.household_id,
            question = %request.question,
            "analytics question received"
        );
        let context = self
            .schema
            .load(request.household_id)
            .await
            .map_err(AgentError::Setup)?;

        let controller = Controller::new(
            &self.config,
            self.model.as_ref(),
            &self.guard,
            &self.executor,
            &self.audit,
        );
        controller.run(request, &context).await
    }
}
