//! Repair-loop controller
//!
//! Explicit attempt loop with a hard ceiling. Each attempt is one
//! generate → validate → execute cycle; any failure becomes feedback for
//! the next cycle's repair prompt, forwarded verbatim. Every attempt is
//! persisted before the loop moves on, so the audit trail survives a crash
//! mid-run.

use chrono::Utc;
use tracing::{info, warn};

use tally_core::{
    AgentConfig, AskRequest, AskResponse, AttemptRecord, QueryStatus, ResultSet, SchemaContext,
};
use tally_llm::{generation_prompt, parse_sql_candidate, repair_prompt, LanguageModel, Prompt, SqlCandidate};
use tally_sqlguard::SqlGuard;
use tally_store::{AuditLog, ScopedExecutor};

use crate::{summarize, AgentError};

/// Recorded when the model call errors, times out, or returns a payload
/// with no usable `sql` field.
const NO_USABLE_SQL: &str = "no usable SQL produced";

/// How one candidate fared against the validator and the database.
#[derive(Debug)]
pub enum CandidateOutcome {
    Accepted(ResultSet),
    RejectedValidation(String),
    RejectedExecution(String),
}

/// Failure context threaded into the next repair prompt.
struct Feedback {
    failed_sql: String,
    failure: String,
}

pub struct Controller<'a> {
    config: &'a AgentConfig,
    model: &'a dyn LanguageModel,
    guard: &'a SqlGuard,
    executor: &'a ScopedExecutor,
    audit: &'a AuditLog,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: &'a AgentConfig,
        model: &'a dyn LanguageModel,
        guard: &'a SqlGuard,
        executor: &'a ScopedExecutor,
        audit: &'a AuditLog,
    ) -> Self {
        Self {
            config,
            model,
            guard,
            executor,
            audit,
        }
    }

    pub async fn run(
        &self,
        request: &AskRequest,
        context: &SchemaContext,
    ) -> Result<AskResponse, AgentError> {
        let (provider, model_name) = self.model.identity();
        let query_id = self
            .audit
            .start_query(
                request.household_id,
                request.user_id,
                &provider,
                &model_name,
                &request.question,
            )
            .await
            .map_err(AgentError::Audit)?;

        let mut feedback: Option<Feedback> = None;
        let mut last_failure = NO_USABLE_SQL.to_string();

        for attempt in 1..=self.config.max_attempts {
            let prompt = match &feedback {
                None => generation_prompt(context, &request.question),
                Some(f) => repair_prompt(context, &request.question, &f.failed_sql, &f.failure),
            };

            let Some(candidate) = self.generate(&prompt).await else {
                warn!(query = %query_id, attempt, "model produced no usable SQL");
                self.record(
                    query_id,
                    attempt,
                    String::new(),
                    None,
                    &CandidateOutcome::RejectedValidation(NO_USABLE_SQL.to_string()),
                )
                .await?;
                last_failure = NO_USABLE_SQL.to_string();
                feedback = None;
                continue;
            };

            let outcome = self.try_candidate(&candidate.sql, request).await;
            self.record(
                query_id,
                attempt,
                candidate.sql.clone(),
                candidate.reason.clone(),
                &outcome,
            )
            .await?;

            match outcome {
                CandidateOutcome::Accepted(result) => {
                    let summary = summarize::summarize(&request.question, &result);
                    self.audit
                        .finalize_query(
                            query_id,
                            QueryStatus::Success,
                            Some(&candidate.sql),
                            Some(&summary.answer),
                            None,
                            attempt,
                        )
                        .await
                        .map_err(AgentError::Audit)?;
                    info!(query = %query_id, attempt, "analytics question answered");
                    return Ok(AskResponse {
                        status: QueryStatus::Success,
                        answer: summary.answer,
                        final_sql: Some(candidate.sql),
                        attempt_count: attempt,
                        table: Some(summary.table),
                        chart: summary.chart,
                    });
                }
                CandidateOutcome::RejectedValidation(reason) => {
                    info!(query = %query_id, attempt, reason = %reason, "candidate rejected");
                    last_failure = reason.clone();
                    feedback = Some(Feedback {
                        failed_sql: candidate.sql,
                        failure: reason,
                    });
                }
                CandidateOutcome::RejectedExecution(error) => {
                    info!(query = %query_id, attempt, error = %error, "candidate failed to run");
                    last_failure = error.clone();
                    feedback = Some(Feedback {
                        failed_sql: candidate.sql,
                        failure: error,
                    });
                }
            }
        }

        let attempts = self.config.max_attempts;
        self.audit
            .finalize_query(
                query_id,
                QueryStatus::Failed,
                None,
                None,
                Some(&last_failure),
                attempts,
            )
            .await
            .map_err(AgentError::Audit)?;
        warn!(query = %query_id, attempts, reason = %last_failure, "attempt ceiling reached");
        Ok(AskResponse {
            status: QueryStatus::Failed,
            answer: summarize::failure_answer(attempts),
            final_sql: None,
            attempt_count: attempts,
            table: None,
            chart: None,
        })
    }

    /// One model call under the configured deadline. `None` covers every
    /// generation failure shape; the distinction is logged, not retried
    /// differently.
    async fn generate(&self, prompt: &Prompt) -> Option<SqlCandidate> {
        let call = self.model.complete_json(&prompt.system, &prompt.user);
        match tokio::time::timeout(self.config.model_timeout, call).await {
            Ok(Ok(payload)) => parse_sql_candidate(&payload),
            Ok(Err(err)) => {
                warn!(error = %err, "model call failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.model_timeout.as_secs(),
                    "model call timed out"
                );
                None
            }
        }
    }

    async fn try_candidate(&self, sql: &str, request: &AskRequest) -> CandidateOutcome {
        if let Err(rejection) = self.guard.check(sql) {
            return CandidateOutcome::RejectedValidation(rejection.to_string());
        }
        match self.executor.execute(sql, request.household_id).await {
            Ok(result) => CandidateOutcome::Accepted(result),
            Err(failure) => CandidateOutcome::RejectedExecution(failure.0),
        }
    }

    async fn record(
        &self,
        query_id: uuid::Uuid,
        attempt: u32,
        generated_sql: String,
        llm_reason: Option<String>,
        outcome: &CandidateOutcome,
    ) -> Result<(), AgentError> {
        let (validation_ok, validation_reason, execution_ok, db_error) = match outcome {
            CandidateOutcome::Accepted(_) => (true, None, true, None),
            CandidateOutcome::RejectedValidation(reason) => {
                (false, Some(reason.clone()), false, None)
            }
            CandidateOutcome::RejectedExecution(error) => (true, None, false, Some(error.clone())),
        };
        self.audit
            .record_attempt(
                query_id,
                &AttemptRecord {
                    attempt_number: attempt,
                    generated_sql,
                    llm_reason,
                    validation_ok,
                    validation_reason,
                    execution_ok,
                    db_error,
                    created_at: Utc::now(),
                },
            )
            .await
            .map_err(AgentError::Audit)
    }
}
