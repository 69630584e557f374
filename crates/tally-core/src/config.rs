//! Agent configuration
//!
//! All knobs are explicit values injected at construction; nothing in the
//! agent reads process-global mutable state after startup.

use std::time::Duration;

/// Hard ceiling on attempts per question. The loop gives up gracefully when
/// it is reached; it is never overridden at runtime.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Rows returned to the caller are capped regardless of what the generated
/// SQL asks for.
pub const DEFAULT_ROW_LIMIT: u32 = 200;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Total attempts per question (first generation + repairs).
    pub max_attempts: u32,
    /// Bound on a single database round-trip.
    pub statement_timeout: Duration,
    /// Bound on a single model call.
    pub model_timeout: Duration,
    /// Cap applied outside the generated SQL.
    pub row_limit: u32,
    /// Cap per household hint list (categories, members, merchants).
    pub hint_limit: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            statement_timeout: Duration::from_secs(10),
            model_timeout: Duration::from_secs(60),
            row_limit: DEFAULT_ROW_LIMIT,
            hint_limit: 30,
        }
    }
}

impl AgentConfig {
    /// Read overrides from the environment, falling back to defaults.
    ///
    /// Recognized: `TALLY_MAX_ATTEMPTS`, `TALLY_STATEMENT_TIMEOUT_SECS`,
    /// `TALLY_MODEL_TIMEOUT_SECS`, `TALLY_ROW_LIMIT`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_u32("TALLY_MAX_ATTEMPTS") {
            if v >= 1 {
                cfg.max_attempts = v;
            }
        }
        if let Some(v) = env_u32("TALLY_STATEMENT_TIMEOUT_SECS") {
            cfg.statement_timeout = Duration::from_secs(v as u64);
        }
        if let Some(v) = env_u32("TALLY_MODEL_TIMEOUT_SECS") {
            cfg.model_timeout = Duration::from_secs(v as u64);
        }
        if let Some(v) = env_u32("TALLY_ROW_LIMIT") {
            if v >= 1 {
                cfg.row_limit = v;
            }
        }
        cfg
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
