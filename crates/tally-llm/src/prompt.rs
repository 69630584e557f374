//! Prompt composition
//!
//! Pure payload construction: two variants, generation and repair. The
//! repair variant forwards the prior attempt's SQL and the failure text
//! exactly as the validator or database reported it — never a paraphrase,
//! so the model targets the real defect.

use tally_core::SchemaContext;

/// A system/user prompt pair ready for the model client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const OUTPUT_CONTRACT: &str = r#"Return JSON only with this exact root object:
{"sql": "SELECT ...", "reason": "one short sentence on how the query answers the question"}"#;

const RULES: &str = "\
Rules:
- Only SELECT (or WITH + SELECT). Never any other statement kind.
- No semicolon anywhere.
- Never use INSERT/UPDATE/DELETE/DROP/ALTER/TRUNCATE/CREATE.
- Query ONLY the tables listed under 'Database schema'. They already contain
  scoped household data; never invent other table names.
- Default to status = 'confirmed' expenses unless the user explicitly asks
  for draft or all entries.
- Use LOWER(column) for case-insensitive text comparisons.
- Respect explicit constraints exactly (top N, last N days/months, this
  month, and so on). Expense dates live in date_incurred (ISO text).";

const WORKED_EXAMPLES: &str = "\
Worked examples:
Q: How much did we spend this month?
{\"sql\": \"SELECT SUM(amount) AS total FROM household_expenses WHERE status = 'confirmed' AND date_incurred >= date('now', 'start of month')\", \"reason\": \"Sums confirmed expenses dated in the current month.\"}

Q: Top 3 categories by spend in the last 30 days
{\"sql\": \"SELECT category, SUM(amount) AS total FROM household_expenses WHERE status = 'confirmed' AND date_incurred >= date('now', '-30 days') GROUP BY category ORDER BY total DESC LIMIT 3\", \"reason\": \"Groups the last 30 days of confirmed spend by category and keeps the three largest.\"}";

fn system_prompt(context: &SchemaContext) -> String {
    format!(
        "You generate SQL for a household expense analytics assistant.\n\n\
         {OUTPUT_CONTRACT}\n\n\
         Database schema:\n{}\n\n\
         {}\n\n\
         {RULES}\n\n\
         {WORKED_EXAMPLES}",
        context.schema_text(),
        context.hints.to_prompt_text(),
    )
}

/// First-attempt prompt for a fresh question.
pub fn generation_prompt(context: &SchemaContext, question: &str) -> Prompt {
    Prompt {
        system: system_prompt(context),
        user: format!("user_question: {}\nReturn the SQL in JSON.", question.trim()),
    }
}

/// Follow-up prompt carrying the failed SQL and the verbatim failure text.
pub fn repair_prompt(
    context: &SchemaContext,
    question: &str,
    failed_sql: &str,
    failure: &str,
) -> Prompt {
    Prompt {
        system: system_prompt(context),
        user: format!(
            "user_question: {}\nfailed_sql: {}\ndb_error: {}\nReturn corrected SQL in JSON.",
            question.trim(),
            failed_sql.trim(),
            failure.trim(),
        ),
    }
}
