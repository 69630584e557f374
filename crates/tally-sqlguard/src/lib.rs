//! SQL safety validation for model-generated queries
//!
//! A candidate query is accepted only when every check passes, in order:
//!
//! 1. Non-empty text, no statement separator anywhere in the raw text.
//! 2. Parses to exactly one statement.
//! 3. The statement is a `SELECT` (or `WITH … SELECT` chain); no
//!    `SELECT INTO`, no locking clause, no embedded write in a set
//!    operation body.
//! 4. Every referenced relation is on the caller's allow-list
//!    (case-insensitive, qualified-name aware; names defined by the query's
//!    own CTEs are admitted).
//! 5. No deny-listed function appears anywhere in the AST.
//! 6. A raw-text scan for deny-listed tokens, run after the AST checks as
//!    defense-in-depth against parser disagreement. It can only add
//!    rejections.
//!
//! The guard is pure and deterministic: no network, no database, no clock.
//! On acceptance it reports the referenced-relation set so the executor can
//! confirm its scoping assumptions.

use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;

use regex::Regex;
use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, Query, SetExpr, Statement, TableFactor,
    TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

// ============================================================================
// Deny lists
// ============================================================================

/// Statement-ish keywords that must never appear followed by whitespace in
/// the raw text. The AST check already rejects these as statements; this
/// list exists so comment/encoding tricks that confuse the parser still
/// fail closed.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "create", "replace", "attach",
    "detach", "pragma", "vacuum", "reindex", "grant", "revoke", "copy", "execute",
];

/// Catalog surfaces and I/O / code-execution functions, rejected both as
/// parsed function calls and as raw tokens.
const FORBIDDEN_NAMES: &[&str] = &[
    "information_schema",
    "sqlite_master",
    "sqlite_temp_master",
    "pg_catalog",
    "load_extension",
    "readfile",
    "writefile",
    "fts3_tokenizer",
    "edit",
    "pg_sleep",
    "pg_read_file",
    "lo_import",
    "dblink_connect",
    "dblink_exec",
];

// ============================================================================
// Rejection reasons
// ============================================================================

/// Why a candidate was refused. The message text is fed verbatim into the
/// repair prompt, so it names the concrete defect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Empty SQL.")]
    Empty,
    #[error("Semicolon not allowed.")]
    Semicolon,
    #[error("Only a single statement is allowed.")]
    MultipleStatements,
    #[error("SQL parse error: {0}")]
    Unparsable(String),
    #[error("Only SELECT statements are allowed.")]
    NotSelect,
    #[error("SELECT INTO is not allowed.")]
    SelectInto,
    #[error("Locking clauses are not allowed.")]
    LockingClause,
    #[error("Disallowed table reference: {0}. Only these tables are allowed: {1}.")]
    DisallowedTable(String, String),
    #[error("Forbidden function: {0}.")]
    ForbiddenFunction(String),
    #[error("Forbidden token: {0}.")]
    ForbiddenToken(String),
}

/// Result of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Allow-listed relations the query actually references, lowercased.
    pub referenced_tables: BTreeSet<String>,
}

// ============================================================================
// Guard
// ============================================================================

pub struct SqlGuard {
    allowed: HashSet<String>,
    allowed_display: String,
    keyword_scan: Regex,
    name_scan: Regex,
}

impl SqlGuard {
    /// Build a guard for the given relation allow-list. Matching is
    /// case-insensitive.
    pub fn new<I, S>(allowed_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: HashSet<String> = allowed_tables
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let mut sorted: Vec<&String> = allowed.iter().collect();
        sorted.sort();
        let allowed_display = sorted
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let keyword_scan = Regex::new(&format!(
            r"(?i)\b(?:{})\s",
            FORBIDDEN_KEYWORDS.join("|")
        ))
        .expect("keyword scan regex");
        let name_scan = Regex::new(&format!(r"(?i)\b(?:{})\b", FORBIDDEN_NAMES.join("|")))
            .expect("name scan regex");

        Self {
            allowed,
            allowed_display,
            keyword_scan,
            name_scan,
        }
    }

    /// Validate one candidate. Short-circuits on the first failed check.
    pub fn check(&self, sql: &str) -> Result<Accepted, Rejection> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Empty);
        }
        // A correctly formed single SELECT never needs a separator; its
        // presence anywhere (including comments) is treated as hostile.
        if trimmed.contains(';') {
            return Err(Rejection::Semicolon);
        }

        let statements = Parser::parse_sql(&GenericDialect {}, trimmed)
            .map_err(|e| Rejection::Unparsable(e.to_string()))?;
        if statements.len() != 1 {
            return Err(if statements.is_empty() {
                Rejection::Empty
            } else {
                Rejection::MultipleStatements
            });
        }
        let statement = &statements[0];
        let query = match statement {
            Statement::Query(query) => query,
            _ => return Err(Rejection::NotSelect),
        };
        ensure_read_only_query(query)?;

        let cte_names = collect_cte_names(query);
        let referenced = self.check_relations(statement, &cte_names)?;
        self.check_functions(statement)?;
        self.raw_scan(trimmed)?;

        Ok(Accepted {
            referenced_tables: referenced,
        })
    }

    fn check_relations(
        &self,
        statement: &Statement,
        cte_names: &HashSet<String>,
    ) -> Result<BTreeSet<String>, Rejection> {
        let mut referenced = BTreeSet::new();
        let mut offender: Option<String> = None;
        let _ = visit_relations(statement, |name: &ObjectName| {
            let full = name
                .0
                .iter()
                .map(|ident| ident.value.to_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            let last = name
                .0
                .last()
                .map(|ident| ident.value.to_lowercase())
                .unwrap_or_default();
            // Unqualified references to the query's own CTEs are fine.
            if name.0.len() == 1 && cte_names.contains(&last) {
                return ControlFlow::Continue(());
            }
            if self.allowed.contains(&full) || self.allowed.contains(&last) {
                referenced.insert(last);
                ControlFlow::Continue(())
            } else {
                offender = Some(name.to_string());
                ControlFlow::Break(())
            }
        });
        match offender {
            Some(table) => Err(Rejection::DisallowedTable(
                table,
                self.allowed_display.clone(),
            )),
            None => Ok(referenced),
        }
    }

    fn check_functions(&self, statement: &Statement) -> Result<(), Rejection> {
        let mut offender: Option<String> = None;
        let _ = visit_expressions(statement, |expr: &Expr| {
            if let Expr::Function(func) = expr {
                let name = func
                    .name
                    .0
                    .last()
                    .map(|ident| ident.value.to_lowercase())
                    .unwrap_or_default();
                if FORBIDDEN_NAMES.contains(&name.as_str()) {
                    offender = Some(name);
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        match offender {
            Some(name) => Err(Rejection::ForbiddenFunction(name)),
            None => Ok(()),
        }
    }

    /// Belt-and-suspenders raw scan. Runs last so it can only add
    /// rejections on top of the AST verdict.
    fn raw_scan(&self, sql: &str) -> Result<(), Rejection> {
        if let Some(found) = self.keyword_scan.find(sql) {
            return Err(Rejection::ForbiddenToken(
                found.as_str().trim().to_lowercase(),
            ));
        }
        if let Some(found) = self.name_scan.find(sql) {
            return Err(Rejection::ForbiddenToken(found.as_str().to_lowercase()));
        }
        Ok(())
    }
}

// ============================================================================
// AST shape checks
// ============================================================================

fn ensure_read_only_query(query: &Query) -> Result<(), Rejection> {
    if !query.locks.is_empty() {
        return Err(Rejection::LockingClause);
    }
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ensure_read_only_query(&cte.query)?;
        }
    }
    ensure_read_only_body(&query.body)
}

fn ensure_read_only_body(body: &SetExpr) -> Result<(), Rejection> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(Rejection::SelectInto);
            }
            for from in &select.from {
                ensure_read_only_from(from)?;
            }
            Ok(())
        }
        SetExpr::Query(query) => ensure_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            ensure_read_only_body(left)?;
            ensure_read_only_body(right)
        }
        // Values / embedded INSERT / UPDATE / bare TABLE bodies.
        _ => Err(Rejection::NotSelect),
    }
}

fn ensure_read_only_from(from: &TableWithJoins) -> Result<(), Rejection> {
    ensure_read_only_factor(&from.relation)?;
    for join in &from.joins {
        ensure_read_only_factor(&join.relation)?;
    }
    Ok(())
}

fn ensure_read_only_factor(factor: &TableFactor) -> Result<(), Rejection> {
    match factor {
        TableFactor::Derived { subquery, .. } => ensure_read_only_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => ensure_read_only_from(table_with_joins),
        _ => Ok(()),
    }
}

// ============================================================================
// CTE name collection
// ============================================================================

/// Names defined by the query's own WITH clauses, at any nesting level the
/// grammar places them. A name the walk misses is rejected by the allow-list
/// check, which fails closed.
fn collect_cte_names(query: &Query) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_from_query(query, &mut names);
    names
}

fn collect_from_query(query: &Query, names: &mut HashSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            names.insert(cte.alias.name.value.to_lowercase());
            collect_from_query(&cte.query, names);
        }
    }
    collect_from_body(&query.body, names);
}

fn collect_from_body(body: &SetExpr, names: &mut HashSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for from in &select.from {
                collect_from_factor(&from.relation, names);
                for join in &from.joins {
                    collect_from_factor(&join.relation, names);
                }
            }
        }
        SetExpr::Query(query) => collect_from_query(query, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_from_body(left, names);
            collect_from_body(right, names);
        }
        _ => {}
    }
}

fn collect_from_factor(factor: &TableFactor, names: &mut HashSet<String>) {
    match factor {
        TableFactor::Derived { subquery, .. } => collect_from_query(subquery, names),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_from_factor(&table_with_joins.relation, names);
            for join in &table_with_joins.joins {
                collect_from_factor(&join.relation, names);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SqlGuard {
        SqlGuard::new(["household_expenses"])
    }

    #[test]
    fn accepts_simple_aggregate_select() {
        let accepted = guard()
            .check("SELECT category, SUM(amount) FROM household_expenses GROUP BY category")
            .unwrap();
        assert!(accepted.referenced_tables.contains("household_expenses"));
    }

    #[test]
    fn accepts_with_select_chain() {
        let sql = "WITH monthly AS (\
                     SELECT strftime('%Y-%m', date_incurred) AS month, SUM(amount) AS total \
                     FROM household_expenses GROUP BY month\
                   ) SELECT month, total FROM monthly ORDER BY month";
        let accepted = guard().check(sql).unwrap();
        assert_eq!(
            accepted.referenced_tables,
            BTreeSet::from(["household_expenses".to_string()])
        );
    }

    #[test]
    fn rejects_empty_and_semicolon() {
        assert_eq!(guard().check("   "), Err(Rejection::Empty));
        assert_eq!(
            guard().check("SELECT 1; SELECT 2"),
            Err(Rejection::Semicolon)
        );
        // Separator hidden in a comment still fails.
        assert_eq!(
            guard().check("SELECT amount FROM household_expenses -- ;\n"),
            Err(Rejection::Semicolon)
        );
    }

    #[test]
    fn rejects_writes_regardless_of_phrasing() {
        for sql in [
            "DELETE FROM household_expenses",
            "UPDATE household_expenses SET amount = 0",
            "INSERT INTO household_expenses (amount) VALUES (1)",
            "DROP TABLE household_expenses",
            "delete from household_expenses where amount > 0",
        ] {
            assert!(guard().check(sql).is_err(), "accepted: {sql}");
        }
    }

    #[test]
    fn rejects_disallowed_table_in_plain_from() {
        let err = guard().check("SELECT * FROM users").unwrap_err();
        assert!(matches!(err, Rejection::DisallowedTable(t, _) if t == "users"));
    }

    #[test]
    fn rejects_disallowed_table_behind_alias_cte_and_subquery() {
        for sql in [
            "SELECT u.full_name FROM users AS u",
            "WITH x AS (SELECT * FROM users) SELECT * FROM x",
            "SELECT * FROM (SELECT * FROM users) AS inner_q",
            "SELECT * FROM household_expenses h JOIN users u ON u.id = h.logged_by_user_id",
        ] {
            assert!(
                matches!(guard().check(sql), Err(Rejection::DisallowedTable(..))),
                "accepted: {sql}"
            );
        }
    }

    #[test]
    fn qualified_allow_list_names_match() {
        let guard = SqlGuard::new(["analytics.household_expenses"]);
        let accepted = guard
            .check("SELECT amount FROM analytics.household_expenses")
            .unwrap();
        assert!(accepted.referenced_tables.contains("household_expenses"));
    }

    #[test]
    fn cte_names_do_not_leak_into_allow_list() {
        // The CTE name itself is usable, but its body is still checked.
        let sql = "WITH users AS (SELECT * FROM household_expenses) SELECT * FROM users";
        assert!(guard().check(sql).is_ok());
    }

    #[test]
    fn rejects_catalog_access() {
        for sql in [
            "SELECT name FROM sqlite_master",
            "SELECT * FROM information_schema.tables",
            "SELECT table_name FROM pg_catalog.pg_tables",
        ] {
            assert!(guard().check(sql).is_err(), "accepted: {sql}");
        }
    }

    #[test]
    fn rejects_forbidden_functions_at_ast_level() {
        let err = guard()
            .check("SELECT load_extension('x') FROM household_expenses")
            .unwrap_err();
        assert!(matches!(err, Rejection::ForbiddenFunction(name) if name == "load_extension"));

        let err = guard()
            .check("SELECT PG_SLEEP(10) FROM household_expenses")
            .unwrap_err();
        assert!(matches!(
            err,
            Rejection::ForbiddenFunction(_) | Rejection::ForbiddenToken(_)
        ));
    }

    #[test]
    fn rejects_select_into() {
        assert_eq!(
            guard().check("SELECT amount INTO dumped FROM household_expenses"),
            Err(Rejection::SelectInto)
        );
    }

    #[test]
    fn rejects_locking_clause() {
        assert_eq!(
            guard().check("SELECT amount FROM household_expenses FOR UPDATE"),
            Err(Rejection::LockingClause)
        );
    }

    #[test]
    fn rejects_unparsable_with_reason() {
        let err = guard().check("SELECTT * FRM nowhere").unwrap_err();
        assert!(matches!(err, Rejection::Unparsable(_)));
        assert!(err.to_string().starts_with("SQL parse error:"));
    }

    #[test]
    fn union_of_allowed_selects_is_accepted() {
        let sql = "SELECT category FROM household_expenses \
                   UNION ALL \
                   SELECT merchant_or_item FROM household_expenses";
        assert!(guard().check(sql).is_ok());
    }

    #[test]
    fn column_names_containing_keywords_are_fine() {
        // `created_at` contains "create"; the raw scan must not trip on it.
        assert!(guard()
            .check("SELECT created_at, updated_at FROM household_expenses")
            .is_ok());
    }
}
