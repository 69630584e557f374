//! Deterministic answer summarizer
//!
//! Projects a successful result set into a friendly sentence, a sanitized
//! table, and (when the shape allows) a chart descriptor. No model call is
//! involved; the same rows always produce the same answer.
//!
//! Sanitization runs first: identifier columns are dropped and UUID
//! literals inside text cells are redacted, so internal keys never reach
//! the rendered answer.

use std::sync::OnceLock;

use regex::Regex;

use tally_core::{AnalysisChart, AnalysisTable, Cell, ChartPoint, ChartType, ResultSet};

pub struct Summary {
    pub answer: String,
    pub table: AnalysisTable,
    pub chart: Option<AnalysisChart>,
}

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    })
}

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}(-\d{2})?").unwrap())
}

pub fn summarize(question: &str, result: &ResultSet) -> Summary {
    let table = sanitize(result);
    let chart = infer_chart(&table);
    let answer = answer_text(question, &table);
    Summary {
        answer,
        table,
        chart,
    }
}

/// Terminal-failure phrasing for the response body; the audit log keeps the
/// technical reason.
pub fn failure_answer(attempts: u32) -> String {
    format!(
        "Sorry, I couldn't answer that question after {attempts} attempts. \
         Try rephrasing it or asking something more specific."
    )
}

// ============================================================================
// Sanitization
// ============================================================================

fn is_identifier_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id")
}

fn sanitize(result: &ResultSet) -> AnalysisTable {
    let keep: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !is_identifier_column(name))
        .map(|(i, _)| i)
        .collect();
    let columns = keep.iter().map(|&i| result.columns[i].clone()).collect();
    let rows = result
        .rows
        .iter()
        .map(|row| {
            keep.iter()
                .map(|&i| match &row[i] {
                    Cell::Text(s) => Cell::Text(uuid_pattern().replace_all(s, "[redacted]").into_owned()),
                    other => other.clone(),
                })
                .collect()
        })
        .collect();
    AnalysisTable { columns, rows }
}

// ============================================================================
// Answer text
// ============================================================================

fn format_value(cell: &Cell) -> String {
    match cell {
        Cell::Float(v) => format!("{v:.2}"),
        other => other.render(),
    }
}

fn answer_text(question: &str, table: &AnalysisTable) -> String {
    let question = question.trim().trim_end_matches('?');
    if table.rows.is_empty() {
        return "I ran the query but found no matching expenses.".to_string();
    }
    // Single scalar: answer in one sentence.
    if table.rows.len() == 1 && table.columns.len() == 1 {
        let cell = &table.rows[0][0];
        if cell.as_f64().is_some() {
            return format!(
                "For \"{question}\": {} is {}.",
                table.columns[0],
                format_value(cell)
            );
        }
    }
    if table.rows.len() <= 5 {
        let lines: Vec<String> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(name, cell)| format!("{name} {}", format_value(cell)))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        return format!("Here's what I found: {}.", lines.join("; "));
    }
    format!(
        "Found {} matching rows for \"{question}\"; see the table for details.",
        table.rows.len()
    )
}

// ============================================================================
// Chart inference
// ============================================================================

/// A chart is offered only for the unambiguous shape: exactly two columns,
/// one numeric, one label-like. Date-shaped labels become a line chart.
fn infer_chart(table: &AnalysisTable) -> Option<AnalysisChart> {
    if table.columns.len() != 2 || table.rows.is_empty() {
        return None;
    }
    let numeric_idx = [0usize, 1]
        .into_iter()
        .find(|&i| table.rows.iter().all(|row| row[i].as_f64().is_some()))?;
    let label_idx = 1 - numeric_idx;
    if table.rows.iter().all(|row| row[label_idx].as_f64().is_some()) {
        // Two numeric columns: no obvious axis, skip the chart.
        return None;
    }

    let points: Vec<ChartPoint> = table
        .rows
        .iter()
        .filter_map(|row| {
            Some(ChartPoint {
                label: row[label_idx].render(),
                value: row[numeric_idx].as_f64()?,
            })
        })
        .collect();
    let date_like = points
        .iter()
        .all(|p| date_pattern().is_match(&p.label));
    Some(AnalysisChart {
        chart_type: if date_like {
            ChartType::Line
        } else {
            ChartType::Bar
        },
        title: format!(
            "{} by {}",
            table.columns[numeric_idx], table.columns[label_idx]
        ),
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(columns: &[&str], rows: Vec<Vec<Cell>>) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn identifier_columns_are_dropped() {
        let summary = summarize(
            "recent expenses",
            &result(
                &["expense_id", "category", "logged_by_user_id", "amount"],
                vec![vec![
                    Cell::Text("e1".into()),
                    Cell::Text("Food".into()),
                    Cell::Text("u1".into()),
                    Cell::Float(12.5),
                ]],
            ),
        );
        assert_eq!(summary.table.columns, vec!["category", "amount"]);
        assert_eq!(
            summary.table.rows,
            vec![vec![Cell::Text("Food".into()), Cell::Float(12.5)]]
        );
    }

    #[test]
    fn uuids_in_text_cells_are_redacted() {
        let summary = summarize(
            "who logged what",
            &result(
                &["description"],
                vec![vec![Cell::Text(
                    "logged by 3f2b8a1c-9d4e-4f6a-8b2c-1a2b3c4d5e6f yesterday".into(),
                )]],
            ),
        );
        let Cell::Text(text) = &summary.table.rows[0][0] else {
            panic!("expected text cell");
        };
        assert_eq!(text, "logged by [redacted] yesterday");
    }

    #[test]
    fn scalar_answer_is_one_sentence() {
        let summary = summarize(
            "How much did we spend this month?",
            &result(&["total"], vec![vec![Cell::Float(49.5)]]),
        );
        assert_eq!(
            summary.answer,
            "For \"How much did we spend this month\": total is 49.50."
        );
        assert!(summary.chart.is_none());
    }

    #[test]
    fn empty_result_has_fixed_phrasing() {
        let summary = summarize("anything", &result(&[], vec![]));
        assert_eq!(
            summary.answer,
            "I ran the query but found no matching expenses."
        );
        assert!(summary.chart.is_none());
    }

    #[test]
    fn category_breakdown_gets_a_bar_chart() {
        let summary = summarize(
            "top categories",
            &result(
                &["category", "total"],
                vec![
                    vec![Cell::Text("Food".into()), Cell::Float(49.5)],
                    vec![Cell::Text("Transport".into()), Cell::Float(7.0)],
                ],
            ),
        );
        let chart = summary.chart.unwrap();
        assert_eq!(chart.chart_type, ChartType::Bar);
        assert_eq!(chart.title, "total by category");
        assert_eq!(chart.points.len(), 2);
        assert_eq!(chart.points[0].label, "Food");
        assert_eq!(chart.points[0].value, 49.5);
    }

    #[test]
    fn date_labels_get_a_line_chart() {
        let summary = summarize(
            "spend per month",
            &result(
                &["month", "total"],
                vec![
                    vec![Cell::Text("2026-07".into()), Cell::Float(310.0)],
                    vec![Cell::Text("2026-08".into()), Cell::Float(49.5)],
                ],
            ),
        );
        assert_eq!(summary.chart.unwrap().chart_type, ChartType::Line);
    }

    #[test]
    fn two_numeric_columns_get_no_chart() {
        let summary = summarize(
            "amount vs count",
            &result(
                &["amount", "count"],
                vec![vec![Cell::Float(1.0), Cell::Int(2)]],
            ),
        );
        assert!(summary.chart.is_none());
    }

    #[test]
    fn large_results_defer_to_the_table() {
        let rows = (0..10)
            .map(|i| vec![Cell::Text(format!("row{i}")), Cell::Int(i)])
            .collect();
        let summary = summarize("all expenses?", &result(&["label", "n"], rows));
        assert!(summary.answer.starts_with("Found 10 matching rows"));
        assert_eq!(summary.table.rows.len(), 10);
    }
}
