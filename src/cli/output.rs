//! Terminal output formatting for goal execution results and DAG plans.
//!
//! Grounded on the teacher's `cli::output::table::TableFormatter`: a
//! `comfy-table` formatter with a color-capability check, reduced to
//! the shapes sunwell prints (an `ExecutionResult` summary and a
//! `--plan` DAG preview) rather than the teacher's task/agent/MCP-server
//! tables.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::domain::models::{Artifact, ArtifactDag};
use crate::services::ExecutionResult;

/// Whether the current terminal is likely to render ANSI colors,
/// mirroring the teacher's `supports_color` environment check.
fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err() && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

fn base_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render an `ExecutionResult` as a two-column summary table.
pub fn format_execution_result(result: &ExecutionResult) -> String {
    let mut table = base_table();
    table.set_header(vec![Cell::new("Field").add_attribute(Attribute::Bold), Cell::new("Value").add_attribute(Attribute::Bold)]);

    let status_cell = if supports_color() {
        if result.success {
            Cell::new("success").fg(Color::Green)
        } else if result.partial {
            Cell::new("partial").fg(Color::Yellow)
        } else {
            Cell::new("failed").fg(Color::Red)
        }
    } else if result.success {
        Cell::new("success")
    } else if result.partial {
        Cell::new("partial")
    } else {
        Cell::new("failed")
    };

    table.add_row(vec![Cell::new("goal_id"), Cell::new(&result.goal_id)]);
    table.add_row(vec![Cell::new("status"), status_cell]);
    table.add_row(vec![Cell::new("summary"), Cell::new(&result.result.summary)]);
    table.add_row(vec![Cell::new("artifacts_created"), Cell::new(result.result.artifacts_created.len())]);
    table.add_row(vec![Cell::new("artifacts_failed"), Cell::new(result.result.artifacts_failed.len())]);
    if let Some(reason) = &result.result.failure_reason {
        table.add_row(vec![Cell::new("failure_reason"), Cell::new(reason)]);
    }
    if let Some(error) = &result.error {
        table.add_row(vec![Cell::new("error"), Cell::new(error)]);
    }

    table.to_string()
}

/// Render an artifact DAG's execution waves (`--plan` dry run).
pub fn format_plan(dag: &ArtifactDag) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("Wave").add_attribute(Attribute::Bold),
        Cell::new("Artifact").add_attribute(Attribute::Bold),
        Cell::new("Type").add_attribute(Attribute::Bold),
        Cell::new("Description").add_attribute(Attribute::Bold),
    ]);

    for (wave_index, wave) in dag.execution_waves().into_iter().enumerate() {
        for artifact_id in wave {
            if let Some(artifact) = dag.get(&artifact_id) {
                table.add_row(vec![
                    Cell::new(wave_index),
                    Cell::new(short_id(artifact)),
                    Cell::new(format!("{:?}", artifact.domain_type)),
                    Cell::new(truncate(&artifact.description, 60)),
                ]);
            }
        }
    }

    table.to_string()
}

fn short_id(artifact: &Artifact) -> String {
    artifact.id.to_string().chars().take(8).collect()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GoalResult, Goal};
    use crate::services::ExecutionResult;

    #[test]
    fn formats_successful_result_without_panicking() {
        let goal = Goal::new("write a report");
        let mut result = GoalResult::new("done");
        result.artifacts_created.push("report.md".to_string());
        let exec = ExecutionResult {
            goal_id: goal.id,
            success: true,
            partial: false,
            result,
            error: None,
        };
        let rendered = format_execution_result(&exec);
        assert!(rendered.contains("success"));
        assert!(rendered.contains("report.md") || rendered.contains('1'));
    }

    #[test]
    fn truncate_shortens_long_text() {
        let long = "a".repeat(100);
        assert!(truncate(&long, 10).ends_with("..."));
    }
}
