//! Result presentation: tabular text plus an optional bar chart

use crate::ai_sql::error::VisualizationError;
use crate::database::ResultSet;
use crate::format::{cell_to_string, format_result_set, result_summary};
use serde::Serialize;
use tracing::{debug, error};

/// Largest row count that still gets a chart
pub const MAX_CHART_ROWS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
}

/// Bar chart: categories from the first column, values from the second
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub category_label: String,
    pub value_label: String,
    pub categories: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationDecision {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
}

/// Everything shown for a successful turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presentation {
    pub table: String,
    pub summary: String,
    pub visualization: VisualizationDecision,
}

/// Exactly two columns, more than one and at most [`MAX_CHART_ROWS`] rows, and a
/// numeric second column
pub fn is_chart_eligible(result: &ResultSet) -> bool {
    if result.columns.len() != 2 {
        return false;
    }
    let rows = result.rows.len();
    if rows <= 1 || rows > MAX_CHART_ROWS {
        return false;
    }
    result
        .column_values(1)
        .iter()
        .all(|value| value.is_number())
}

pub fn build_bar_chart(result: &ResultSet) -> Result<ChartSpec, VisualizationError> {
    let category_label = result.columns[0].clone();
    let value_label = result.columns[1].clone();

    let categories = result
        .rows
        .iter()
        .map(|row| cell_to_string(row.get(&category_label)))
        .collect();

    let mut values = Vec::with_capacity(result.rows.len());
    for (i, row) in result.rows.iter().enumerate() {
        let value = row
            .get(&value_label)
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
            .ok_or(VisualizationError::NonFiniteValue { row: i })?;
        values.push(value);
    }

    let spec = ChartSpec {
        kind: ChartKind::Bar,
        title: format!("Results: {} rows", result.rows.len()),
        category_label,
        value_label,
        categories,
        values,
    };
    // Charts are handed to renderers as JSON
    serde_json::to_value(&spec)?;
    Ok(spec)
}

pub fn present(result: &ResultSet) -> Presentation {
    present_with(result, build_bar_chart)
}

/// Present `result` using `builder` for eligible charts. A failing builder leaves the
/// presentation tabular-only.
pub fn present_with<F>(result: &ResultSet, builder: F) -> Presentation
where
    F: Fn(&ResultSet) -> Result<ChartSpec, VisualizationError>,
{
    let eligible = is_chart_eligible(result);
    let chart = if eligible {
        match builder(result) {
            Ok(spec) => Some(spec),
            Err(e) => {
                error!("Error creating visualization: {}", e);
                None
            }
        }
    } else {
        None
    };
    debug!(
        "Presenting {} rows, chart eligible: {}",
        result.row_count, eligible
    );

    Presentation {
        table: format_result_set(result),
        summary: result_summary(result),
        visualization: VisualizationDecision { eligible, chart },
    }
}
