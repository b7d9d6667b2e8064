use crate::ai_sql::schema::TableListing;
use crate::database::{Cell, ResultSet};
use prettytable::{Cell as TableCell, Row as TableRow, Table, format};

/// Shown for SQL NULL and for absent values
pub const NULL_DISPLAY: &str = "NULL";

/// Render one decoded value the way psql would show it
pub fn cell_to_string(cell: Option<&Cell>) -> String {
    match cell {
        None | Some(Cell::Null) => NULL_DISPLAY.to_string(),
        Some(Cell::String(s)) => s.clone(),
        Some(Cell::Bool(b)) => if *b { "t" } else { "f" }.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Safe formatting function that pads by character count
fn pad(text: &str, width: usize, left_align: bool) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let padding = " ".repeat(width - len);
    if left_align {
        format!("{text}{padding}")
    } else {
        format!("{padding}{text}")
    }
}

/// Header row followed by data rows, every value already rendered
pub fn result_grid(result: &ResultSet) -> Vec<Vec<String>> {
    let mut grid = Vec::with_capacity(result.rows.len() + 1);
    grid.push(result.columns.clone());
    for row in &result.rows {
        grid.push(
            result
                .columns
                .iter()
                .map(|column| cell_to_string(row.get(column)))
                .collect(),
        );
    }
    grid
}

/// psql-style table: header, separator, one line per row. Numbers are right-aligned.
///
/// Empty results render the header and separator only.
pub fn format_result_set(result: &ResultSet) -> String {
    if result.columns.is_empty() {
        return String::new();
    }

    let grid = result_grid(result);
    let mut col_widths: Vec<usize> = vec![0; result.columns.len()];
    for row in &grid {
        for (i, cell) in row.iter().enumerate() {
            col_widths[i] = col_widths[i].max(cell.chars().count());
        }
    }

    let numeric: Vec<bool> = result
        .columns
        .iter()
        .map(|column| {
            result
                .rows
                .iter()
                .filter_map(|row| row.get(column))
                .all(|cell| cell.is_number() || cell.is_null())
                && !result.rows.is_empty()
        })
        .collect();

    let mut output = String::new();

    let header: Vec<String> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| pad(name, col_widths[i], true))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    let separator: Vec<String> = col_widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in grid.iter().skip(1) {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| pad(cell, col_widths[i], !numeric[i]))
            .collect();
        output.push_str(line.join(" | ").trim_end());
        output.push('\n');
    }

    output
}

/// Summary line printed under a result table
pub fn result_summary(result: &ResultSet) -> String {
    format!(
        "Found {} rows and {} columns.",
        result.row_count,
        result.columns.len()
    )
}

/// Table listing as a two-column box table
pub fn format_table_listing(tables: &[TableListing]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(TableRow::new(vec![
        TableCell::new("Table").style_spec("b"),
        TableCell::new("Columns").style_spec("b"),
    ]));

    for listing in tables {
        table.add_row(TableRow::new(vec![
            TableCell::new(&listing.name),
            TableCell::new(&listing.columns.join(", ")),
        ]));
    }

    table
}
