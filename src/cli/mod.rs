//! ASCII table rendering for the REPL.

use crate::session::Output;
use crate::value::Value;

/// Render a statement output as an ASCII table (for rows) or a plain
/// message (for statuses). Returns the rendered text.
pub fn render_output(output: &Output) -> String {
    match output {
        Output::Status { message } => message.clone(),
        Output::Rows { schema, batches } => {
            let cols: Vec<String> = schema.iter().map(|(n, _)| n.clone()).collect();
            let mut rows: Vec<Vec<String>> = Vec::new();
            for batch in batches {
                for (_, values) in &batch.rows {
                    rows.push(values.iter().map(render_cell).collect());
                }
            }
            if rows.is_empty() {
                return format!("Empty set ({} column(s))", cols.len());
            }
            render_table(&cols, &rows)
        }
    }
}

fn render_cell(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn render_table(cols: &[String], rows: &[Vec<String>]) -> String {
    // Cap column widths to keep output readable.
    let max_col_width: usize = 80;
    let mut widths: Vec<usize> = cols.iter().map(|c| c.len().min(max_col_width)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len().min(max_col_width));
        }
    }

    let sep = build_separator(&widths);
    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&build_row(cols, &widths));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in rows {
        out.push_str(&build_row(row, &widths));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&format!("rows: {}, cols: {}", rows.len(), cols.len()));
    out
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let truncated: String = if cell.len() > *w {
            let mut t: String = cell.chars().take(w.saturating_sub(1)).collect();
            t.push('…');
            t
        } else {
            cell.to_string()
        };
        s.push_str(&format!(" {:<width$} |", truncated, width = w));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Batch;
    use crate::storage::RowId;
    use crate::value::DataType;

    #[test]
    fn renders_status_verbatim() {
        let out = Output::Status { message: "2 rows inserted.".into() };
        assert_eq!(render_output(&out), "2 rows inserted.");
    }

    #[test]
    fn renders_rows_as_table() {
        let mut batch = Batch::new();
        batch.rows.push((
            RowId { page_id: 0, slot: 0 },
            vec![Value::Int(1), Value::Str("Alice".into())],
        ));
        let out = Output::Rows {
            schema: vec![("id".into(), DataType::Int), ("name".into(), DataType::Varchar)],
            batches: vec![batch],
        };
        let text = render_output(&out);
        assert!(text.contains("| id | name"));
        assert!(text.contains("| 1  | Alice"));
        assert!(text.contains("rows: 1, cols: 2"));
    }

    #[test]
    fn empty_result_prints_summary() {
        let out = Output::Rows { schema: vec![("id".into(), DataType::Int)], batches: vec![] };
        assert_eq!(render_output(&out), "Empty set (1 column(s))");
    }
}
