use resql_client::{ResultStream, StreamState, ValueRef};
use std::io::Write;

pub fn format_value(value: &ValueRef<'_>) -> String {
    match value {
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Float(v) => v.to_string(),
        ValueRef::Text(v) => v.to_string(),
        ValueRef::Blob(v) => {
            let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
            format!("x'{hex}'")
        }
        ValueRef::Null => "NULL".into(),
    }
}

/// Prints every result set: a header line and one line per row, or the
/// number of changed lines for statements without columns.
pub fn print_results<W: Write>(rs: &mut ResultStream<'_>, out: &mut W) -> anyhow::Result<()> {
    if rs.state() == StreamState::Exhausted {
        return Ok(());
    }
    loop {
        if rs.column_count() == 0 {
            writeln!(out, "lines changed: {}", rs.lines_changed())?;
        } else {
            let names = (0..rs.column_count())
                .map(|i| rs.column_name(i))
                .collect::<Result<Vec<_>, _>>()?;
            writeln!(out, "{}", names.join(" | "))?;
            while let Some(row) = rs.next_row()? {
                let cells: Vec<String> = row.values().iter().map(format_value).collect();
                writeln!(out, "{}", cells.join(" | "))?;
            }
        }
        if !rs.advance_to_next_result_set()? {
            return Ok(());
        }
        writeln!(out)?;
    }
}
