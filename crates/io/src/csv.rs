// CSV export for normalized tables
//
// Output is deterministic: UTF-8 without BOM, comma separated, `\n` line
// endings, header and text/date cells quoted, numbers bare, empty cells
// empty. The same table always renders to the same bytes.

use std::path::Path;

use reportflow_engine::{ColumnType, Table, Value};

pub fn render(table: &Table) -> Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let header: Vec<String> = table.columns().iter().map(|c| quote(c)).collect();
    writer.write_record(&header).map_err(|e| e.to_string())?;

    let types: Vec<ColumnType> = (0..table.column_count()).map(|c| table.column_type(c)).collect();
    for row in table.rows() {
        let record: Vec<String> = row
            .iter()
            .zip(&types)
            .map(|(value, ty)| render_cell(value, *ty))
            .collect();
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    writer.into_inner().map_err(|e| e.to_string())
}

pub fn export(table: &Table, path: &Path) -> Result<Vec<u8>, String> {
    let bytes = render(table)?;
    std::fs::write(path, &bytes).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(bytes)
}

fn render_cell(value: &Value, ty: ColumnType) -> String {
    match (value, ty) {
        (Value::Empty, _) => String::new(),
        (Value::Number(n), ColumnType::Number) => reportflow_engine::value::format_number(*n),
        (other, _) => quote(&other.render()),
    }
}

/// Quote a field, doubling embedded quotes.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
