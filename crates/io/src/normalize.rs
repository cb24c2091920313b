//! Raw extract → normalized artifacts.
//!
//! `read_extract` sniffs the payload, parses it into a grid and finds the
//! header row. `normalize` then coerces types, applies the dataset's rules
//! and writes the workbook, CSV, parquet and metadata siblings.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use reportflow_engine::coerce::coerce_table;
use reportflow_engine::{DatasetRules, Table, Value};

use crate::archive::write_atomic;
use crate::error::IoError;
use crate::sidecar::Metadata;
use crate::sniff::{sniff, PayloadKind};
use crate::{csv, markup, parquet, text, xlsx};

/// Suffix shared by every normalized artifact.
pub const ARTIFACT_SUFFIX: &str = "_PowerBI";

#[derive(Debug, Clone)]
pub struct Extract {
    pub table: Table,
    pub payload: PayloadKind,
    pub source_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Artifacts {
    pub workbook: PathBuf,
    pub csv: PathBuf,
    pub parquet: PathBuf,
    pub metadata: PathBuf,
}

impl Artifacts {
    pub fn for_base(out_dir: &Path, base_name: &str) -> Self {
        let stem = format!("{base_name}{ARTIFACT_SUFFIX}");
        Self {
            workbook: out_dir.join(format!("{stem}.xlsx")),
            csv: out_dir.join(format!("{stem}.csv")),
            parquet: out_dir.join(format!("{stem}.parquet")),
            metadata: out_dir.join(format!("{stem}_metadata.json")),
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        vec![
            self.workbook.clone(),
            self.csv.clone(),
            self.parquet.clone(),
            self.metadata.clone(),
        ]
    }
}

pub struct NormalizeRequest<'a> {
    pub raw_path: &'a Path,
    pub dataset: &'a str,
    pub rules: &'a DatasetRules,
    pub out_dir: &'a Path,
    pub base_name: &'a str,
    pub effective_date: &'a str,
}

#[derive(Debug, Clone)]
pub struct NormalizeOutput {
    pub table: Table,
    pub artifacts: Artifacts,
    pub metadata: Metadata,
}

/// Read a raw extract into a table with its detected header.
pub fn read_extract(path: &Path) -> Result<Extract, IoError> {
    let bytes = std::fs::read(path).map_err(|e| IoError::file(path, e))?;
    let source_bytes = bytes.len() as u64;
    if bytes.is_empty() {
        return Err(IoError::unreadable(path, "file is empty"));
    }

    let payload = sniff(&bytes)
        .ok_or_else(|| IoError::unreadable(path, "not a workbook, markup table or delimited text"))?;
    debug!(path = %path.display(), payload = payload.as_str(), bytes = source_bytes, "payload sniffed");

    let grid = match payload {
        PayloadKind::Workbook => xlsx::read_grid(bytes).map_err(|e| IoError::unreadable(path, e))?,
        PayloadKind::Markup => markup::read_grid(&text::decode(&bytes)),
        PayloadKind::DelimitedText => text::read_grid(&bytes),
    };

    let table = table_from_grid(grid).ok_or_else(|| IoError::unreadable(path, "no header row found"))?;
    Ok(Extract { table, payload, source_bytes })
}

/// Locate the header row and build a table from the rows beneath it.
///
/// The header is the first row whose cells, ignoring leading and trailing
/// blanks, are all non-empty text labels. Single-cell rows only qualify when
/// no row is wider, so a title line above the table is skipped. Rows below
/// the header are cut to the header's span; fully empty rows and repeated
/// header rows (page breaks in list output) are dropped.
pub fn table_from_grid(grid: Vec<Vec<Value>>) -> Option<Table> {
    let widest = grid.iter().map(|r| span(r).map_or(0, |(s, e)| e - s)).max()?;
    let min_width = if widest >= 2 { 2 } else { 1 };

    let header_idx = grid.iter().position(|row| match span(row) {
        Some((start, end)) => {
            end - start >= min_width
                && row[start..end].iter().all(|v| matches!(v, Value::Text(s) if !s.trim().is_empty()))
        }
        None => false,
    })?;
    let (start, end) = span(&grid[header_idx])?;

    let labels: Vec<String> = grid[header_idx][start..end].iter().map(Value::render).collect();
    let columns = unique_names(&labels);

    let mut table = Table::new(columns).ok()?;
    for row in grid.into_iter().skip(header_idx + 1) {
        let cells: Vec<Value> = (start..end)
            .map(|i| row.get(i).cloned().unwrap_or(Value::Empty))
            .collect();
        if cells.iter().all(Value::is_empty) {
            continue;
        }
        if cells.iter().map(Value::render).eq(labels.iter().cloned()) {
            continue;
        }
        table.push_row(cells).ok()?;
    }
    Some(table)
}

fn span(row: &[Value]) -> Option<(usize, usize)> {
    let start = row.iter().position(|v| !v.is_empty())?;
    let end = row.iter().rposition(|v| !v.is_empty())? + 1;
    Some((start, end))
}

/// Trim labels and disambiguate repeats as `name.1`, `name.2`, ...
fn unique_names(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let base = label.trim().to_string();
        let mut name = base.clone();
        let mut n = 1;
        while out.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        out.push(name);
    }
    out
}

/// Normalize one raw extract and write its artifacts.
pub fn normalize(req: &NormalizeRequest<'_>) -> Result<NormalizeOutput, IoError> {
    let Extract { table, payload, source_bytes } = read_extract(req.raw_path)?;
    info!(
        dataset = req.dataset,
        path = %req.raw_path.display(),
        payload = payload.as_str(),
        rows = table.row_count(),
        columns = table.column_count(),
        "extract read"
    );

    let mut table = table;
    let mut warnings = coerce_table(&mut table, req.rules);
    let (table, rule_warnings) = req.rules.apply(table)?;
    warnings.extend(rule_warnings);
    for w in &warnings {
        warn!(dataset = req.dataset, warning = %w, "normalize warning");
    }

    std::fs::create_dir_all(req.out_dir).map_err(|e| IoError::file(req.out_dir, e))?;
    let artifacts = Artifacts::for_base(req.out_dir, req.base_name);

    let csv_bytes = csv::render(&table).map_err(|e| IoError::write(&artifacts.csv, e))?;
    write_atomic(&artifacts.csv, |tmp| {
        std::fs::write(tmp, &csv_bytes).map_err(|e| e.to_string())
    })?;
    write_atomic(&artifacts.workbook, |tmp| xlsx::export(&table, tmp))?;
    write_atomic(&artifacts.parquet, |tmp| parquet::export(&table, tmp))?;

    let metadata = Metadata::describe(
        &table,
        req.raw_path,
        source_bytes,
        payload,
        req.dataset,
        req.effective_date,
        &csv_bytes,
        warnings,
    );
    write_atomic(&artifacts.metadata, |tmp| metadata.write(tmp))?;

    info!(
        dataset = req.dataset,
        rows = table.row_count(),
        checksum = %metadata.csv_checksum,
        "artifacts written"
    );
    Ok(NormalizeOutput { table, artifacts, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn header_skips_title_rows() {
        let grid = vec![
            vec![text("Reporte de entregas")],
            vec![text("Fecha: 27.09.2025"), Value::Empty],
            vec![],
            vec![text(" Entrega "), text("Cliente"), text("Cajas"), Value::Empty],
            vec![text("8001"), text("Acme"), Value::Number(3.0)],
            vec![Value::Empty, Value::Empty, Value::Empty],
        ];
        let table = table_from_grid(grid).unwrap();
        assert_eq!(table.columns(), &["Entrega", "Cliente", "Cajas"].map(String::from));
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.cell(0, 2), &Value::Number(3.0));
    }

    #[test]
    fn header_with_numeric_cell_is_data() {
        let grid = vec![
            vec![text("A"), Value::Number(1.0)],
            vec![text("A"), text("B")],
            vec![text("x"), text("y")],
        ];
        let table = table_from_grid(grid).unwrap();
        assert_eq!(table.columns(), &["A", "B"].map(String::from));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn leading_blank_column_and_repeated_headers() {
        let grid = vec![
            vec![Value::Empty, text("Entrega"), text("Cliente")],
            vec![Value::Empty, text("1"), text("a")],
            vec![Value::Empty, text("Entrega"), text("Cliente")],
            vec![Value::Empty, text("2"), text("b")],
        ];
        let table = table_from_grid(grid).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(1, 0), &text("2"));
    }

    #[test]
    fn duplicate_labels_are_disambiguated() {
        let grid = vec![vec![text("Cajas"), text("Cajas"), text("Cajas")]];
        let table = table_from_grid(grid).unwrap();
        assert_eq!(table.columns(), &["Cajas", "Cajas.1", "Cajas.2"].map(String::from));
    }

    #[test]
    fn no_header_is_none() {
        assert!(table_from_grid(vec![vec![Value::Number(1.0), Value::Number(2.0)]]).is_none());
        assert!(table_from_grid(vec![]).is_none());
    }

    #[test]
    fn unreadable_payload_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xls");
        std::fs::write(&path, b"plain words, no table").unwrap();
        let err = read_extract(&path).unwrap_err();
        assert!(matches!(err, IoError::Unreadable { .. }));
        assert!(err.to_string().contains("broken.xls"));
    }
}
