// Tab-delimited text extracts ("unconverted" list output).

use reportflow_engine::Value;

/// Lines the ERP prints instead of data when a selection is empty.
const NO_DATA_MARKERS: [&str; 2] = ["La lista no contiene datos", "List contains no data"];

/// Decode raw bytes to a string.
///
/// UTF-16 and UTF-8 byte-order marks are honoured; otherwise UTF-8 is tried
/// and Windows-1252 (a superset of Latin-1 for printable text) is the fallback.
pub fn decode(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (decoded, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return decoded.into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Split tab-delimited text into rows of cells.
///
/// Separator lines made of dashes and the "no data" notice are dropped. The
/// list export starts each line with a tab, which yields a leading empty
/// cell; callers strip fully empty leading columns during header detection.
pub fn read_grid(bytes: &[u8]) -> Vec<Vec<Value>> {
    let content = decode(bytes);
    let mut rows = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_rule_line(trimmed) {
            continue;
        }
        if NO_DATA_MARKERS.iter().any(|m| trimmed.contains(m)) {
            continue;
        }
        rows.push(line.split('\t').map(Value::from_input).collect());
    }
    rows
}

fn is_rule_line(line: &str) -> bool {
    line.contains('-') && line.chars().all(|c| c == '-' || c == '|' || c.is_whitespace())
}
