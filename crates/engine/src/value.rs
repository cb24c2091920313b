use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical text form for dates exchanged with the ERP and written to CSV.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Date formats accepted when coercing text cells.
const INPUT_DATE_FORMATS: [&str; 2] = ["%d.%m.%Y", "%Y-%m-%d"];

/// Excel serial day 0 (the 1900 leap-year bug is folded into the epoch).
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Serial numbers outside this range are not plausible calendar dates.
const EXCEL_SERIAL_MAX: f64 = 2_958_465.0;

/// A single table cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

/// Logical type of a column, used by writers and the sidecar type map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to read the decimal separator of numeric text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalStyle {
    /// Decide per value: the right-most separator wins when both appear,
    /// a lone separator is decimal, a repeated one is grouping.
    #[default]
    Auto,
    /// `1.234,56`
    Comma,
    /// `1,234.56`
    Dot,
}

impl Value {
    /// Build a cell from raw reader text. Whitespace-only input is empty.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            Value::Empty
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::Number(n) => n.is_nan(),
            Value::Date(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Text rendering used for CSV output, keys and display.
    pub fn render(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    /// Canonical form for grouping and join keys.
    ///
    /// Numbers and their textual spelling compare equal (`80012345` the
    /// number matches `"80012345"` the text), so a key read as text from a
    /// markup export joins against the same key read from a workbook.
    pub fn key(&self) -> String {
        match self {
            Value::Text(s) => {
                let trimmed = s.trim();
                match parse_number(trimmed, DecimalStyle::Dot) {
                    Some(n) if is_plain_integer(trimmed) => format_number(n),
                    _ => trimmed.to_string(),
                }
            }
            other => other.render(),
        }
    }
}

fn is_plain_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Integral values print without a fractional part; everything else uses
/// the shortest round-trip representation.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return String::new();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse a locale-formatted number. Accepts a trailing minus sign, which the
/// ERP uses for negative amounts (`1.234,50-`).
pub fn parse_number(input: &str, style: DecimalStyle) -> Option<f64> {
    let mut s: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if let Some(rest) = s.strip_suffix('-') {
        negative = true;
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_string();
    }

    let decimal = match style {
        DecimalStyle::Comma => Some(','),
        DecimalStyle::Dot => Some('.'),
        DecimalStyle::Auto => auto_decimal(&s),
    };

    let mut normalized = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ',' | '.' if Some(c) == decimal => normalized.push('.'),
            ',' | '.' => {}
            c if c.is_ascii_digit() => normalized.push(c),
            'e' | 'E' => normalized.push(c),
            _ => return None,
        }
    }
    if !normalized.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn auto_decimal(s: &str) -> Option<char> {
    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');
    match (last_comma, last_dot) {
        (Some(c), Some(d)) => Some(if c > d { ',' } else { '.' }),
        (Some(_), None) => (s.matches(',').count() == 1).then_some(','),
        (None, Some(_)) => (s.matches('.').count() == 1).then_some('.'),
        (None, None) => None,
    }
}

/// Parse a date in one of the accepted text formats. A trailing time part
/// (`2025-09-27 00:00:00`) is ignored.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);
    INPUT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Convert an Excel serial day number to a date.
pub fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=EXCEL_SERIAL_MAX).contains(&serial) {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
    epoch.checked_add_days(chrono::Days::new(serial.trunc() as u64))
}
