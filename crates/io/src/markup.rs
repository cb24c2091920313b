// HTML-table extracts saved with a spreadsheet extension.

use quick_xml::events::Event;
use quick_xml::Reader;
use reportflow_engine::Value;
use tracing::warn;

/// Read every `<tr>` of the document as a row of `<td>`/`<th>` cells.
///
/// The parser is lenient about HTML: end-tag names are not checked, stray
/// end tags and bare `&` are accepted, and a parse error ends the scan with
/// the rows read so far.
pub fn read_grid(content: &str) -> Vec<Vec<Value>> {
    let mut reader = Reader::from_str(content);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.allow_dangling_amp = true;
    }
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut current_row: Option<Vec<Value>> = None;
    let mut current_cell: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                if is_tag(name.as_ref(), b"tr") {
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                    current_row = Some(Vec::new());
                } else if is_tag(name.as_ref(), b"td") || is_tag(name.as_ref(), b"th") {
                    close_cell(&mut current_row, &mut current_cell);
                    if current_row.is_none() {
                        current_row = Some(Vec::new());
                    }
                    current_cell = Some(String::new());
                } else if is_tag(name.as_ref(), b"br") {
                    if let Some(cell) = current_cell.as_mut() {
                        cell.push(' ');
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                if is_tag(name.as_ref(), b"td") || is_tag(name.as_ref(), b"th") {
                    close_cell(&mut current_row, &mut current_cell);
                    current_row.get_or_insert_with(Vec::new).push(Value::Empty);
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(cell) = current_cell.as_mut() {
                    cell.push_str(&unescape(&String::from_utf8_lossy(e.as_ref())));
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(cell) = current_cell.as_mut() {
                    cell.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                if let Some(cell) = current_cell.as_mut() {
                    let name = String::from_utf8_lossy(e.as_ref());
                    match entity(&name) {
                        Some(c) => cell.push(c),
                        None => {
                            cell.push('&');
                            cell.push_str(&name);
                            cell.push(';');
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if is_tag(name.as_ref(), b"td") || is_tag(name.as_ref(), b"th") {
                    close_cell(&mut current_row, &mut current_cell);
                } else if is_tag(name.as_ref(), b"tr") {
                    close_cell(&mut current_row, &mut current_cell);
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                } else if is_tag(name.as_ref(), b"table") {
                    close_cell(&mut current_row, &mut current_cell);
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(position = reader.buffer_position(), error = %e, "markup parse stopped early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    close_cell(&mut current_row, &mut current_cell);
    if let Some(row) = current_row.take() {
        rows.push(row);
    }
    rows
}

fn is_tag(name: &[u8], tag: &[u8]) -> bool {
    name.eq_ignore_ascii_case(tag)
}

fn close_cell(row: &mut Option<Vec<Value>>, cell: &mut Option<String>) {
    if let Some(text) = cell.take() {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        row.get_or_insert_with(Vec::new).push(Value::from_input(&collapsed));
    }
}

/// Resolve a named or numeric entity reference (without `&` and `;`).
fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

/// Replace entity references left inside a text run.
fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        match tail.find(';').filter(|&semi| semi <= 8) {
            Some(semi) => match entity(&tail[..semi]) {
                Some(c) => {
                    out.push(c);
                    rest = &tail[semi + 1..];
                }
                None => {
                    out.push('&');
                    rest = tail;
                }
            },
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
