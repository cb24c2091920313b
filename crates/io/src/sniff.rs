// Payload sniffing for ERP extracts.
//
// The exporter names everything `.xls`, but the bytes may be an OLE workbook,
// a zipped workbook, an HTML table or tab-separated text.

use serde::Serialize;

const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_SIGNATURE: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// How far into the file markup detection looks.
const MARKUP_WINDOW: usize = 2048;
/// How far into the file tab detection looks.
const TEXT_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// OLE compound document or zip container; read with calamine.
    Workbook,
    /// Tag-based markup with `<table>` rows.
    Markup,
    /// Tab-delimited text, possibly UTF-16.
    DelimitedText,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workbook => "workbook",
            Self::Markup => "markup",
            Self::DelimitedText => "delimited_text",
        }
    }
}

pub fn sniff(bytes: &[u8]) -> Option<PayloadKind> {
    if bytes.starts_with(&OLE_SIGNATURE) || bytes.starts_with(&ZIP_SIGNATURE) {
        return Some(PayloadKind::Workbook);
    }

    let utf16 = bytes.starts_with(&UTF16LE_BOM) || bytes.starts_with(&UTF16BE_BOM);
    let body = bytes.strip_prefix(&UTF8_BOM[..]).unwrap_or(bytes);

    let markup = if utf16 {
        looks_like_markup(utf16_window(bytes).as_bytes())
    } else {
        looks_like_markup(body)
    };
    if markup {
        return Some(PayloadKind::Markup);
    }

    if utf16 || body.starts_with(b"\t") || body[..body.len().min(TEXT_WINDOW)].contains(&b'\t') {
        return Some(PayloadKind::DelimitedText);
    }

    None
}

/// Decode the start of a UTF-16 payload (BOM included) for markup checks.
fn utf16_window(bytes: &[u8]) -> String {
    let window = &bytes[..bytes.len().min(2 * MARKUP_WINDOW)];
    match encoding_rs::Encoding::for_bom(window) {
        Some((encoding, bom_len)) => encoding.decode_without_bom_handling(&window[bom_len..]).0.into_owned(),
        None => String::new(),
    }
}

fn looks_like_markup(body: &[u8]) -> bool {
    let window = &body[..body.len().min(MARKUP_WINDOW)];
    let start = window.iter().position(|b| !b.is_ascii_whitespace());
    let Some(start) = start else {
        return false;
    };
    let lower = window[start..].to_ascii_lowercase();
    lower.starts_with(b"<!doctype")
        || lower.starts_with(b"<html")
        || lower.starts_with(b"<?xml")
        || lower.starts_with(b"<table")
        || lower.starts_with(b"<meta")
        || contains(&lower, b"<table")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_workbooks() {
        let mut ole = OLE_SIGNATURE.to_vec();
        ole.extend_from_slice(&[0u8; 32]);
        assert_eq!(sniff(&ole), Some(PayloadKind::Workbook));
        assert_eq!(sniff(b"PK\x03\x04rest"), Some(PayloadKind::Workbook));
    }

    #[test]
    fn detects_markup() {
        assert_eq!(sniff(b"<html><body><table>"), Some(PayloadKind::Markup));
        assert_eq!(sniff(b"\xEF\xBB\xBF  <!DOCTYPE html>"), Some(PayloadKind::Markup));
        assert_eq!(sniff(b"<TABLE border=1>"), Some(PayloadKind::Markup));
        assert_eq!(sniff(b"<div>\n<table>"), Some(PayloadKind::Markup));
    }

    fn utf16le(text: &str) -> Vec<u8> {
        let mut out = UTF16LE_BOM.to_vec();
        out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        out
    }

    #[test]
    fn detects_utf16_markup() {
        assert_eq!(sniff(&utf16le("<html>\r\n<table><tr><td>Entrega</td></tr>")), Some(PayloadKind::Markup));
        let mut be = UTF16BE_BOM.to_vec();
        be.extend("<TABLE>".encode_utf16().flat_map(u16::to_be_bytes));
        assert_eq!(sniff(&be), Some(PayloadKind::Markup));
        assert_eq!(sniff(&utf16le("\tEntrega\tCliente\r\n")), Some(PayloadKind::DelimitedText));
    }

    #[test]
    fn detects_delimited_text() {
        assert_eq!(sniff(b"\tEntrega\tCliente\n"), Some(PayloadKind::DelimitedText));
        assert_eq!(sniff(&[0xFF, 0xFE, b'A', 0]), Some(PayloadKind::DelimitedText));
    }

    #[test]
    fn rejects_unknown() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"just some words"), None);
        assert_eq!(sniff(&[0x00, 0x01, 0x02]), None);
    }
}
