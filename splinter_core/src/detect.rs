use crate::formats::Tree;
use crate::formats::lines::split_lines;
use std::fmt;

/// The format classification of a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    Csv,
    Json,
    Xml,
    Jpeg,
    Pdf,
    Plaintext,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Csv => "csv",
            FormatTag::Json => "json",
            FormatTag::Xml => "xml",
            FormatTag::Jpeg => "jpeg",
            FormatTag::Pdf => "pdf",
            FormatTag::Plaintext => "plaintext",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Checker = fn(&[u8]) -> bool;

/// Checkers in priority order. Magic-number formats go first so binary seeds
/// never reach the text heuristics.
const CHECKERS: &[(FormatTag, Checker)] = &[
    (FormatTag::Jpeg, is_jpeg),
    (FormatTag::Pdf, is_pdf),
    (FormatTag::Json, is_json),
    (FormatTag::Xml, is_xml),
    (FormatTag::Csv, is_csv),
];

/// Classifies a seed. Total and deterministic: every byte sequence, including
/// the empty one, maps to exactly one tag, falling back to `Plaintext`.
pub fn detect(input: &[u8]) -> FormatTag {
    CHECKERS
        .iter()
        .find(|(_, matches)| matches(input))
        .map(|(tag, _)| *tag)
        .unwrap_or(FormatTag::Plaintext)
}

fn is_jpeg(input: &[u8]) -> bool {
    input.starts_with(&[0xFF, 0xD8, 0xFF])
}

fn is_pdf(input: &[u8]) -> bool {
    input.starts_with(b"%PDF-")
}

/// A JSON seed must be an object or an array at the top level.
fn is_json(input: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<serde_json::Value>(input),
        Ok(serde_json::Value::Object(_) | serde_json::Value::Array(_))
    )
}

fn is_xml(input: &[u8]) -> bool {
    let starts_with_tag = input
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<');
    starts_with_tag && Tree::parse_document(input).is_ok()
}

/// At least two header columns and a second row of the same width.
fn is_csv(input: &[u8]) -> bool {
    if std::str::from_utf8(input).is_err() {
        return false;
    }
    let lines = split_lines(input);
    let (Some(header), Some(first_row)) = (lines.first(), lines.get(1)) else {
        return false;
    };
    let columns = header.split(|b| *b == b',').count();
    columns >= 2 && first_row.split(|b| *b == b',').count() == columns
}
