//! Positional extraction of records from unstructured CLI listings.
//!
//! The appliance prints one `keyword value` pair per field, scattered through
//! the output and wrapped at arbitrary columns. Each field is matched on its
//! own and the i-th match of every field is zipped into the i-th record.
//! Patterns must be narrow enough (keyword plus delimiter) to avoid matching
//! inside a neighbouring record.

use indexmap::IndexMap;
use regex_lite::Regex;

pub type ExtractedRecord = IndexMap<String, String>;

#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub name: String,
    pub pattern: Regex,
}

impl FieldPattern {
    pub fn new(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            pattern,
        }
    }
}

/// Remove every line break; wrapped values are glued back together.
pub fn flatten_lines(text: &str) -> String {
    text.replace("\r\n", "").replace(['\n', '\r'], "")
}

/// Zip the per-field match sequences into records.
///
/// A field's value is its first participating capture group, or the whole
/// match when the pattern has none.
///
/// The number of records is the length of the shortest match sequence, so a
/// field with no match at all yields no records.
pub fn extract(text: &str, fields: &[FieldPattern]) -> Vec<ExtractedRecord> {
    if fields.is_empty() {
        return Vec::new();
    }
    let flat = flatten_lines(text);
    let columns: Vec<Vec<String>> = fields
        .iter()
        .map(|field| collect_matches(&field.pattern, &flat))
        .collect();
    let count = columns.iter().map(Vec::len).min().unwrap_or(0);

    (0..count)
        .map(|i| {
            fields
                .iter()
                .zip(&columns)
                .map(|(field, column)| (field.name.clone(), column[i].clone()))
                .collect()
        })
        .collect()
}

fn collect_matches(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.iter().skip(1).flatten().next().or_else(|| caps.get(0)))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
