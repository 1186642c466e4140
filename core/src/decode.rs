//! Repairs appliance output emitted in GB18030.
//!
//! The appliance prints its messages in the legacy double-byte Chinese
//! encoding. Raw shell bytes are decoded here before any pattern matching, and
//! text that was already forced through a lossy UTF-8 conversion upstream can
//! be recovered with [`repair_garbled`].

use encoding_rs::GB18030;

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Decode raw shell output.
///
/// GB18030 is a superset of ASCII, so plain ASCII output decodes unchanged.
/// When the bytes are not valid GB18030 but are valid UTF-8 the UTF-8
/// reading wins; otherwise the lossy GB18030 reading is returned.
pub fn decode_output(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let (decoded, had_errors) = GB18030.decode_without_bom_handling(raw);
    if !had_errors {
        return decoded.into_owned();
    }
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => decoded.into_owned(),
    }
}

/// Try to undo a GB18030 -> UTF-8 misreading.
///
/// Only text that contains replacement characters is touched. The text is
/// re-encoded as GB18030; if those bytes happen to be valid UTF-8 with fewer
/// replacement characters the repaired reading is returned, otherwise the
/// input comes back unchanged.
pub fn repair_garbled(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() || !looks_garbled(text) {
        return raw.to_string();
    }
    let (bytes, _, unmappable) = GB18030.encode(text);
    if unmappable {
        return raw.to_string();
    }
    let Ok(fixed) = std::str::from_utf8(&bytes) else {
        return raw.to_string();
    };
    if fixed.trim().is_empty() || fixed.contains(REPLACEMENT) {
        return raw.to_string();
    }
    if garbled_score(fixed) >= garbled_score(text) {
        return raw.to_string();
    }
    fixed.to_string()
}

fn looks_garbled(text: &str) -> bool {
    text.contains(REPLACEMENT)
}

fn garbled_score(text: &str) -> usize {
    text.matches(REPLACEMENT).count()
}
