//! Turns `aaaa user user search` output into account records.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::extract::ExtractedRecord;
use crate::extract::FieldPattern;
use crate::extract::extract;

const ENABLED: &str = "enabled";
const DISABLED: &str = "disabled";

/// Appliance rows read `name .. invalid .. description .. group ..`, so an
/// unquoted description is anchored on the `invalid` token before it; the
/// echoed search command has no such token. Quoted descriptions match anywhere.
const FIELDS: [(&str, &str); 5] = [
    ("name", r"\bname\s+(\S+)"),
    (
        "description",
        r"\binvalid\s+\S+\s+description\s+(.*?)\s+group\s|\bdescription\s+('[^']*')\s+group\s",
    ),
    ("group", r"\bgroup\s+(\S+)"),
    ("mail", r"\bmail\s+(\S+)"),
    ("invalid", r"\binvalid\s+(\S+)"),
];

static LISTING_FIELDS: LazyLock<Vec<FieldPattern>> = LazyLock::new(|| {
    FIELDS
        .iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| FieldPattern::new(*name, re)))
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpnUser {
    pub name: String,
    pub description: String,
    pub group: String,
    pub mail: String,
    pub enabled: bool,
    pub status: String,
}

impl VpnUser {
    fn from_record(record: &ExtractedRecord) -> Self {
        let field = |name: &str| record.get(name).map(String::as_str).unwrap_or_default();
        let enabled = status_from_invalid(field("invalid"));
        Self {
            name: field("name").trim().to_string(),
            description: clean_description(field("description")),
            group: display_group(field("group")),
            mail: field("mail").trim().to_string(),
            enabled,
            status: status_label(enabled).to_string(),
        }
    }

    /// Multi-line entry used for progress lines and the job's result text.
    pub fn log_entry(&self) -> String {
        format!(
            "name: {}\ndescription: {}\ngroup: {}\nmail: {}\nstatus: {}",
            self.name, self.description, self.group, self.mail, self.status
        )
    }
}

pub fn parse_listing(output: &str) -> Vec<VpnUser> {
    extract(output, &LISTING_FIELDS)
        .iter()
        .map(VpnUser::from_record)
        .collect()
}

/// The appliance's `invalid` flag is inverted: `no` means the account works.
pub(crate) fn status_from_invalid(invalid: &str) -> bool {
    invalid.trim().eq_ignore_ascii_case("no")
}

pub(crate) fn status_label(enabled: bool) -> &'static str {
    if enabled { ENABLED } else { DISABLED }
}

/// Value for the `invalid` argument of add/modify commands.
pub(crate) fn invalid_flag(enabled: bool) -> &'static str {
    if enabled { "no" } else { "yes" }
}

pub(crate) fn clean_description(description: &str) -> String {
    description.trim().replace('\'', "")
}

/// `sales^root` is shown as `sales`; nested paths keep their inner parts.
pub(crate) fn display_group(group: &str) -> String {
    let group = group.trim();
    let trimmed = match group.len().checked_sub(5) {
        Some(cut) if group.is_char_boundary(cut) && group[cut..].eq_ignore_ascii_case("^root") => {
            &group[..cut]
        }
        _ => group,
    };
    trimmed.trim_end_matches('^').trim().to_string()
}
