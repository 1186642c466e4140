//! Reads the appliance's verdict out of free-form command output.

use std::sync::LazyLock;

use regex_lite::Regex;

pub(crate) const CODE_USER_NOT_FOUND: &str = "-24501";
pub(crate) const CODE_SAME_PASSWORD: &str = "-24316";
pub(crate) const CODE_PASSWORD_TOO_SHORT: &str = "-23204";

static ERROR_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"-\d{4,}").ok());

/// Any numeric error code, or the words "error"/"failed".
pub(crate) fn looks_like_error(out: &str) -> bool {
    let lower = out.to_lowercase();
    ERROR_CODE.as_ref().is_some_and(|re| re.is_match(out))
        || lower.contains("error")
        || lower.contains("failed")
}

pub(crate) fn user_not_found(out: &str) -> bool {
    let lower = out.to_lowercase();
    out.contains(CODE_USER_NOT_FOUND)
        || out.contains("不存")
        || lower.contains("not exist")
        || lower.contains("notfound")
        || lower.contains("no such user")
}

pub(crate) fn user_exists(out: &str) -> bool {
    out.contains("已存在") || out.to_lowercase().contains("already exist")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteVerdict {
    Deleted,
    NotFound,
    Failed,
}

/// The appliance prints nothing useful on success, so any non-empty output
/// without a failure marker counts as deleted.
pub(crate) fn classify_delete(out: &str) -> DeleteVerdict {
    if user_not_found(out) {
        return DeleteVerdict::NotFound;
    }
    let lower = out.to_lowercase();
    if out.trim().is_empty() || lower.contains("error") || lower.contains("failed") {
        return DeleteVerdict::Failed;
    }
    DeleteVerdict::Deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_codes_and_words_look_like_errors() {
        assert!(looks_like_error("% -23204 password too short"));
        assert!(looks_like_error("Command FAILED"));
        assert!(looks_like_error("error: bad group"));
        assert!(!looks_like_error("aaaa user user add name bob\r\n> "));
        assert!(!looks_like_error("range 1-200"));
    }

    #[test]
    fn missing_user_variants() {
        assert!(user_not_found("ret -24501"));
        assert!(user_not_found("用户不存在"));
        assert!(user_not_found("User does Not Exist"));
        assert!(user_not_found("no such user bob"));
        assert!(!user_not_found("user bob removed"));
    }

    #[test]
    fn duplicate_user_variants() {
        assert!(user_exists("用户名已存在"));
        assert!(user_exists("name bob Already Exists"));
        assert!(!user_exists("ok"));
    }

    #[test]
    fn delete_verdicts() {
        assert_eq!(classify_delete("delete ok\r\n> "), DeleteVerdict::Deleted);
        assert_eq!(classify_delete("code -24501"), DeleteVerdict::NotFound);
        assert_eq!(classify_delete("   "), DeleteVerdict::Failed);
        assert_eq!(classify_delete("operation failed"), DeleteVerdict::Failed);
    }
}
