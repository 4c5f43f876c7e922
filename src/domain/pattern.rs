//! Grammar checks for the externally supplied parts of a document number.
//!
//! Prefixes, suffixes and periods end up verbatim inside rendered document
//! numbers, so they are checked before any counter is touched:
//!
//! | Part   | Grammar                                         | Empty allowed |
//! |--------|-------------------------------------------------|---------------|
//! | prefix | `[A-Za-z0-9<local>_-]+`                         | no            |
//! | suffix | `[A-Za-z0-9<local>/_-]*`                        | yes           |
//! | period | `[A-Za-z0-9<local>_-]*`                         | yes           |
//!
//! `<local>` is the [`LOCAL_SCRIPT`] range. The grammars are part of the
//! public contract and must not change silently.

use std::ops::RangeInclusive;
use thiserror::Error;

/// Local-alphabet code points accepted in every part (the Thai block).
pub const LOCAL_SCRIPT: RangeInclusive<char> = '\u{0E00}'..='\u{0E7F}';

/// Error returned when a number part does not match its grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Prefix is empty or contains a character outside the prefix grammar
    #[error("invalid prefix {value:?}{}", describe(.offending))]
    InvalidPrefix {
        /// The rejected prefix
        value: String,
        /// First character that broke the grammar, `None` for an empty prefix
        offending: Option<char>,
    },
    /// Suffix contains a character outside the suffix grammar
    #[error("invalid suffix {value:?}{}", describe(.offending))]
    InvalidSuffix {
        /// The rejected suffix
        value: String,
        /// First character that broke the grammar
        offending: Option<char>,
    },
    /// Period contains a character outside the period grammar
    #[error("invalid period {value:?}{}", describe(.offending))]
    InvalidPeriod {
        /// The rejected period
        value: String,
        /// First character that broke the grammar
        offending: Option<char>,
    },
}

fn describe(offending: &Option<char>) -> String {
    match offending {
        Some(c) => format!(": character {:?} is not allowed", c),
        None => ": must not be empty".to_string(),
    }
}

/// Characters shared by every grammar.
fn is_base_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || LOCAL_SCRIPT.contains(&c)
}

fn is_suffix_char(c: char) -> bool {
    is_base_char(c) || c == '/'
}

/// Check a prefix against `^[A-Za-z0-9<local>_-]+$`.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::InvalidPrefix {
            value: String::new(),
            offending: None,
        });
    }
    match prefix.chars().find(|c| !is_base_char(*c)) {
        Some(c) => Err(ValidationError::InvalidPrefix {
            value: prefix.to_string(),
            offending: Some(c),
        }),
        None => Ok(()),
    }
}

/// Check a suffix against `^[A-Za-z0-9<local>/_-]*$`.
pub fn validate_suffix(suffix: &str) -> Result<(), ValidationError> {
    match suffix.chars().find(|c| !is_suffix_char(*c)) {
        Some(c) => Err(ValidationError::InvalidSuffix {
            value: suffix.to_string(),
            offending: Some(c),
        }),
        None => Ok(()),
    }
}

/// Check a period against `^[A-Za-z0-9<local>_-]*$`.
///
/// The period is part of the counter key, so `/` is not accepted here even
/// though suffixes allow it.
pub fn validate_period(period: &str) -> Result<(), ValidationError> {
    match period.chars().find(|c| !is_base_char(*c)) {
        Some(c) => Err(ValidationError::InvalidPeriod {
            value: period.to_string(),
            offending: Some(c),
        }),
        None => Ok(()),
    }
}

/// Validate a prefix and a suffix together.
///
/// The prefix is checked first, so a request with both parts malformed
/// reports `InvalidPrefix`.
pub fn validate(prefix: &str, suffix: &str) -> Result<(), ValidationError> {
    validate_prefix(prefix)?;
    validate_suffix(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_accepts_latin_digits_and_separators() {
        for prefix in ["ABC", "DOC", "doc_2025", "A-B-C", "0", "_", "-"] {
            assert!(validate_prefix(prefix).is_ok(), "{prefix} should be accepted");
        }
    }

    #[test]
    fn test_prefix_accepts_local_script() {
        assert!(validate_prefix("ฝึกงาน").is_ok());
        assert!(validate_prefix("สหกิจ-01").is_ok());
        assert!(validate_prefix("\u{0E00}\u{0E7F}").is_ok());
    }

    #[test]
    fn test_prefix_rejections() {
        assert_eq!(
            validate_prefix(""),
            Err(ValidationError::InvalidPrefix {
                value: String::new(),
                offending: None
            })
        );
        assert_eq!(
            validate_prefix("ABC "),
            Err(ValidationError::InvalidPrefix {
                value: "ABC ".to_string(),
                offending: Some(' ')
            })
        );
        assert!(matches!(
            validate_prefix("ABC@"),
            Err(ValidationError::InvalidPrefix {
                offending: Some('@'),
                ..
            })
        ));
        // slash is a suffix-only character
        assert!(validate_prefix("A/B").is_err());
        // just outside the local block
        assert!(validate_prefix("\u{0E80}").is_err());
        assert!(validate_prefix("é").is_err());
    }

    #[test]
    fn test_suffix_grammar() {
        for suffix in ["", "/2025", "/2025-ABC", "_x", "/ปี2568"] {
            assert!(validate_suffix(suffix).is_ok(), "{suffix} should be accepted");
        }
        assert!(matches!(
            validate_suffix("2025 "),
            Err(ValidationError::InvalidSuffix {
                offending: Some(' '),
                ..
            })
        ));
        assert!(validate_suffix("2025\n").is_err());
        assert!(validate_suffix("a.b").is_err());
    }

    #[test]
    fn test_period_grammar() {
        assert!(validate_period("").is_ok());
        assert!(validate_period("FY2025").is_ok());
        assert!(validate_period("2025/26").is_err());
    }

    #[test]
    fn test_validate_reports_prefix_first() {
        let err = validate("A B", "x y").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPrefix { .. }));

        let err = validate("ABC", "x y").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSuffix { .. }));

        assert!(validate("DOC", "/2025").is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = validate_prefix("").unwrap_err();
        assert_eq!(err.to_string(), "invalid prefix \"\": must not be empty");

        let err = validate_suffix("a b").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid suffix \"a b\": character ' ' is not allowed"
        );
    }
}
