//! Counter lines and the numbers they issue.
//!
//! A [`NumberScope`] names one independent counter line. Only its
//! `(prefix, period)` pair, the [`ScopeKey`], identifies the counter; the
//! suffix template is used when rendering a number for display.

use crate::domain::pattern::{self, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a counter line: `(prefix, period)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    prefix: String,
    period: String,
}

impl ScopeKey {
    /// Build a key after checking both parts.
    pub fn new(prefix: impl Into<String>, period: impl Into<String>) -> Result<Self, ValidationError> {
        let prefix = prefix.into();
        let period = period.into();
        pattern::validate_prefix(&prefix)?;
        pattern::validate_period(&period)?;
        Ok(Self { prefix, period })
    }

    /// The counter prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The counter period (fiscal year, running series, ...). May be empty.
    pub fn period(&self) -> &str {
        &self.period
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.period.is_empty() {
            write!(f, "{}", self.prefix)
        } else {
            write!(f, "{}@{}", self.prefix, self.period)
        }
    }
}

/// A counter line together with the suffix used when rendering its numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumberScope {
    key: ScopeKey,
    suffix_template: String,
}

impl NumberScope {
    /// Create a scope, validating prefix, suffix and period.
    ///
    /// # Errors
    /// Returns the first grammar violation, checked in the order prefix,
    /// suffix, period.
    pub fn new(
        prefix: impl Into<String>,
        suffix_template: impl Into<String>,
        period: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let prefix = prefix.into();
        let suffix_template = suffix_template.into();
        pattern::validate(&prefix, &suffix_template)?;
        let key = ScopeKey::new(prefix, period)?;
        Ok(Self {
            key,
            suffix_template,
        })
    }

    /// The counter identity.
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// The counter prefix.
    pub fn prefix(&self) -> &str {
        self.key.prefix()
    }

    /// The suffix appended to rendered numbers.
    pub fn suffix_template(&self) -> &str {
        &self.suffix_template
    }

    /// The counter period.
    pub fn period(&self) -> &str {
        self.key.period()
    }
}

/// A number issued by the allocator for one scope.
///
/// Numbers are only meaningful together with the [`ScopeKey`] that issued
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentNumber(u64);

impl DocumentNumber {
    /// Wrap a raw counter value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Render as `{prefix}-{number}{suffix}` with the number zero-padded to
    /// `width` digits.
    ///
    /// ```
    /// use docnum_guard::{DocumentNumber, NumberScope};
    ///
    /// let scope = NumberScope::new("DOC", "/2025", "2025").unwrap();
    /// assert_eq!(DocumentNumber::new(7).render(&scope, 4), "DOC-0007/2025");
    /// ```
    pub fn render(self, scope: &NumberScope, width: usize) -> String {
        format!(
            "{}-{:0width$}{}",
            scope.prefix(),
            self.0,
            scope.suffix_template(),
            width = width
        )
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DocumentNumber> for u64 {
    fn from(number: DocumentNumber) -> Self {
        number.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_validation_order() {
        assert!(matches!(
            NumberScope::new("", "/x", "2025"),
            Err(ValidationError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            NumberScope::new("DOC", "x y", "2025"),
            Err(ValidationError::InvalidSuffix { .. })
        ));
        assert!(matches!(
            NumberScope::new("DOC", "", "20/25"),
            Err(ValidationError::InvalidPeriod { .. })
        ));
    }

    #[test]
    fn test_suffix_is_not_part_of_key() {
        let a = NumberScope::new("DOC", "/A", "2025").unwrap();
        let b = NumberScope::new("DOC", "/B", "2025").unwrap();
        let c = NumberScope::new("DOC", "/A", "2026").unwrap();

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_render() {
        let scope = NumberScope::new("MOU", "", "").unwrap();
        assert_eq!(DocumentNumber::new(12).render(&scope, 3), "MOU-012");
        assert_eq!(DocumentNumber::new(12345).render(&scope, 3), "MOU-12345");
        assert_eq!(DocumentNumber::new(1).render(&scope, 0), "MOU-1");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ScopeKey::new("DOC", "").unwrap().to_string(), "DOC");
        assert_eq!(ScopeKey::new("DOC", "2025").unwrap().to_string(), "DOC@2025");
    }
}
