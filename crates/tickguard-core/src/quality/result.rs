use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{InstrumentId, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

/// Independent axis a tick is checked along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    Completeness,
    Validity,
    Consistency,
    Timeliness,
    Accuracy,
    System,
}

impl Dimension {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completeness => "COMPLETENESS",
            Self::Validity => "VALIDITY",
            Self::Consistency => "CONSISTENCY",
            Self::Timeliness => "TIMELINESS",
            Self::Accuracy => "ACCURACY",
            Self::System => "SYSTEM",
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub dimension: Dimension,
    pub message: String,
}

impl Issue {
    pub fn error(dimension: Dimension, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            dimension,
            message: message.into(),
        }
    }

    pub fn warning(dimension: Dimension, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            dimension,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.dimension, self.message)
    }
}

/// Outcome of validating one tick. Issues keep the order they were found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub instrument: InstrumentId,
    pub validated_at: UtcDateTime,
    pub issues: Vec<Issue>,
}

impl ValidationResult {
    pub fn new(instrument: InstrumentId, validated_at: UtcDateTime, issues: Vec<Issue>) -> Self {
        Self {
            instrument,
            validated_at,
            issues,
        }
    }

    /// A result is valid when it carries no error-level issue.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(Issue::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|issue| issue.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("{}: no issues", self.instrument);
        }
        let details = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        format!(
            "{}: {} error(s), {} warning(s): {}",
            self.instrument,
            self.error_count(),
            self.warning_count(),
            details
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(issues: Vec<Issue>) -> ValidationResult {
        ValidationResult::new(
            InstrumentId::parse("IBM.N").expect("valid"),
            UtcDateTime::parse("2024-05-01T10:00:00Z").expect("valid"),
            issues,
        )
    }

    #[test]
    fn warnings_alone_keep_result_valid() {
        let result = result(vec![Issue::warning(Dimension::Timeliness, "stale")]);
        assert!(result.is_valid());
        assert!(result.has_warnings());
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn any_error_makes_result_invalid() {
        let result = result(vec![
            Issue::warning(Dimension::Accuracy, "too precise"),
            Issue::error(Dimension::Validity, "bid must be positive"),
        ]);
        assert!(!result.is_valid());
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(
            result.summary(),
            "IBM.N: 1 error(s), 1 warning(s): [WARNING] ACCURACY: too precise; \
             [ERROR] VALIDITY: bid must be positive"
        );
    }

    #[test]
    fn dimensions_serialize_in_upper_case() {
        let json = serde_json::to_string(&Issue::error(Dimension::System, "boom")).expect("json");
        assert_eq!(
            json,
            r#"{"severity":"ERROR","dimension":"SYSTEM","message":"boom"}"#
        );
    }
}
