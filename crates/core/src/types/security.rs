use serde::{Deserialize, Serialize};

// =============================================================================
// Static Analysis Types
// =============================================================================

/// Coarse static-analysis severity classification of a whole submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Severity of a single violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Category of a detected violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForbiddenImport,
    ForbiddenFunction,
    ForbiddenPattern,
    SuspiciousPattern,
    SyntaxError,
}

/// One finding produced by static analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub kind: ViolationKind,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl SecurityViolation {
    pub fn new(kind: ViolationKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            severity,
            line: None,
            column: None,
            recommendation: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Immutable snapshot of one validation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityResult {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    pub violations: Vec<SecurityViolation>,
    pub recommendations: Vec<String>,
}

impl SecurityResult {
    /// Immediate rejection that does not come from scanning (empty code, unknown language).
    pub fn rejected(violation: SecurityViolation, recommendation: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            risk_level: RiskLevel::High,
            violations: vec![violation],
            recommendations: vec![recommendation.into()],
        }
    }

    /// Most severe violation, first one wins on ties.
    pub fn most_severe(&self) -> Option<&SecurityViolation> {
        self.violations
            .iter()
            .fold(None, |best: Option<&SecurityViolation>, v| match best {
                Some(b) if b.severity >= v.severity => Some(b),
                _ => Some(v),
            })
    }

    /// Human-readable summary of every violation, used as the caller-facing error.
    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return format!("Code rejected with risk level {}", self.risk_level.as_str());
        }
        let details: Vec<&str> = self
            .violations
            .iter()
            .map(|v| v.description.as_str())
            .collect();
        format!(
            "Security validation failed ({}): {}",
            self.risk_level.as_str(),
            details.join("; ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_most_severe_prefers_first_on_tie() {
        let result = SecurityResult {
            is_safe: false,
            risk_level: RiskLevel::High,
            violations: vec![
                SecurityViolation::new(ViolationKind::SuspiciousPattern, Severity::Medium, "a"),
                SecurityViolation::new(ViolationKind::ForbiddenImport, Severity::High, "b"),
                SecurityViolation::new(ViolationKind::ForbiddenFunction, Severity::High, "c"),
            ],
            recommendations: vec![],
        };
        assert_eq!(result.most_severe().unwrap().description, "b");
        assert!(result.summary().contains("a; b; c"));
    }

    #[test]
    fn test_violation_serialization() {
        let v = SecurityViolation::new(ViolationKind::ForbiddenImport, Severity::High, "x").at(3, 1);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "forbidden_import");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["line"], 3);
        assert!(json.get("recommendation").is_none());
    }
}
