// Validation findings, reported instead of thrown
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}
impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
}
impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.subject, self.message)
    }
}

/// Collected findings for a settings bundle or model. A report with
/// no Error-severity findings still permits a calculation.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, severity: Severity, subject: &str, message: String) {
        self.findings.push(ValidationFinding {
            severity,
            subject: subject.to_string(),
            message,
        });
    }
    pub fn error(&mut self, subject: &str, message: String) {
        self.add(Severity::Error, subject, message);
    }
    pub fn warning(&mut self, subject: &str, message: String) {
        self.add(Severity::Warning, subject, message);
    }
    pub fn is_valid(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Error)
    }
    pub fn findings(&self) -> &[ValidationFinding] {
        &self.findings
    }
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_validity() {
        let mut report = ValidationReport::new();
        assert!(report.is_valid());
        report.warning("settings", String::from("suspicious value"));
        assert!(report.is_valid());
        report.error("settings", String::from("bad value"));
        assert!(!report.is_valid());
        assert_eq!(report.findings().len(), 2);
    }
}
