//! Conformance report model
//!
//! Shaped like the `ConformanceReport` custom resource so it can be written
//! straight to YAML or JSON.

use crate::profiles::Tier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REPORT_API_VERSION: &str = "gateway.networking.k8s.io/v1";
pub const REPORT_KIND: &str = "ConformanceReport";

/// Overall result of a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Success,
    Partial,
    #[default]
    Failure,
}

/// Numeric outcome counts of a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub not_supported: u32,
}

impl Statistics {
    /// Derive the tier result.
    ///
    /// An empty or all-skipped tier is a failure, never a silent success.
    pub fn result(&self) -> ResultKind {
        if self.failed > 0 || self.passed == 0 {
            ResultKind::Failure
        } else if self.skipped > 0 || self.not_supported > 0 {
            ResultKind::Partial
        } else {
            ResultKind::Success
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub result: ResultKind,
    pub statistics: Statistics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tests: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_tests: Vec<String>,
}

impl Status {
    /// One sentence describing this tier, e.g. "Core tests failed with 3 test failures."
    pub fn summary_clause(&self, tier: Tier) -> String {
        match self.result {
            ResultKind::Success => format!("{} tests succeeded.", tier),
            ResultKind::Partial => format!(
                "{} tests partially succeeded with {} test skips.",
                tier,
                self.statistics.skipped + self.statistics.not_supported
            ),
            ResultKind::Failure => format!(
                "{} tests failed with {} test failures.",
                tier, self.statistics.failed
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedStatus {
    #[serde(flatten)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    pub name: String,
    pub summary: String,
    pub core: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<ExtendedStatus>,
}

impl ProfileReport {
    /// Core clause, followed by the Extended clause when the profile has one
    pub fn build_summary(&self) -> String {
        let mut summary = self.core.summary_clause(Tier::Core);
        if let Some(extended) = &self.extended {
            summary.push(' ');
            summary.push_str(&extended.status.summary_clause(Tier::Extended));
        }
        summary
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("implementation {0} must be set")]
    MissingField(&'static str),

    #[error("implementation contact must contain at least one entry")]
    MissingContact,
}

/// Who produced the report
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub organization: String,
    pub project: String,
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub contact: Vec<String>,
}

impl Implementation {
    /// Reports are only publishable with complete implementation metadata
    pub fn validate(&self) -> Result<(), ReportError> {
        let required = [
            ("organization", &self.organization),
            ("project", &self.project),
            ("url", &self.url),
            ("version", &self.version),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ReportError::MissingField(field));
            }
        }
        if self.contact.iter().all(|c| c.trim().is_empty()) {
            return Err(ReportError::MissingContact);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceReport {
    pub api_version: String,
    pub kind: String,
    pub date: String,
    pub implementation: Implementation,
    #[serde(rename = "gatewayAPIVersion")]
    pub gateway_api_version: String,
    #[serde(rename = "gatewayAPIChannel")]
    pub gateway_api_channel: String,
    pub mode: String,
    pub profiles: Vec<ProfileReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub succeeded_provisional_tests: Vec<String>,
}
