use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    domain::{FindingId, Framework, RemediationStatus, ScanId, Severity},
    serde_ext::{calendar_date, null_as_default, optional_timestamp},
};

/// Percentage points a reported coverage percentage may drift from the value
/// recomputed from its counts. Covers both integer and one-decimal rounding.
pub const COVERAGE_PERCENT_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBreakdown {
    #[serde(rename = "CRITICAL", deserialize_with = "null_as_default")]
    pub critical: u64,
    #[serde(rename = "HIGH", deserialize_with = "null_as_default")]
    pub high: u64,
    #[serde(rename = "MEDIUM", deserialize_with = "null_as_default")]
    pub medium: u64,
    #[serde(rename = "LOW", deserialize_with = "null_as_default")]
    pub low: u64,
}

impl SeverityBreakdown {
    pub fn count(&self, severity: Severity) -> u64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scan_id: Option<ScanId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardOverview {
    #[serde(deserialize_with = "null_as_default")]
    pub risk_score: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_findings: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub compliance_rate: f64,
    #[serde(deserialize_with = "optional_timestamp")]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub severity_breakdown: SeverityBreakdown,
    #[serde(deserialize_with = "null_as_default")]
    pub aws_accounts_count: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub recent_activity: Vec<ActivityItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    #[serde(deserialize_with = "calendar_date")]
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_default")]
    pub risk_score: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_findings: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub high: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub medium: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub low: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsResponse {
    pub period_days: Option<u32>,
    pub data_points: Option<u32>,
    #[serde(deserialize_with = "null_as_default")]
    pub trends: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkCoverage {
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub compliant: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub percentage: f64,
}

impl FrameworkCoverage {
    /// Percentage recomputed from the counts; an empty framework is 0%.
    pub fn expected_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.compliant as f64 / self.total as f64
    }

    pub fn is_consistent(&self) -> bool {
        self.compliant <= self.total
            && (self.percentage - self.expected_percentage()).abs() <= COVERAGE_PERCENT_TOLERANCE
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoverageViolation {
    #[error("{framework}: compliant controls ({compliant}) exceed total ({total})")]
    CompliantExceedsTotal {
        framework: String,
        compliant: u64,
        total: u64,
    },
    #[error("{framework}: reported {reported}% but counts give {expected:.1}%")]
    PercentageMismatch {
        framework: String,
        reported: f64,
        expected: f64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlCoverage(pub BTreeMap<String, FrameworkCoverage>);

impl ControlCoverage {
    pub fn get(&self, framework: Framework) -> FrameworkCoverage {
        self.0.get(framework.id()).copied().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), CoverageViolation> {
        for (framework, coverage) in &self.0 {
            if coverage.compliant > coverage.total {
                return Err(CoverageViolation::CompliantExceedsTotal {
                    framework: framework.clone(),
                    compliant: coverage.compliant,
                    total: coverage.total,
                });
            }
            if !coverage.is_consistent() {
                return Err(CoverageViolation::PercentageMismatch {
                    framework: framework.clone(),
                    reported: coverage.percentage,
                    expected: coverage.expected_percentage(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default)]
    pub issue: String,
    #[serde(default = "unknown_severity")]
    pub severity: Severity,
    #[serde(default, deserialize_with = "null_as_default")]
    pub count: u64,
}

fn unknown_severity() -> Severity {
    Severity::Unknown
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopRisksResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub risks: Vec<Risk>,
}

/// Status → count as reported. Unknown statuses are kept so the total
/// matches what the backend counted; `null` counts are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemediationProgress(pub BTreeMap<String, Option<u64>>);

impl RemediationProgress {
    pub fn count(&self, status: RemediationStatus) -> u64 {
        self.0.get(status.key()).copied().flatten().unwrap_or(0)
    }

    /// `None` when nothing is tracked, so the total is never shown as 0.
    pub fn total(&self) -> Option<u64> {
        let total: u64 = self.0.values().flatten().sum();
        (total > 0).then_some(total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityFinding {
    pub id: FindingId,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default = "unknown_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub control: Option<String>,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindingsResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub findings: Vec<PriorityFinding>,
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
