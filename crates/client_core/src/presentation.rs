//! Pure display derivations shared by every view that shows dashboard data.

use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    domain::{RemediationStatus, Severity},
    protocol::{FrameworkCoverage, PriorityFinding, TrendPoint},
};

pub const NO_RECENT_ACTIVITY: &str = "No recent activity";
pub const NO_RISKS: &str = "No risks found";
pub const NO_PRIORITY_FINDINGS: &str = "No priority findings - Run a scan to get started";
pub const NO_TREND_DATA: &str = "No trend data yet";
pub const NEVER_SCANNED: &str = "Never";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Critical,
    High,
    Medium,
    Low,
    Danger,
    Warning,
    Info,
    Success,
    Neutral,
}

impl Tone {
    pub fn class_name(self) -> &'static str {
        match self {
            Tone::Critical => "text-severity-critical",
            Tone::High => "text-severity-high",
            Tone::Medium => "text-severity-medium",
            Tone::Low => "text-severity-low",
            Tone::Danger => "text-red-600",
            Tone::Warning => "text-yellow-600",
            Tone::Info => "text-blue-600",
            Tone::Success => "text-green-600",
            Tone::Neutral => "text-gray-600",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskBand {
    High,
    Medium,
    Low,
    Minimal,
}

impl RiskBand {
    /// Bands are `[80, ∞)`, `[50, 80)`, `[20, 50)` and everything below.
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 80 => RiskBand::High,
            s if s >= 50 => RiskBand::Medium,
            s if s >= 20 => RiskBand::Low,
            _ => RiskBand::Minimal,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskBand::High => "HIGH RISK",
            RiskBand::Medium => "MEDIUM RISK",
            RiskBand::Low => "LOW RISK",
            RiskBand::Minimal => "MINIMAL RISK",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            RiskBand::High => Tone::Critical,
            RiskBand::Medium => Tone::High,
            RiskBand::Low => Tone::Medium,
            RiskBand::Minimal => Tone::Low,
        }
    }
}

pub fn severity_tone(severity: Severity) -> Tone {
    match severity {
        Severity::Critical => Tone::Critical,
        Severity::High => Tone::High,
        Severity::Medium => Tone::Medium,
        Severity::Low => Tone::Low,
        Severity::Unknown => Tone::Neutral,
    }
}

pub fn remediation_tone(status: RemediationStatus) -> Tone {
    match status {
        RemediationStatus::Open => Tone::Danger,
        RemediationStatus::Assigned => Tone::Warning,
        RemediationStatus::InProgress => Tone::Info,
        RemediationStatus::Resolved => Tone::Success,
        RemediationStatus::AcceptedRisk => Tone::Neutral,
    }
}

pub fn score_text(score: i64) -> String {
    format!("{score}/100")
}

/// Width of the hero score bar, in percent.
pub fn score_bar_width(score: i64) -> u8 {
    score.clamp(0, 100) as u8
}

pub fn percent_text(value: f64) -> String {
    format!("{value}%")
}

pub fn coverage_fraction(coverage: &FrameworkCoverage) -> String {
    format!("{}/{}", coverage.compliant, coverage.total)
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%b %-d, %Y, %-I:%M %p").to_string()
}

pub fn last_scan_text(last_scan: Option<DateTime<Utc>>) -> String {
    last_scan.map_or_else(|| NEVER_SCANNED.to_string(), format_timestamp)
}

pub fn trend_axis_label(date: NaiveDate) -> String {
    date.format("%b %d").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingsChange {
    Up(u64),
    Down(u64),
    Unchanged,
}

impl FindingsChange {
    /// Compares the two most recent trend points; needs at least two.
    pub fn from_trends(trends: &[TrendPoint]) -> Option<Self> {
        let [.., previous, latest] = trends else {
            return None;
        };
        let change = match latest.total_findings.cmp(&previous.total_findings) {
            std::cmp::Ordering::Greater => {
                FindingsChange::Up(latest.total_findings - previous.total_findings)
            }
            std::cmp::Ordering::Less => {
                FindingsChange::Down(previous.total_findings - latest.total_findings)
            }
            std::cmp::Ordering::Equal => FindingsChange::Unchanged,
        };
        Some(change)
    }

    pub fn text(self) -> String {
        match self {
            FindingsChange::Up(n) => format!("↑ {n} from last scan"),
            FindingsChange::Down(n) => format!("↓ {n} from last scan"),
            FindingsChange::Unchanged => "No change from last scan".to_string(),
        }
    }

    /// More findings is bad news.
    pub fn tone(self) -> Tone {
        match self {
            FindingsChange::Up(_) => Tone::Danger,
            FindingsChange::Down(_) => Tone::Success,
            FindingsChange::Unchanged => Tone::Neutral,
        }
    }
}

/// Most severe first; equal severities keep the backend's order.
pub fn rank_priority_findings(findings: &[PriorityFinding], limit: usize) -> Vec<PriorityFinding> {
    let mut ranked = findings.to_vec();
    ranked.sort_by_key(|finding| finding.severity);
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
