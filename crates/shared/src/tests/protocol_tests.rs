use super::*;
use crate::error::{ApiError, ErrorCode};

#[test]
fn overview_defaults_missing_and_null_numbers_to_zero() {
    let overview: DashboardOverview = serde_json::from_str(
        r#"{"risk_score": null, "severity_breakdown": {"CRITICAL": 3, "HIGH": null}}"#,
    )
    .expect("overview");

    assert_eq!(overview.risk_score, 0);
    assert_eq!(overview.total_findings, 0);
    assert_eq!(overview.compliance_rate, 0.0);
    assert_eq!(overview.severity_breakdown.count(Severity::Critical), 3);
    assert_eq!(overview.severity_breakdown.count(Severity::High), 0);
    assert_eq!(overview.severity_breakdown.count(Severity::Low), 0);
    assert!(overview.last_scan.is_none());
    assert!(overview.recent_activity.is_empty());
}

#[test]
fn overview_accepts_naive_backend_timestamps() {
    let overview: DashboardOverview = serde_json::from_str(
        r#"{
            "risk_score": 42,
            "last_scan": "2024-03-01T09:30:00.123456",
            "recent_activity": [
                {"type": "scan_completed", "description": "Scan completed for account 1",
                 "timestamp": "2024-03-01T09:30:00", "scan_id": 7}
            ]
        }"#,
    )
    .expect("overview");

    let last_scan = overview.last_scan.expect("last scan");
    assert_eq!(last_scan.to_rfc3339(), "2024-03-01T09:30:00.123456+00:00");
    assert_eq!(overview.recent_activity.len(), 1);
    assert_eq!(overview.recent_activity[0].kind, "scan_completed");
    assert_eq!(overview.recent_activity[0].scan_id, Some(ScanId(7)));
}

#[test]
fn trend_points_reduce_datetimes_to_calendar_dates() {
    let trends: TrendsResponse = serde_json::from_str(
        r#"{"period_days": 30, "data_points": 2, "trends": [
            {"date": "2024-02-01T12:00:00", "risk_score": 60, "total_findings": 10,
             "critical": 1, "high": 2, "medium": 3, "low": 4},
            {"date": "2024-02-02", "risk_score": 55}
        ]}"#,
    )
    .expect("trends");

    assert_eq!(trends.period_days, Some(30));
    assert_eq!(trends.trends[0].date, NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"));
    assert_eq!(trends.trends[1].date, NaiveDate::from_ymd_opt(2024, 2, 2).expect("date"));
    assert_eq!(trends.trends[1].total_findings, 0);
}

#[test]
fn trend_point_rejects_unparseable_date() {
    let err = serde_json::from_str::<TrendPoint>(r#"{"date": "yesterday"}"#)
        .expect_err("should fail");
    assert!(err.to_string().contains("invalid date"));
}

#[test]
fn unknown_severity_does_not_fail_the_payload() {
    let risks: TopRisksResponse = serde_json::from_str(
        r#"{"risks": [{"issue": "Public bucket", "severity": "CRITICAL", "count": 4},
                      {"issue": "Odd", "severity": "INFORMATIONAL", "count": 1}]}"#,
    )
    .expect("risks");

    assert_eq!(risks.risks[0].severity, Severity::Critical);
    assert_eq!(risks.risks[1].severity, Severity::Unknown);
}

#[test]
fn coverage_from_backend_defaults_is_consistent() {
    let coverage: ControlCoverage = serde_json::from_str(
        r#"{
            "iso_27001": {"total": 25, "compliant": 22, "percentage": 88.0},
            "iso_27701": {"total": 18, "compliant": 17, "percentage": 94.4},
            "iso_42001": {"total": 12, "compliant": 0, "percentage": 0}
        }"#,
    )
    .expect("coverage");

    coverage.validate().expect("consistent");
    assert_eq!(coverage.get(Framework::Iso27701).compliant, 17);
}

#[test]
fn coverage_percentage_recomputation_stays_within_tolerance() {
    for total in 1..=60u64 {
        for compliant in 0..=total {
            let exact = 100.0 * compliant as f64 / total as f64;
            let integer_rounded = FrameworkCoverage {
                total,
                compliant,
                percentage: exact.round(),
            };
            let one_decimal = FrameworkCoverage {
                total,
                compliant,
                percentage: (exact * 10.0).round() / 10.0,
            };
            assert!(integer_rounded.is_consistent(), "{total}/{compliant}");
            assert!(one_decimal.is_consistent(), "{total}/{compliant}");
        }
    }
}

#[test]
fn coverage_rejects_compliant_above_total() {
    let mut frameworks = BTreeMap::new();
    frameworks.insert(
        "iso_27001".to_string(),
        FrameworkCoverage {
            total: 10,
            compliant: 11,
            percentage: 110.0,
        },
    );
    let err = ControlCoverage(frameworks).validate().expect_err("invalid");
    assert!(matches!(err, CoverageViolation::CompliantExceedsTotal { .. }));
}

#[test]
fn coverage_rejects_mismatched_percentage() {
    let mut frameworks = BTreeMap::new();
    frameworks.insert(
        "iso_42001".to_string(),
        FrameworkCoverage {
            total: 12,
            compliant: 6,
            percentage: 75.0,
        },
    );
    let err = ControlCoverage(frameworks).validate().expect_err("invalid");
    assert!(matches!(err, CoverageViolation::PercentageMismatch { .. }));
}

#[test]
fn missing_framework_reads_as_empty() {
    let coverage = ControlCoverage::default();
    assert_eq!(coverage.get(Framework::Iso42001), FrameworkCoverage::default());
}

#[test]
fn remediation_total_is_absent_without_counts() {
    let progress: RemediationProgress = serde_json::from_str("{}").expect("progress");
    assert_eq!(progress.total(), None);
    for status in RemediationStatus::ALL {
        assert_eq!(progress.count(status), 0);
    }

    let nulls: RemediationProgress =
        serde_json::from_str(r#"{"open": null}"#).expect("progress");
    assert_eq!(nulls.total(), None);
}

#[test]
fn remediation_total_is_absent_when_every_count_is_zero() {
    let progress: RemediationProgress = serde_json::from_str(
        r#"{"open": 0, "assigned": 0, "in_progress": 0, "resolved": 0, "accepted_risk": 0}"#,
    )
    .expect("progress");
    assert_eq!(progress.total(), None);
}

#[test]
fn remediation_total_sums_every_reported_status() {
    let progress: RemediationProgress = serde_json::from_str(
        r#"{"open": 4, "assigned": 1, "in_progress": 0, "resolved": 6, "accepted_risk": 2, "false_positive": 3}"#,
    )
    .expect("progress");

    assert_eq!(progress.count(RemediationStatus::Resolved), 6);
    assert_eq!(progress.total(), Some(16));

    let zeros: RemediationProgress =
        serde_json::from_str(r#"{"open": 0, "resolved": 0}"#).expect("progress");
    assert_eq!(zeros.total(), Some(0));
}

#[test]
fn findings_response_parses_list_payload() {
    let findings: FindingsResponse = serde_json::from_str(
        r#"{"findings": [{"id": 9, "resource_type": "s3_bucket", "resource_name": "training-data",
             "severity": "HIGH", "issue": "Bucket not encrypted", "control": "A.8.24",
             "remediation": null, "status": "open", "region": "us-east-1",
             "created_at": "2024-05-05T10:00:00"}],
            "total": 1}"#,
    )
    .expect("findings");

    assert_eq!(findings.total, 1);
    assert_eq!(findings.findings[0].id, FindingId(9));
    assert_eq!(findings.findings[0].severity, Severity::High);
}

#[test]
fn api_error_extracts_detail_message() {
    let err = ApiError::from_response(401, r#"{"detail": "Not authenticated"}"#);
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(err.message, "Not authenticated");

    let err = ApiError::from_response(503, "");
    assert_eq!(err.code, ErrorCode::Unavailable);
    assert_eq!(err.message, "HTTP 503");
}
