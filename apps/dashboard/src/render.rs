//! Plain-text rendering of a composed dashboard.

use std::fmt::Write;

use client_core::{
    dashboard::{Panel, PanelContent},
    DashboardView, Route,
};

const LOADING: &str = "Loading...";

fn section<T>(out: &mut String, title: &str, panel: &Panel<T>, body: impl FnOnce(&mut String, &T)) {
    let _ = write!(out, "\n== {title}");
    if panel.refreshing {
        out.push_str(" (refreshing)");
    }
    out.push('\n');
    match &panel.content {
        PanelContent::Loading => {
            let _ = writeln!(out, "  {LOADING}");
        }
        PanelContent::Empty(message) => {
            let _ = writeln!(out, "  {message}");
        }
        PanelContent::Ready(value) => body(out, value),
    }
    if let Some(err) = &panel.error {
        let _ = writeln!(out, "  ! {err}");
    }
}

pub fn render_dashboard(view: &DashboardView) -> String {
    let mut out = String::new();

    section(&mut out, "Compliance Health Score", &view.hero, |out, hero| {
        let filled = usize::from(hero.bar_width) / 5;
        let _ = writeln!(
            out,
            "  {}  {}  [{}{}]",
            hero.score_text,
            hero.band.label(),
            "#".repeat(filled),
            ".".repeat(20 - filled)
        );
        let counts: Vec<String> = hero
            .severity_counts
            .iter()
            .map(|(severity, count)| format!("{count} {}", severity.label()))
            .collect();
        let _ = writeln!(out, "  {}", counts.join("  "));
        let _ = writeln!(out, "  Last scan: {}", hero.last_scan);
    });

    section(&mut out, "Metrics", &view.metrics, |out, m| {
        let _ = writeln!(out, "  Risk Score       {} ({})", m.risk_score_text, m.band.label());
        let change = m
            .findings_change
            .map(|change| format!("  {}", change.text()))
            .unwrap_or_default();
        let _ = writeln!(out, "  Total Findings   {}{change}", m.total_findings);
        let _ = writeln!(out, "  Compliance Rate  {}", m.compliance_rate);
        let _ = writeln!(out, "  AWS Accounts     {}", m.aws_accounts);
        let _ = writeln!(out, "  Last Scan        {}", m.last_scan);
    });

    section(&mut out, "Top Risks", &view.top_risks, |out, rows| {
        for row in rows {
            let _ = writeln!(out, "  [{:<8}] {:>4}  {}", row.severity.as_str(), row.count, row.issue);
        }
    });

    section(&mut out, "Compliance Trends", &view.trends, |out, rows| {
        for row in rows {
            let _ = writeln!(
                out,
                "  {}  risk {:>3}  findings {:>4}",
                row.label, row.risk_score, row.total_findings
            );
        }
    });

    section(&mut out, "Recent Activity", &view.recent_activity, |out, rows| {
        for row in rows {
            let _ = writeln!(out, "  {}  {}", row.when, row.description);
        }
    });

    section(&mut out, "Control Coverage", &view.control_coverage, |out, rows| {
        for row in rows {
            let _ = writeln!(
                out,
                "  {:<10} {:>7}  {}",
                row.framework.label(),
                row.fraction,
                row.percentage
            );
        }
    });

    section(&mut out, "Remediation Progress", &view.remediation, |out, remediation| {
        for row in &remediation.rows {
            let _ = writeln!(out, "  {:<14} {:>5}", row.label, row.count);
        }
        if let Some(total) = remediation.total {
            let _ = writeln!(out, "  {:<14} {:>5}", "Total", total);
        }
    });

    section(&mut out, "Priority Findings", &view.priority_findings, |out, rows| {
        for row in rows {
            let _ = writeln!(
                out,
                "  [{:<8}] {}  {}",
                row.severity.as_str(),
                row.resource,
                row.issue
            );
        }
    });

    out
}

pub fn render_login_required(requested: Route) -> String {
    format!(
        "Sign in required to open {requested}.\nRun `dashboard sign-in --email <email> --password <password>` or `dashboard login --token <token>`.\n"
    )
}

pub fn render_unavailable(route: Route) -> String {
    format!("{route} has no terminal view; open the web dashboard for it.\n")
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
