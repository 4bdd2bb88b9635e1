//! The dashboard page: six independent queries composed into one view.
//!
//! [`DashboardQueries`] holds one observer per widget. [`compose`] turns a
//! snapshot of their states into a [`DashboardView`] without touching the
//! network, so every arrival order (and every mix of failures) goes through
//! the same pure function. [`DashboardMount`] ties the two together for a
//! live screen.

use std::time::Duration;

use shared::{
    domain::{FindingId, Framework, RemediationStatus, Severity},
    protocol::{
        ControlCoverage, DashboardOverview, FindingsResponse, RemediationProgress, TopRisksResponse,
        TrendsResponse,
    },
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    api::ApiClient,
    error::FetchError,
    presentation::{
        coverage_fraction, format_timestamp, last_scan_text, percent_text, rank_priority_findings,
        remediation_tone, score_bar_width, score_text, severity_tone, trend_axis_label,
        FindingsChange, RiskBand, Tone, NO_PRIORITY_FINDINGS, NO_RECENT_ACTIVITY, NO_RISKS,
        NO_TREND_DATA,
    },
    query::{FetchState, QueryClient, QueryKey, QueryObserver, QueryOptions},
};

pub const OVERVIEW_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// `/findings` pages newest first, so the priority panel ranks a wider page
/// than it shows. Otherwise an older critical finding never reaches it.
pub const PRIORITY_FINDINGS_WINDOW: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSettings {
    pub overview_refetch_interval: Option<Duration>,
    pub trend_days: u32,
    pub top_risks_limit: u32,
    pub priority_findings_limit: u32,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub refetch_on_focus: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        let query = QueryOptions::default();
        Self {
            overview_refetch_interval: Some(OVERVIEW_REFETCH_INTERVAL),
            trend_days: 30,
            top_risks_limit: 5,
            priority_findings_limit: 5,
            retry_count: query.retry_count,
            retry_delay: query.retry_delay,
            refetch_on_focus: query.refetch_on_focus,
        }
    }
}

impl DashboardSettings {
    fn options(&self) -> QueryOptions {
        QueryOptions::default()
            .with_retry(self.retry_count, self.retry_delay)
            .with_refetch_on_focus(self.refetch_on_focus)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        vec![
            keys::overview(),
            keys::trends(self.trend_days),
            keys::control_coverage(),
            keys::top_risks(self.top_risks_limit),
            keys::remediation_progress(),
            keys::priority_findings(PRIORITY_FINDINGS_WINDOW),
        ]
    }
}

pub mod keys {
    use crate::query::QueryKey;

    pub fn overview() -> QueryKey {
        QueryKey::new(["dashboard", "overview"])
    }

    pub fn trends(days: u32) -> QueryKey {
        QueryKey::new(["dashboard", "trends"]).with_param("days", days)
    }

    pub fn control_coverage() -> QueryKey {
        QueryKey::new(["dashboard", "control-coverage"])
    }

    pub fn top_risks(limit: u32) -> QueryKey {
        QueryKey::new(["dashboard", "top-risks"]).with_param("limit", limit)
    }

    pub fn remediation_progress() -> QueryKey {
        QueryKey::new(["dashboard", "remediation-progress"])
    }

    pub fn priority_findings(limit: u32) -> QueryKey {
        QueryKey::new(["findings", "priority"]).with_param("limit", limit)
    }
}

pub struct DashboardQueries {
    pub overview: QueryObserver<DashboardOverview>,
    pub trends: QueryObserver<TrendsResponse>,
    pub control_coverage: QueryObserver<ControlCoverage>,
    pub top_risks: QueryObserver<TopRisksResponse>,
    pub remediation: QueryObserver<RemediationProgress>,
    pub priority_findings: QueryObserver<FindingsResponse>,
}

impl DashboardQueries {
    pub fn subscribe(client: &QueryClient, api: &ApiClient, settings: &DashboardSettings) -> Self {
        let options = settings.options();

        let overview = {
            let api = api.clone();
            client.subscribe(
                keys::overview(),
                move || {
                    let api = api.clone();
                    async move { api.overview().await }
                },
                options
                    .clone()
                    .with_refetch_interval(settings.overview_refetch_interval),
            )
        };

        let trends = {
            let api = api.clone();
            let days = settings.trend_days;
            client.subscribe(
                keys::trends(days),
                move || {
                    let api = api.clone();
                    async move { api.trends(days).await }
                },
                options.clone(),
            )
        };

        let control_coverage = {
            let api = api.clone();
            client.subscribe(
                keys::control_coverage(),
                move || {
                    let api = api.clone();
                    async move { api.control_coverage().await }
                },
                options.clone(),
            )
        };

        let top_risks = {
            let api = api.clone();
            let limit = settings.top_risks_limit;
            client.subscribe(
                keys::top_risks(limit),
                move || {
                    let api = api.clone();
                    async move { api.top_risks(limit).await }
                },
                options.clone(),
            )
        };

        let remediation = {
            let api = api.clone();
            client.subscribe(
                keys::remediation_progress(),
                move || {
                    let api = api.clone();
                    async move { api.remediation_progress().await }
                },
                options.clone(),
            )
        };

        let priority_findings = {
            let api = api.clone();
            client.subscribe(
                keys::priority_findings(PRIORITY_FINDINGS_WINDOW),
                move || {
                    let api = api.clone();
                    async move { api.open_findings(PRIORITY_FINDINGS_WINDOW).await }
                },
                options,
            )
        };

        Self {
            overview,
            trends,
            control_coverage,
            top_risks,
            remediation,
            priority_findings,
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            overview: self.overview.state(),
            trends: self.trends.state(),
            control_coverage: self.control_coverage.state(),
            top_risks: self.top_risks.state(),
            remediation: self.remediation.state(),
            priority_findings: self.priority_findings.state(),
        }
    }

    /// Waits until any widget's state changes. False once nothing can
    /// change any more.
    pub async fn changed(&mut self) -> bool {
        tokio::select! {
            state = self.overview.changed() => state.is_some(),
            state = self.trends.changed() => state.is_some(),
            state = self.control_coverage.changed() => state.is_some(),
            state = self.top_risks.changed() => state.is_some(),
            state = self.remediation.changed() => state.is_some(),
            state = self.priority_findings.changed() => state.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub overview: FetchState<DashboardOverview>,
    pub trends: FetchState<TrendsResponse>,
    pub control_coverage: FetchState<ControlCoverage>,
    pub top_risks: FetchState<TopRisksResponse>,
    pub remediation: FetchState<RemediationProgress>,
    pub priority_findings: FetchState<FindingsResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelContent<T> {
    Loading,
    Empty(&'static str),
    Ready(T),
}

/// One widget. A failed fetch with nothing cached still gets content,
/// derived from the payload's zero value, next to the error.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel<T> {
    pub content: PanelContent<T>,
    pub error: Option<FetchError>,
    pub refreshing: bool,
}

impl<T> Panel<T> {
    fn from_state<P: Default>(
        state: &FetchState<P>,
        derive: impl FnOnce(&P) -> PanelContent<T>,
    ) -> Self {
        let content = match (&state.data, state.failure()) {
            (Some(data), _) => derive(data.as_ref()),
            (None, Some(_)) => derive(&P::default()),
            (None, None) => PanelContent::Loading,
        };
        Self {
            content,
            error: state.failure().cloned(),
            refreshing: state.is_refreshing(),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.content, PanelContent::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match &self.content {
            PanelContent::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn empty_message(&self) -> Option<&'static str> {
        match self.content {
            PanelContent::Empty(message) => Some(message),
            _ => None,
        }
    }

    fn is_settled(&self) -> bool {
        !self.is_loading() && !self.refreshing
    }
}

fn non_empty<T>(rows: Vec<T>, empty: &'static str) -> PanelContent<Vec<T>> {
    if rows.is_empty() {
        PanelContent::Empty(empty)
    } else {
        PanelContent::Ready(rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeroView {
    pub score: i64,
    pub score_text: String,
    pub band: RiskBand,
    pub bar_width: u8,
    pub severity_counts: Vec<(Severity, u64)>,
    pub last_scan: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsView {
    pub risk_score_text: String,
    pub band: RiskBand,
    pub total_findings: u64,
    pub findings_change: Option<FindingsChange>,
    pub compliance_rate: String,
    pub last_scan: String,
    pub aws_accounts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskRow {
    pub issue: String,
    pub severity: Severity,
    pub tone: Tone,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendRow {
    pub label: String,
    pub risk_score: i64,
    pub total_findings: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    pub kind: String,
    pub description: String,
    pub when: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRow {
    pub framework: Framework,
    pub fraction: String,
    pub percentage: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemediationRow {
    pub label: String,
    pub count: u64,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemediationView {
    pub rows: Vec<RemediationRow>,
    /// Absent when the backend reported no counts at all.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindingRow {
    pub id: FindingId,
    pub resource: String,
    pub issue: String,
    pub severity: Severity,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub hero: Panel<HeroView>,
    pub metrics: Panel<MetricsView>,
    pub top_risks: Panel<Vec<RiskRow>>,
    pub trends: Panel<Vec<TrendRow>>,
    pub recent_activity: Panel<Vec<ActivityRow>>,
    pub control_coverage: Panel<Vec<CoverageRow>>,
    pub remediation: Panel<RemediationView>,
    pub priority_findings: Panel<Vec<FindingRow>>,
}

impl DashboardView {
    /// Every widget has content and nothing is refreshing.
    pub fn is_settled(&self) -> bool {
        self.hero.is_settled()
            && self.metrics.is_settled()
            && self.top_risks.is_settled()
            && self.trends.is_settled()
            && self.recent_activity.is_settled()
            && self.control_coverage.is_settled()
            && self.remediation.is_settled()
            && self.priority_findings.is_settled()
    }

    pub fn errors(&self) -> Vec<(&'static str, &FetchError)> {
        [
            ("overview", self.hero.error.as_ref()),
            ("trends", self.trends.error.as_ref()),
            ("top risks", self.top_risks.error.as_ref()),
            ("control coverage", self.control_coverage.error.as_ref()),
            ("remediation", self.remediation.error.as_ref()),
            ("priority findings", self.priority_findings.error.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, err)| err.map(|err| (name, err)))
        .collect()
    }
}

fn hero(overview: &DashboardOverview) -> HeroView {
    let breakdown = &overview.severity_breakdown;
    HeroView {
        score: overview.risk_score,
        score_text: score_text(overview.risk_score),
        band: RiskBand::from_score(overview.risk_score),
        bar_width: score_bar_width(overview.risk_score),
        severity_counts: [Severity::Critical, Severity::High, Severity::Medium]
            .into_iter()
            .map(|severity| (severity, breakdown.count(severity)))
            .collect(),
        last_scan: last_scan_text(overview.last_scan),
    }
}

fn metrics(overview: &DashboardOverview, trends: Option<&TrendsResponse>) -> MetricsView {
    MetricsView {
        risk_score_text: score_text(overview.risk_score),
        band: RiskBand::from_score(overview.risk_score),
        total_findings: overview.total_findings,
        findings_change: trends.and_then(|t| FindingsChange::from_trends(&t.trends)),
        compliance_rate: percent_text(overview.compliance_rate),
        last_scan: last_scan_text(overview.last_scan),
        aws_accounts: overview.aws_accounts_count,
    }
}

fn remediation(progress: &RemediationProgress) -> RemediationView {
    RemediationView {
        rows: RemediationStatus::ALL
            .into_iter()
            .map(|status| RemediationRow {
                label: status.label().to_string(),
                count: progress.count(status),
                tone: remediation_tone(status),
            })
            .collect(),
        total: progress.total(),
    }
}

/// Derives the whole screen from a snapshot. Pure.
pub fn compose(snapshot: &DashboardSnapshot, settings: &DashboardSettings) -> DashboardView {
    let trends_data = snapshot.trends.data.as_deref();

    DashboardView {
        hero: Panel::from_state(&snapshot.overview, |o| PanelContent::Ready(hero(o))),
        metrics: Panel::from_state(&snapshot.overview, |o| {
            PanelContent::Ready(metrics(o, trends_data))
        }),
        top_risks: Panel::from_state(&snapshot.top_risks, |r: &TopRisksResponse| {
            let rows = r
                .risks
                .iter()
                .map(|risk| RiskRow {
                    issue: risk.issue.clone(),
                    severity: risk.severity,
                    tone: severity_tone(risk.severity),
                    count: risk.count,
                })
                .collect();
            non_empty(rows, NO_RISKS)
        }),
        trends: Panel::from_state(&snapshot.trends, |t: &TrendsResponse| {
            let rows = t
                .trends
                .iter()
                .map(|point| TrendRow {
                    label: trend_axis_label(point.date),
                    risk_score: point.risk_score,
                    total_findings: point.total_findings,
                })
                .collect();
            non_empty(rows, NO_TREND_DATA)
        }),
        recent_activity: Panel::from_state(&snapshot.overview, |o: &DashboardOverview| {
            let rows = o
                .recent_activity
                .iter()
                .map(|item| ActivityRow {
                    kind: item.kind.clone(),
                    description: item.description.clone(),
                    when: item.timestamp.map(format_timestamp).unwrap_or_default(),
                })
                .collect();
            non_empty(rows, NO_RECENT_ACTIVITY)
        }),
        control_coverage: Panel::from_state(&snapshot.control_coverage, |c: &ControlCoverage| {
            PanelContent::Ready(
                Framework::ALL
                    .into_iter()
                    .map(|framework| {
                        let coverage = c.get(framework);
                        CoverageRow {
                            framework,
                            fraction: coverage_fraction(&coverage),
                            percentage: percent_text(coverage.percentage),
                        }
                    })
                    .collect(),
            )
        }),
        remediation: Panel::from_state(&snapshot.remediation, |p| {
            PanelContent::Ready(remediation(p))
        }),
        priority_findings: Panel::from_state(&snapshot.priority_findings, |f: &FindingsResponse| {
            let limit = settings.priority_findings_limit as usize;
            let rows = rank_priority_findings(&f.findings, limit)
                .into_iter()
                .map(|finding| FindingRow {
                    id: finding.id,
                    resource: finding
                        .resource_name
                        .unwrap_or_else(|| finding.resource_type.clone()),
                    issue: finding.issue,
                    severity: finding.severity,
                    tone: severity_tone(finding.severity),
                })
                .collect();
            non_empty(rows, NO_PRIORITY_FINDINGS)
        }),
    }
}

/// A mounted dashboard. Recomposes on every widget change until dropped;
/// dropping it stops the refetch timers and the recompose task, so results
/// arriving afterwards only land in the shared cache.
pub struct DashboardMount {
    view: watch::Receiver<DashboardView>,
    client: QueryClient,
    keys: Vec<QueryKey>,
    task: JoinHandle<()>,
}

impl DashboardMount {
    pub fn mount(client: &QueryClient, api: &ApiClient, settings: DashboardSettings) -> Self {
        let mut queries = DashboardQueries::subscribe(client, api, &settings);
        let (tx, view) = watch::channel(compose(&queries.snapshot(), &settings));
        let keys = settings.keys();
        info!(widgets = keys.len(), "dashboard: mounted");

        let task = tokio::spawn(async move {
            while queries.changed().await {
                let next = compose(&queries.snapshot(), &settings);
                if tx.send(next).is_err() {
                    break;
                }
            }
            debug!("dashboard: update task finished");
        });

        Self {
            view,
            client: client.clone(),
            keys,
            task,
        }
    }

    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Next recomposed view; `None` once the update task has stopped.
    pub async fn next_view(&mut self) -> Option<DashboardView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    /// Waits until every widget has settled.
    pub async fn settled(&mut self) -> Option<DashboardView> {
        let view = self.view.wait_for(DashboardView::is_settled).await.ok()?;
        Some(view.clone())
    }

    pub fn subscribe_view(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    /// Manual refresh of every widget.
    pub fn scan_now(&self) {
        info!("dashboard: manual refresh requested");
        for key in &self.keys {
            self.client.refetch(key);
        }
    }
}

impl Drop for DashboardMount {
    fn drop(&mut self) {
        self.task.abort();
        debug!("dashboard: unmounted");
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
