use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(CompanyId);
id_newtype!(ScanId);
id_newtype!(FindingId);

/// Ordinal finding severity. Anything the backend sends outside the four
/// known levels lands in `Unknown` instead of failing the whole payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[serde(other)]
    Unknown,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemediationStatus {
    Open,
    Assigned,
    InProgress,
    Resolved,
    AcceptedRisk,
}

impl RemediationStatus {
    pub const ALL: [RemediationStatus; 5] = [
        RemediationStatus::Open,
        RemediationStatus::Assigned,
        RemediationStatus::InProgress,
        RemediationStatus::Resolved,
        RemediationStatus::AcceptedRisk,
    ];

    /// Key used by the remediation-progress endpoint.
    pub fn key(self) -> &'static str {
        match self {
            RemediationStatus::Open => "open",
            RemediationStatus::Assigned => "assigned",
            RemediationStatus::InProgress => "in_progress",
            RemediationStatus::Resolved => "resolved",
            RemediationStatus::AcceptedRisk => "accepted_risk",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RemediationStatus::Open => "Open",
            RemediationStatus::Assigned => "Assigned",
            RemediationStatus::InProgress => "In Progress",
            RemediationStatus::Resolved => "Resolved",
            RemediationStatus::AcceptedRisk => "Accepted Risk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Framework {
    Iso27001,
    Iso27701,
    Iso42001,
}

impl Framework {
    pub const ALL: [Framework; 3] = [Framework::Iso27001, Framework::Iso27701, Framework::Iso42001];

    pub fn id(self) -> &'static str {
        match self {
            Framework::Iso27001 => "iso_27001",
            Framework::Iso27701 => "iso_27701",
            Framework::Iso42001 => "iso_42001",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Framework::Iso27001 => "ISO 27001",
            Framework::Iso27701 => "ISO 27701",
            Framework::Iso42001 => "ISO 42001",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserRef {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}
