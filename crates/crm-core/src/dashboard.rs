use serde::{Deserialize, Serialize};
use time::Date;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepartmentCounts {
    pub total: u64,
    pub active: u64,
    pub critical: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationCounts {
    pub total: u64,
    pub live: u64,
    pub integrating: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskCounts {
    pub high_risk: u64,
    pub blocked: u64,
    pub delayed: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentCounts {
    pub open: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementCounts {
    pub recent_activities: u64,
}

/// Headline counts shown on the landing page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardSummary {
    pub departments: DepartmentCounts,
    pub applications: ApplicationCounts,
    pub risk: RiskCounts,
    pub incidents: IncidentCounts,
    pub engagement: EngagementCounts,
}

/// First date counted as "recent" for engagement activity.
///
/// Through the 30th the window starts on the first of the current month; on
/// the 31st it collapses to the day itself.
#[must_use]
pub fn recent_activity_cutoff(today: Date) -> Date {
    if today.day() <= 30 {
        today.replace_day(1).unwrap_or(today)
    } else {
        today
    }
}
