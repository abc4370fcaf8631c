use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::timefmt::{iso_date, lenient_date, rfc3339};
use crate::{
    require_text, ActivityId, ActivityType, ApplicationId, ApplicationStatus, ContactId,
    ContactRole, CrmError, DepartmentId, DepartmentStatus, DepartmentTier, Environment,
    IncidentId, IncidentSeverity, IncidentStatus, IntegrationHealth, IntegrationId,
    IntegrationStage, RiskLevel,
};

/// Stored when a new application does not name its authentication method.
pub const DEFAULT_AUTH_TYPE: &str = "OIDC";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Department {
    pub department_id: DepartmentId,
    pub name: String,
    pub acronym: Option<String>,
    pub tier: DepartmentTier,
    pub status: DepartmentStatus,
    pub owner_team: Option<String>,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Derived at read time.
    pub app_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    pub app_id: ApplicationId,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub app_name: String,
    pub environment: Environment,
    /// Comma-joined when several methods were supplied.
    pub auth_type: String,
    #[serde(with = "iso_date::option")]
    pub go_live_date: Option<Date>,
    pub status: ApplicationStatus,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrationStatus {
    pub integration_id: IntegrationId,
    pub app_id: ApplicationId,
    pub app_name: String,
    pub department_name: String,
    pub stage: IntegrationStage,
    pub status: IntegrationHealth,
    pub risk_level: RiskLevel,
    #[serde(with = "rfc3339")]
    pub last_updated: OffsetDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub contact_id: ContactId,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub name: String,
    pub role: Option<ContactRole>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active_flag: bool,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementActivity {
    pub activity_id: ActivityId,
    pub department_id: DepartmentId,
    pub department_name: String,
    pub app_id: Option<ApplicationId>,
    pub app_name: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<ActivityType>,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub summary: Option<String>,
    pub next_action: Option<String>,
    pub owner: Option<String>,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub incident_id: IncidentId,
    pub app_id: ApplicationId,
    pub app_name: String,
    pub department_name: String,
    pub severity: Option<IncidentSeverity>,
    pub status: IncidentStatus,
    pub description: Option<String>,
    pub root_cause: Option<String>,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
}

/// Authentication method(s) as submitted: a single label or a list of labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthTypeInput {
    Single(String),
    Multiple(Vec<String>),
}

impl AuthTypeInput {
    /// Canonical stored form: lists are joined with `,` in input order.
    #[must_use]
    pub fn to_stored(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Multiple(values) => values.join(","),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewDepartment {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "short_name")]
    pub acronym: Option<String>,
    #[serde(default)]
    pub tier: Option<DepartmentTier>,
    #[serde(default)]
    pub status: Option<DepartmentStatus>,
    #[serde(default)]
    pub owner_team: Option<String>,
}

impl NewDepartment {
    /// # Errors
    /// Returns [`CrmError::Validation`] when `name` is blank.
    pub fn validate(&self) -> Result<(), CrmError> {
        require_text("name", &self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewApplication {
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub auth_type: Option<AuthTypeInput>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub go_live_date: Option<Date>,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
}

impl NewApplication {
    /// Returns the owning department once required fields are known present.
    ///
    /// # Errors
    /// Returns [`CrmError::Validation`] when `department_id` or `app_name`
    /// is missing.
    pub fn validate(&self) -> Result<DepartmentId, CrmError> {
        let department_id = self
            .department_id
            .ok_or_else(|| CrmError::Validation("department_id must be provided".to_string()))?;
        require_text("app_name", &self.app_name)?;
        Ok(department_id)
    }

    #[must_use]
    pub fn stored_auth_type(&self) -> String {
        self.auth_type
            .as_ref()
            .map_or_else(|| DEFAULT_AUTH_TYPE.to_string(), AuthTypeInput::to_stored)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewContact {
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<ContactRole>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub active_flag: Option<bool>,
}

impl NewContact {
    /// # Errors
    /// Returns [`CrmError::Validation`] when `department_id` or `name` is
    /// missing.
    pub fn validate(&self) -> Result<DepartmentId, CrmError> {
        let department_id = self
            .department_id
            .ok_or_else(|| CrmError::Validation("department_id must be provided".to_string()))?;
        require_text("name", &self.name)?;
        Ok(department_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewActivity {
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub app_id: Option<ApplicationId>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<ActivityType>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date: Option<Date>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl NewActivity {
    /// # Errors
    /// Returns [`CrmError::Validation`] when `department_id` is missing.
    pub fn validate(&self) -> Result<DepartmentId, CrmError> {
        self.department_id
            .ok_or_else(|| CrmError::Validation("department_id must be provided".to_string()))
    }

    /// The activity date, falling back to `today` when absent or malformed.
    #[must_use]
    pub fn date_or(&self, today: Date) -> Date {
        self.date.unwrap_or(today)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewIncident {
    #[serde(default)]
    pub app_id: Option<ApplicationId>,
    #[serde(default)]
    pub severity: Option<IncidentSeverity>,
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
}

impl NewIncident {
    /// # Errors
    /// Returns [`CrmError::Validation`] when `app_id` is missing.
    pub fn validate(&self) -> Result<ApplicationId, CrmError> {
        self.app_id
            .ok_or_else(|| CrmError::Validation("app_id must be provided".to_string()))
    }

    /// Incidents created directly in a terminal status are stamped resolved
    /// at creation.
    #[must_use]
    pub fn resolved_at(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        self.status
            .unwrap_or_default()
            .is_terminal()
            .then_some(now)
    }
}
