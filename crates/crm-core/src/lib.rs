//! Domain types for the department CRM.
//!
//! Everything in this crate is pure: records, create inputs, partial-update
//! patches and their merge rules, the tag catalog, the dashboard window rule,
//! and the context snapshot shape. Persistence lives in `crm-store-sqlite`.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use ulid::Ulid;

mod dashboard;
mod enums;
mod patch;
mod records;
mod snapshot;
mod tags;
pub mod timefmt;

pub use dashboard::{
    recent_activity_cutoff, ApplicationCounts, DashboardSummary, DepartmentCounts,
    EngagementCounts, IncidentCounts, RiskCounts,
};
pub use enums::{
    ActivityType, ApplicationStatus, ContactRole, DepartmentStatus, DepartmentTier, Environment,
    IncidentSeverity, IncidentStatus, IntegrationHealth, IntegrationStage, RiskLevel,
};
pub use patch::{ApplicationPatch, ContactPatch, DepartmentPatch, IncidentPatch, IntegrationPatch};
pub use records::{
    Application, AuthTypeInput, Contact, Department, EngagementActivity, Incident,
    IntegrationStatus, NewActivity, NewApplication, NewContact, NewDepartment, NewIncident,
    DEFAULT_AUTH_TYPE,
};
pub use snapshot::{ContextSnapshot, CONTEXT_ACTIVITY_LIMIT};
pub use tags::{default_tag_catalog, Tag, TagCategory, TagCategoryInput, TagSeed};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CrmError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl CrmError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident => $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parses an identifier taken from a request path.
            ///
            /// # Errors
            /// A malformed value can never name a stored record, so it is
            /// reported as [`CrmError::NotFound`].
            pub fn parse(raw: &str) -> Result<Self, CrmError> {
                Ulid::from_string(raw.trim())
                    .map(Self)
                    .map_err(|_| CrmError::not_found($entity, raw))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(DepartmentId => "Department");
entity_id!(ApplicationId => "Application");
entity_id!(IntegrationId => "Integration");
entity_id!(ContactId => "Contact");
entity_id!(ActivityId => "Activity");
entity_id!(IncidentId => "Incident");
entity_id!(
    /// Identifies a tag category in the registry.
    TagCategoryId => "Tag category"
);
entity_id!(TagId => "Tag");

/// Parses an RFC3339 timestamp and normalizes it to UTC.
///
/// # Errors
/// Returns [`CrmError::Validation`] when the value is not RFC3339.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, CrmError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
        .map_err(|err| CrmError::Validation(format!("invalid RFC3339 timestamp: {err}")))
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`CrmError::Validation`] if formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, CrmError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| CrmError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

/// Parses a calendar date in `YYYY-MM-DD` form. Anything else yields `None`.
#[must_use]
pub fn parse_iso_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Formats a calendar date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`CrmError::Validation`] if formatting fails.
pub fn format_iso_date(value: Date) -> Result<String, CrmError> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| CrmError::Validation(format!("failed to format date: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn today_utc() -> Date {
    now_utc().date()
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), CrmError> {
    if value.trim().is_empty() {
        return Err(CrmError::Validation(format!("{field} must be provided")));
    }
    Ok(())
}
