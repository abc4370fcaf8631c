use serde::{Deserialize, Serialize};

use crate::{
    Application, Contact, CrmError, Department, EngagementActivity, Incident, IntegrationStatus,
};

/// Most recent activities included in an assistant context snapshot.
pub const CONTEXT_ACTIVITY_LIMIT: usize = 20;

/// Read-only picture of the whole store handed to the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub departments: Vec<Department>,
    pub applications: Vec<Application>,
    pub integrations: Vec<IntegrationStatus>,
    pub contacts: Vec<Contact>,
    pub recent_activities: Vec<EngagementActivity>,
    pub incidents: Vec<Incident>,
}

impl ContextSnapshot {
    /// Pretty-printed JSON embedded in the assistant's framing turn.
    ///
    /// # Errors
    /// Returns [`CrmError::Validation`] if a record fails to serialize.
    pub fn to_context_json(&self) -> Result<String, CrmError> {
        serde_json::to_string_pretty(self).map_err(|err| {
            CrmError::Validation(format!("failed to serialize context snapshot: {err}"))
        })
    }
}
