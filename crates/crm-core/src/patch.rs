//! Partial updates. A field missing from the payload leaves the stored value
//! untouched; nullable fields use `Option<Option<T>>` so an explicit `null`
//! clears the value.

#![allow(clippy::option_option)]

use serde::Deserialize;
use time::{Date, OffsetDateTime};

use crate::timefmt::{present, present_lenient_date};
use crate::{
    require_text, Application, ApplicationStatus, AuthTypeInput, Contact, ContactRole, CrmError,
    Department, DepartmentId, DepartmentStatus, DepartmentTier, Environment, Incident,
    IncidentSeverity, IncidentStatus, IntegrationHealth, IntegrationStage, IntegrationStatus,
    RiskLevel,
};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DepartmentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "short_name", deserialize_with = "present")]
    pub acronym: Option<Option<String>>,
    #[serde(default)]
    pub tier: Option<DepartmentTier>,
    #[serde(default)]
    pub status: Option<DepartmentStatus>,
    #[serde(default, deserialize_with = "present")]
    pub owner_team: Option<Option<String>>,
}

impl DepartmentPatch {
    /// # Errors
    /// Returns [`CrmError::Validation`] when a supplied `name` is blank.
    pub fn apply_to(
        &self,
        department: &mut Department,
        now: OffsetDateTime,
    ) -> Result<(), CrmError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
            department.name.clone_from(name);
        }
        if let Some(acronym) = &self.acronym {
            department.acronym.clone_from(acronym);
        }
        if let Some(tier) = self.tier {
            department.tier = tier;
        }
        if let Some(status) = self.status {
            department.status = status;
        }
        if let Some(owner_team) = &self.owner_team {
            department.owner_team.clone_from(owner_team);
        }
        department.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ApplicationPatch {
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub auth_type: Option<AuthTypeInput>,
    #[serde(default, deserialize_with = "present_lenient_date")]
    pub go_live_date: Option<Option<Date>>,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
}

impl ApplicationPatch {
    /// Merges the patch. Re-parenting only updates the id; the caller checks
    /// that the new department exists and refreshes `department_name`.
    ///
    /// # Errors
    /// Returns [`CrmError::Validation`] when a supplied `app_name` is blank.
    pub fn apply_to(
        &self,
        application: &mut Application,
        now: OffsetDateTime,
    ) -> Result<(), CrmError> {
        if let Some(department_id) = self.department_id {
            application.department_id = department_id;
        }
        if let Some(app_name) = &self.app_name {
            require_text("app_name", app_name)?;
            application.app_name.clone_from(app_name);
        }
        if let Some(environment) = self.environment {
            application.environment = environment;
        }
        if let Some(auth_type) = &self.auth_type {
            application.auth_type = auth_type.to_stored();
        }
        if let Some(go_live_date) = self.go_live_date {
            application.go_live_date = go_live_date;
        }
        if let Some(status) = self.status {
            application.status = status;
        }
        application.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct IntegrationPatch {
    #[serde(default)]
    pub stage: Option<IntegrationStage>,
    #[serde(default)]
    pub status: Option<IntegrationHealth>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

impl IntegrationPatch {
    /// Every update refreshes `last_updated`, even an empty one.
    pub fn apply_to(&self, integration: &mut IntegrationStatus, now: OffsetDateTime) {
        if let Some(stage) = self.stage {
            integration.stage = stage;
        }
        if let Some(status) = self.status {
            integration.status = status;
        }
        if let Some(risk_level) = self.risk_level {
            integration.risk_level = risk_level;
        }
        if let Some(notes) = &self.notes {
            integration.notes.clone_from(notes);
        }
        integration.last_updated = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ContactPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub role: Option<Option<ContactRole>>,
    #[serde(default, deserialize_with = "present")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default)]
    pub active_flag: Option<bool>,
}

impl ContactPatch {
    /// # Errors
    /// Returns [`CrmError::Validation`] when a supplied `name` is blank.
    pub fn apply_to(&self, contact: &mut Contact) -> Result<(), CrmError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
            contact.name.clone_from(name);
        }
        if let Some(role) = self.role {
            contact.role = role;
        }
        if let Some(email) = &self.email {
            contact.email.clone_from(email);
        }
        if let Some(phone) = &self.phone {
            contact.phone.clone_from(phone);
        }
        if let Some(active_flag) = self.active_flag {
            contact.active_flag = active_flag;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct IncidentPatch {
    #[serde(default, deserialize_with = "present")]
    pub severity: Option<Option<IncidentSeverity>>,
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub root_cause: Option<Option<String>>,
}

impl IncidentPatch {
    /// `resolved_at` is stamped the first time the incident enters a terminal
    /// status and is never overwritten afterwards.
    pub fn apply_to(&self, incident: &mut Incident, now: OffsetDateTime) {
        if let Some(severity) = self.severity {
            incident.severity = severity;
        }
        if let Some(status) = self.status {
            incident.status = status;
            if status.is_terminal() && incident.resolved_at.is_none() {
                incident.resolved_at = Some(now);
            }
        }
        if let Some(description) = &self.description {
            incident.description.clone_from(description);
        }
        if let Some(root_cause) = &self.root_cause {
            incident.root_cause.clone_from(root_cause);
        }
    }
}
