use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::timefmt::rfc3339;
use crate::{require_text, CrmError, TagCategoryId, TagId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagCategory {
    pub category_id: TagCategoryId,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub entity_type: String,
    pub field_name: String,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    pub tag_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub tag_id: TagId,
    pub category_id: TagCategoryId,
    pub category_name: String,
    pub value: String,
    pub label: String,
    pub color: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
    #[serde(with = "rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagSeed {
    pub value: String,
    pub label: String,
    pub color: Option<String>,
    pub sort_order: i64,
}

/// A category together with the tags it starts with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagCategoryInput {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub entity_type: String,
    pub field_name: String,
    #[serde(default)]
    pub default_tags: Vec<TagSeed>,
}

impl TagCategoryInput {
    /// # Errors
    /// Returns [`CrmError::Validation`] for blank identifiers or duplicate
    /// tag values within the category.
    pub fn validate(&self) -> Result<(), CrmError> {
        require_text("name", &self.name)?;
        require_text("display_name", &self.display_name)?;
        require_text("entity_type", &self.entity_type)?;
        require_text("field_name", &self.field_name)?;

        let mut seen = std::collections::BTreeSet::new();
        for tag in &self.default_tags {
            require_text("tag value", &tag.value)?;
            if !seen.insert(tag.value.as_str()) {
                return Err(CrmError::Validation(format!(
                    "duplicate tag value '{}' in category '{}'",
                    tag.value, self.name
                )));
            }
        }
        Ok(())
    }
}

type SeedRow = (&'static str, &'static str, &'static str);

const CATALOG: &[(&str, &str, &str, &str, &str, &[SeedRow])] = &[
    (
        "department_tier",
        "Department Tier",
        "Service tier of the department",
        "department",
        "tier",
        &[("critical", "Critical", "#E74C3C"), ("standard", "Standard", "#3498DB")],
    ),
    (
        "department_status",
        "Department Status",
        "Engagement status of the department",
        "department",
        "status",
        &[("active", "Active", "#27AE60"), ("inactive", "Inactive", "#95A5A6")],
    ),
    (
        "department_owner_team",
        "Owner Team",
        "Client success team responsible for the department",
        "department",
        "owner_team",
        &[
            ("Client Success Alpha", "Client Success Alpha", "#9B59B6"),
            ("Client Success Beta", "Client Success Beta", "#3498DB"),
            ("Client Success Gamma", "Client Success Gamma", "#1ABC9C"),
        ],
    ),
    (
        "application_environment",
        "Environment",
        "Deployment environment of the application",
        "application",
        "environment",
        &[("prod", "Production", "#27AE60"), ("test", "Test", "#F39C12")],
    ),
    (
        "application_auth_type",
        "Authentication Type",
        "Sign-in methods offered by the application",
        "application",
        "auth_type",
        &[
            ("GC Key", "GC Key", "#3498DB"),
            ("Interact Sign In", "Interact Sign In", "#9B59B6"),
            ("GCCF Consolidator", "GCCF Consolidator", "#95A5A6"),
        ],
    ),
    (
        "application_status",
        "Application Status",
        "Lifecycle status of the application",
        "application",
        "status",
        &[
            ("live", "Live", "#27AE60"),
            ("integrating", "Integrating", "#F39C12"),
            ("deprecated", "Deprecated", "#95A5A6"),
        ],
    ),
    (
        "integration_stage",
        "Integration Stage",
        "Onboarding stage of an integration",
        "integration",
        "stage",
        &[
            ("intake", "Intake", "#3498DB"),
            ("design", "Design", "#9B59B6"),
            ("implementation", "Implementation", "#F39C12"),
            ("testing", "Testing", "#E67E22"),
            ("production", "Production", "#27AE60"),
        ],
    ),
    (
        "contact_role",
        "Contact Role",
        "Responsibility of a department contact",
        "contact",
        "role",
        &[
            ("business", "Business", "#3498DB"),
            ("technical", "Technical", "#9B59B6"),
            ("security", "Security", "#E74C3C"),
        ],
    ),
    (
        "activity_type",
        "Activity Type",
        "Kind of engagement activity",
        "activity",
        "type",
        &[
            ("meeting", "Meeting", "#3498DB"),
            ("email", "Email", "#1ABC9C"),
            ("workshop", "Workshop", "#9B59B6"),
            ("incident", "Incident", "#E74C3C"),
        ],
    ),
];

/// Categories and tags installed into an empty registry.
#[must_use]
pub fn default_tag_catalog() -> Vec<TagCategoryInput> {
    CATALOG
        .iter()
        .map(|(name, display_name, description, entity_type, field_name, seeds)| TagCategoryInput {
            name: (*name).to_string(),
            display_name: (*display_name).to_string(),
            description: Some((*description).to_string()),
            entity_type: (*entity_type).to_string(),
            field_name: (*field_name).to_string(),
            default_tags: seeds
                .iter()
                .zip(1_i64..)
                .map(|((value, label, color), sort_order)| TagSeed {
                    value: (*value).to_string(),
                    label: (*label).to_string(),
                    color: Some((*color).to_string()),
                    sort_order,
                })
                .collect(),
        })
        .collect()
}
