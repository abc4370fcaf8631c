use anyhow::{Context, Result};
use crm_core::{
    default_tag_catalog, now_utc, CrmError, Tag, TagCategory, TagCategoryId, TagCategoryInput,
    TagId,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::{
    bool_to_sql, collect_rows, get_count, get_timestamp, get_ulid, require_row, timestamp,
    SqliteCrmStore,
};

const CATEGORY_SELECT: &str = "SELECT
        c.category_id, c.name, c.display_name, c.description, c.entity_type, c.field_name,
        c.created_at,
        (SELECT COUNT(*) FROM tags t WHERE t.category_id = c.category_id)
     FROM tag_categories c";

const TAG_SELECT: &str = "SELECT
        t.tag_id, t.category_id, c.name, t.value, t.label, t.color, t.is_active, t.sort_order,
        t.created_at, t.updated_at
     FROM tags t
     JOIN tag_categories c ON c.category_id = t.category_id";

impl SqliteCrmStore {
    /// Registers one category with its default tags.
    pub fn register_category(&mut self, input: &TagCategoryInput) -> Result<TagCategory> {
        input.validate()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start tag category transaction")?;
        let category_id = insert_category(&tx, input)?;
        tx.commit().context("failed to commit tag category")?;

        tracing::debug!(%category_id, name = %input.name, "tag category registered");
        self.get_tag_category(category_id)
    }

    /// Installs the default catalog when the registry is empty. Returns
    /// whether anything was written; a registry with any category is left
    /// alone.
    pub fn seed_default_tags(&mut self) -> Result<bool> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tag_categories", [], |row| row.get(0))
            .context("failed to count tag categories")?;
        if existing > 0 {
            tracing::debug!(existing, "tag registry already populated; seed skipped");
            return Ok(false);
        }

        let catalog = default_tag_catalog();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start tag seed transaction")?;
        for category in &catalog {
            category.validate()?;
            insert_category(&tx, category)?;
        }
        tx.commit().context("failed to commit tag seed")?;

        tracing::info!(categories = catalog.len(), "tag registry seeded");
        Ok(true)
    }

    pub fn list_tag_categories(&self) -> Result<Vec<TagCategory>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CATEGORY_SELECT} ORDER BY c.name ASC"))?;
        let rows = stmt.query_map([], parse_category_row)?;
        collect_rows(rows)
    }

    pub fn get_tag_category(&self, category_id: TagCategoryId) -> Result<TagCategory> {
        self.conn
            .query_row(
                &format!("{CATEGORY_SELECT} WHERE c.category_id = ?1"),
                params![category_id.to_string()],
                parse_category_row,
            )
            .optional()
            .context("failed to load tag category")?
            .ok_or_else(|| CrmError::not_found("Tag category", category_id).into())
    }

    /// Tags of one category ordered by their sort key, then value.
    pub fn list_tags(&self, category_id: TagCategoryId) -> Result<Vec<Tag>> {
        let id = category_id.to_string();
        require_row(
            &self.conn,
            "SELECT 1 FROM tag_categories WHERE category_id = ?1",
            "Tag category",
            &id,
        )?;
        let mut stmt = self.conn.prepare(&format!(
            "{TAG_SELECT} WHERE t.category_id = ?1 ORDER BY t.sort_order ASC, t.value ASC"
        ))?;
        let rows = stmt.query_map(params![id], parse_tag_row)?;
        collect_rows(rows)
    }
}

fn insert_category(conn: &Connection, input: &TagCategoryInput) -> Result<TagCategoryId> {
    let category_id = TagCategoryId::new();
    let now = timestamp(now_utc())?;

    conn.execute(
        "INSERT INTO tag_categories(
            category_id, name, display_name, description, entity_type, field_name, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            category_id.to_string(),
            input.name,
            input.display_name,
            input.description,
            input.entity_type,
            input.field_name,
            now,
        ],
    )
    .with_context(|| format!("failed to insert tag category {}", input.name))?;

    for tag in &input.default_tags {
        conn.execute(
            "INSERT INTO tags(
                tag_id, category_id, value, label, color, is_active, sort_order, created_at,
                updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                TagId::new().to_string(),
                category_id.to_string(),
                tag.value,
                tag.label,
                tag.color,
                bool_to_sql(true),
                tag.sort_order,
                now,
            ],
        )
        .with_context(|| format!("failed to insert tag {} in {}", tag.value, input.name))?;
    }

    Ok(category_id)
}

fn parse_category_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TagCategory> {
    Ok(TagCategory {
        category_id: TagCategoryId(get_ulid(row, 0)?),
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        entity_type: row.get(4)?,
        field_name: row.get(5)?,
        created_at: get_timestamp(row, 6)?,
        tag_count: get_count(row, 7)?,
    })
}

fn parse_tag_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    let is_active: i64 = row.get(6)?;
    Ok(Tag {
        tag_id: TagId(get_ulid(row, 0)?),
        category_id: TagCategoryId(get_ulid(row, 1)?),
        category_name: row.get(2)?,
        value: row.get(3)?,
        label: row.get(4)?,
        color: row.get(5)?,
        is_active: is_active != 0,
        sort_order: row.get(7)?,
        created_at: get_timestamp(row, 8)?,
        updated_at: get_timestamp(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{count, fixture_store, must};
    use crm_core::TagSeed;

    fn category_named(store: &SqliteCrmStore, name: &str) -> TagCategory {
        match must(store.list_tag_categories())
            .into_iter()
            .find(|category| category.name == name)
        {
            Some(category) => category,
            None => panic!("missing category {name}"),
        }
    }

    #[test]
    fn seeded_categories_expose_tag_counts() {
        let store = fixture_store();
        let stages = category_named(&store, "integration_stage");
        assert_eq!(stages.tag_count, 5);
        assert_eq!(stages.entity_type, "integration");
        assert_eq!(stages.field_name, "stage");
    }

    #[test]
    fn tags_are_ordered_by_sort_key_not_insertion() {
        let mut store = fixture_store();
        let category = must(store.register_category(&TagCategoryInput {
            name: "incident_severity".to_string(),
            display_name: "Incident Severity".to_string(),
            description: None,
            entity_type: "incident".to_string(),
            field_name: "severity".to_string(),
            default_tags: vec![
                TagSeed {
                    value: "low".to_string(),
                    label: "Low".to_string(),
                    color: None,
                    sort_order: 4,
                },
                TagSeed {
                    value: "critical".to_string(),
                    label: "Critical".to_string(),
                    color: Some("#E74C3C".to_string()),
                    sort_order: 1,
                },
                TagSeed {
                    value: "medium".to_string(),
                    label: "Medium".to_string(),
                    color: None,
                    sort_order: 3,
                },
                TagSeed {
                    value: "high".to_string(),
                    label: "High".to_string(),
                    color: None,
                    sort_order: 2,
                },
            ],
        }));
        assert_eq!(category.tag_count, 4);

        let tags = must(store.list_tags(category.category_id));
        let values: Vec<_> = tags.iter().map(|tag| tag.value.as_str()).collect();
        assert_eq!(values, vec!["critical", "high", "medium", "low"]);
        assert!(tags.iter().all(|tag| tag.is_active));
        assert!(tags.iter().all(|tag| tag.category_name == "incident_severity"));
    }

    #[test]
    fn seed_is_skipped_once_any_category_exists() {
        let mut store = must(SqliteCrmStore::open(std::path::Path::new(":memory:")));
        must(
            store
                .conn
                .execute_batch(crate::SCHEMA_CRM_V1)
                .context("schema failed"),
        );
        must(store.register_category(&TagCategoryInput {
            name: "custom".to_string(),
            display_name: "Custom".to_string(),
            description: None,
            entity_type: "department".to_string(),
            field_name: "tier".to_string(),
            default_tags: Vec::new(),
        }));

        assert!(!must(store.seed_default_tags()));
        assert_eq!(count(&store, "tag_categories"), 1);
        assert_eq!(count(&store, "tags"), 0);
    }

    #[test]
    fn duplicate_category_name_conflicts() {
        let mut store = fixture_store();
        let err = match store.register_category(&TagCategoryInput {
            name: "contact_role".to_string(),
            display_name: "Contact Role".to_string(),
            description: None,
            entity_type: "contact".to_string(),
            field_name: "role".to_string(),
            default_tags: Vec::new(),
        }) {
            Ok(_) => panic!("expected duplicate category to fail"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").to_ascii_lowercase().contains("unique constraint failed"));
    }

    #[test]
    fn unknown_category_reports_not_found() {
        let store = fixture_store();
        let err = match store.list_tags(TagCategoryId::new()) {
            Ok(_) => panic!("expected missing category to fail"),
            Err(err) => err,
        };
        assert_eq!(err.to_string(), "Tag category not found");
    }
}
