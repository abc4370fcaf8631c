#![allow(clippy::missing_errors_doc)]

//! SQLite persistence for the department CRM.
//!
//! A [`SqliteCrmStore`] owns one connection and is the unit of work for a
//! single request: callers open it, run one operation, and drop it. Every
//! multi-row write runs inside a transaction, so cascades either complete or
//! leave the database untouched.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use crm_core::{format_iso_date, format_rfc3339, parse_iso_date, parse_rfc3339_utc, CrmError};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

mod aggregate;
mod entities;
mod tags;

const CRM_MIGRATION_VERSION: i64 = 1;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_CRM_V1: &str = r"
CREATE TABLE IF NOT EXISTS tag_categories (
  category_id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  display_name TEXT NOT NULL,
  description TEXT,
  entity_type TEXT NOT NULL,
  field_name TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
  tag_id TEXT PRIMARY KEY,
  category_id TEXT NOT NULL,
  value TEXT NOT NULL,
  label TEXT NOT NULL,
  color TEXT,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
  sort_order INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE (category_id, value),
  FOREIGN KEY (category_id) REFERENCES tag_categories(category_id)
);

CREATE TABLE IF NOT EXISTS departments (
  department_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  acronym TEXT,
  tier TEXT NOT NULL CHECK (tier IN ('critical', 'standard')),
  status TEXT NOT NULL CHECK (status IN ('active', 'inactive')),
  owner_team TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
  app_id TEXT PRIMARY KEY,
  department_id TEXT NOT NULL,
  app_name TEXT NOT NULL,
  environment TEXT NOT NULL CHECK (environment IN ('prod', 'test')),
  auth_type TEXT NOT NULL,
  go_live_date TEXT,
  status TEXT NOT NULL CHECK (status IN ('live', 'integrating', 'deprecated')),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (department_id) REFERENCES departments(department_id)
);

CREATE TABLE IF NOT EXISTS integration_status (
  integration_id TEXT PRIMARY KEY,
  app_id TEXT NOT NULL UNIQUE,
  stage TEXT NOT NULL CHECK (
    stage IN ('intake', 'design', 'implementation', 'testing', 'production')
  ),
  status TEXT NOT NULL CHECK (status IN ('on_track', 'blocked', 'delayed')),
  risk_level TEXT NOT NULL CHECK (risk_level IN ('low', 'medium', 'high')),
  last_updated TEXT NOT NULL,
  notes TEXT,
  FOREIGN KEY (app_id) REFERENCES applications(app_id)
);

CREATE TABLE IF NOT EXISTS contacts (
  contact_id TEXT PRIMARY KEY,
  department_id TEXT NOT NULL,
  name TEXT NOT NULL,
  role TEXT CHECK (role IN ('business', 'technical', 'security') OR role IS NULL),
  email TEXT,
  phone TEXT,
  active_flag INTEGER NOT NULL DEFAULT 1 CHECK (active_flag IN (0, 1)),
  created_at TEXT NOT NULL,
  FOREIGN KEY (department_id) REFERENCES departments(department_id)
);

CREATE TABLE IF NOT EXISTS engagement_activities (
  activity_id TEXT PRIMARY KEY,
  department_id TEXT NOT NULL,
  app_id TEXT,
  type TEXT CHECK (type IN ('meeting', 'email', 'workshop', 'incident') OR type IS NULL),
  date TEXT NOT NULL,
  summary TEXT,
  next_action TEXT,
  owner TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (department_id) REFERENCES departments(department_id),
  FOREIGN KEY (app_id) REFERENCES applications(app_id)
);

CREATE TABLE IF NOT EXISTS incidents (
  incident_id TEXT PRIMARY KEY,
  app_id TEXT NOT NULL,
  severity TEXT CHECK (
    severity IN ('critical', 'high', 'medium', 'low') OR severity IS NULL
  ),
  status TEXT NOT NULL CHECK (status IN ('open', 'investigating', 'resolved', 'closed')),
  description TEXT,
  root_cause TEXT,
  created_at TEXT NOT NULL,
  resolved_at TEXT,
  FOREIGN KEY (app_id) REFERENCES applications(app_id)
);

CREATE INDEX IF NOT EXISTS idx_tags_category_order
  ON tags(category_id, sort_order, value);
CREATE INDEX IF NOT EXISTS idx_applications_department
  ON applications(department_id);
CREATE INDEX IF NOT EXISTS idx_contacts_department
  ON contacts(department_id);
CREATE INDEX IF NOT EXISTS idx_activities_department
  ON engagement_activities(department_id);
CREATE INDEX IF NOT EXISTS idx_activities_app
  ON engagement_activities(app_id);
CREATE INDEX IF NOT EXISTS idx_activities_date
  ON engagement_activities(date DESC, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_incidents_app
  ON incidents(app_id);
";

pub struct SqliteCrmStore {
    conn: Connection,
}

impl SqliteCrmStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens the database, waiting at most `busy_timeout` for another
    /// connection's write lock before a statement fails with
    /// `database is locked`.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.busy_timeout(busy_timeout)
            .context("failed to configure sqlite busy timeout")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Applies the schema and seeds the tag registry on first run.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_CRM_V1)
            .context("failed to apply crm schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![CRM_MIGRATION_VERSION, timestamp(crm_core::now_utc())?],
            )
            .context("failed to register crm schema migration")?;

        self.seed_default_tags()?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .optional()
            .context("failed to read schema version")
            .map(Option::flatten)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn timestamp(value: OffsetDateTime) -> Result<String> {
    Ok(format_rfc3339(value)?)
}

fn iso_date(value: Date) -> Result<String> {
    Ok(format_iso_date(value)?)
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn invalid_column(index: usize, kind: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn get_ulid(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Ulid> {
    let raw: String = row.get(index)?;
    Ulid::from_string(&raw)
        .map_err(|_| invalid_column(index, Type::Text, format!("invalid ULID: {raw}")))
}

fn get_optional_ulid(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Option<Ulid>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        Ulid::from_string(&raw)
            .map_err(|_| invalid_column(index, Type::Text, format!("invalid ULID: {raw}")))
    })
    .transpose()
}

fn get_enum<T>(
    row: &rusqlite::Row<'_>,
    index: usize,
    field: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).ok_or_else(|| invalid_column(index, Type::Text, format!("invalid {field}: {raw}")))
}

fn get_optional_enum<T>(
    row: &rusqlite::Row<'_>,
    index: usize,
    field: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        parse(&raw)
            .ok_or_else(|| invalid_column(index, Type::Text, format!("invalid {field}: {raw}")))
    })
    .transpose()
}

fn get_timestamp(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(index)?;
    parse_rfc3339_utc(&raw).map_err(|err| invalid_column(index, Type::Text, err.to_string()))
}

fn get_optional_timestamp(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<OffsetDateTime>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        parse_rfc3339_utc(&raw).map_err(|err| invalid_column(index, Type::Text, err.to_string()))
    })
    .transpose()
}

fn get_date(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Date> {
    let raw: String = row.get(index)?;
    parse_iso_date(&raw)
        .ok_or_else(|| invalid_column(index, Type::Text, format!("invalid date: {raw}")))
}

fn get_optional_date(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Option<Date>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        parse_iso_date(&raw)
            .ok_or_else(|| invalid_column(index, Type::Text, format!("invalid date: {raw}")))
    })
    .transpose()
}

fn get_count(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(index)?;
    u32::try_from(raw)
        .map_err(|_| invalid_column(index, Type::Integer, format!("invalid count: {raw}")))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(sql, params![id], |row| row.get(0))
        .optional()
        .context("failed to check record existence")?;
    Ok(found.is_some())
}

fn require_row(conn: &Connection, sql: &str, entity: &'static str, id: &str) -> Result<()> {
    if row_exists(conn, sql, id)? {
        Ok(())
    } else {
        Err(CrmError::not_found(entity, id).into())
    }
}
