use anyhow::{Context, Result};
use crm_core::{
    now_utc, today_utc, ActivityId, ActivityType, Application, ApplicationId, ApplicationPatch,
    ApplicationStatus, Contact, ContactId, ContactPatch, ContactRole, CrmError, Department,
    DepartmentId, DepartmentPatch, DepartmentStatus, DepartmentTier, EngagementActivity,
    Environment, Incident, IncidentId, IncidentPatch, IncidentSeverity, IncidentStatus,
    IntegrationHealth, IntegrationId, IntegrationPatch, IntegrationStage, IntegrationStatus,
    NewActivity, NewApplication, NewContact, NewDepartment, NewIncident, RiskLevel,
};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::{
    bool_to_sql, collect_rows, get_count, get_date, get_enum, get_optional_date,
    get_optional_enum, get_optional_timestamp, get_optional_ulid, get_timestamp, get_ulid,
    iso_date, require_row, timestamp, SqliteCrmStore,
};

const DEPARTMENT_SELECT: &str = "SELECT
        d.department_id, d.name, d.acronym, d.tier, d.status, d.owner_team,
        d.created_at, d.updated_at,
        (SELECT COUNT(*) FROM applications a WHERE a.department_id = d.department_id)
     FROM departments d";

const APPLICATION_SELECT: &str = "SELECT
        a.app_id, a.department_id, d.name, a.app_name, a.environment, a.auth_type,
        a.go_live_date, a.status, a.created_at, a.updated_at
     FROM applications a
     JOIN departments d ON d.department_id = a.department_id";

const INTEGRATION_SELECT: &str = "SELECT
        i.integration_id, i.app_id, a.app_name, d.name, i.stage, i.status, i.risk_level,
        i.last_updated, i.notes
     FROM integration_status i
     JOIN applications a ON a.app_id = i.app_id
     JOIN departments d ON d.department_id = a.department_id";

const CONTACT_SELECT: &str = "SELECT
        c.contact_id, c.department_id, d.name, c.name, c.role, c.email, c.phone,
        c.active_flag, c.created_at
     FROM contacts c
     JOIN departments d ON d.department_id = c.department_id";

const ACTIVITY_SELECT: &str = "SELECT
        e.activity_id, e.department_id, d.name, e.app_id, a.app_name, e.type, e.date,
        e.summary, e.next_action, e.owner, e.created_at
     FROM engagement_activities e
     JOIN departments d ON d.department_id = e.department_id
     LEFT JOIN applications a ON a.app_id = e.app_id";

const INCIDENT_SELECT: &str = "SELECT
        n.incident_id, n.app_id, a.app_name, d.name, n.severity, n.status, n.description,
        n.root_cause, n.created_at, n.resolved_at
     FROM incidents n
     JOIN applications a ON a.app_id = n.app_id
     JOIN departments d ON d.department_id = a.department_id";

const ACTIVITY_ORDER: &str = "ORDER BY e.date DESC, e.created_at DESC, e.activity_id DESC";

const DEPARTMENT_EXISTS: &str = "SELECT 1 FROM departments WHERE department_id = ?1";
const APPLICATION_EXISTS: &str = "SELECT 1 FROM applications WHERE app_id = ?1";

impl SqliteCrmStore {
    pub fn list_departments(&self) -> Result<Vec<Department>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEPARTMENT_SELECT} ORDER BY d.name ASC, d.department_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_department_row)?;
        collect_rows(rows)
    }

    pub fn get_department(&self, department_id: DepartmentId) -> Result<Department> {
        self.conn
            .query_row(
                &format!("{DEPARTMENT_SELECT} WHERE d.department_id = ?1"),
                params![department_id.to_string()],
                parse_department_row,
            )
            .optional()
            .context("failed to load department")?
            .ok_or_else(|| CrmError::not_found("Department", department_id).into())
    }

    pub fn create_department(&mut self, input: &NewDepartment) -> Result<Department> {
        input.validate()?;
        let department_id = DepartmentId::new();
        let now = timestamp(now_utc())?;

        self.conn
            .execute(
                "INSERT INTO departments(
                    department_id, name, acronym, tier, status, owner_team, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    department_id.to_string(),
                    input.name,
                    input.acronym,
                    input.tier.unwrap_or_default().as_str(),
                    input.status.unwrap_or_default().as_str(),
                    input.owner_team,
                    now,
                ],
            )
            .context("failed to insert department")?;

        tracing::debug!(%department_id, "department created");
        self.get_department(department_id)
    }

    pub fn update_department(
        &mut self,
        department_id: DepartmentId,
        patch: &DepartmentPatch,
    ) -> Result<Department> {
        let mut department = self.get_department(department_id)?;
        patch.apply_to(&mut department, now_utc())?;

        self.conn
            .execute(
                "UPDATE departments SET
                    name = ?2, acronym = ?3, tier = ?4, status = ?5, owner_team = ?6,
                    updated_at = ?7
                 WHERE department_id = ?1",
                params![
                    department_id.to_string(),
                    department.name,
                    department.acronym,
                    department.tier.as_str(),
                    department.status.as_str(),
                    department.owner_team,
                    timestamp(department.updated_at)?,
                ],
            )
            .context("failed to update department")?;

        tracing::debug!(%department_id, "department updated");
        self.get_department(department_id)
    }

    /// Deletes a department together with its applications (and their
    /// integration records and incidents), contacts, and activities.
    /// Activities owned by other departments that point at one of the removed
    /// applications keep their row and lose the application link.
    pub fn delete_department(&mut self, department_id: DepartmentId) -> Result<()> {
        let id = department_id.to_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start department delete transaction")?;
        require_row(&tx, DEPARTMENT_EXISTS, "Department", &id)?;

        let owned_apps = "SELECT app_id FROM applications WHERE department_id = ?1";
        let incidents = tx
            .execute(&format!("DELETE FROM incidents WHERE app_id IN ({owned_apps})"), params![id])
            .context("failed to delete department incidents")?;
        let integrations = tx
            .execute(
                &format!("DELETE FROM integration_status WHERE app_id IN ({owned_apps})"),
                params![id],
            )
            .context("failed to delete department integration records")?;
        let unlinked = tx
            .execute(
                &format!(
                    "UPDATE engagement_activities SET app_id = NULL
                     WHERE department_id <> ?1 AND app_id IN ({owned_apps})"
                ),
                params![id],
            )
            .context("failed to unlink foreign activities")?;
        let activities = tx
            .execute("DELETE FROM engagement_activities WHERE department_id = ?1", params![id])
            .context("failed to delete department activities")?;
        let contacts = tx
            .execute("DELETE FROM contacts WHERE department_id = ?1", params![id])
            .context("failed to delete department contacts")?;
        let applications = tx
            .execute("DELETE FROM applications WHERE department_id = ?1", params![id])
            .context("failed to delete department applications")?;
        tx.execute("DELETE FROM departments WHERE department_id = ?1", params![id])
            .context("failed to delete department")?;

        tx.commit().context("failed to commit department delete")?;
        tracing::info!(
            %department_id,
            applications,
            integrations,
            incidents,
            contacts,
            activities,
            unlinked,
            "department deleted with dependents"
        );
        Ok(())
    }

    pub fn list_applications(&self) -> Result<Vec<Application>> {
        let mut stmt = self.conn.prepare(&format!(
            "{APPLICATION_SELECT} ORDER BY a.app_name ASC, a.app_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_application_row)?;
        collect_rows(rows)
    }

    pub fn get_application(&self, app_id: ApplicationId) -> Result<Application> {
        self.conn
            .query_row(
                &format!("{APPLICATION_SELECT} WHERE a.app_id = ?1"),
                params![app_id.to_string()],
                parse_application_row,
            )
            .optional()
            .context("failed to load application")?
            .ok_or_else(|| CrmError::not_found("Application", app_id).into())
    }

    /// Creates the application and its integration record atomically.
    pub fn create_application(&mut self, input: &NewApplication) -> Result<Application> {
        let department_id = input.validate()?;
        let app_id = ApplicationId::new();
        let integration_id = IntegrationId::new();
        let now = timestamp(now_utc())?;
        let go_live_date = input.go_live_date.map(iso_date).transpose()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start application transaction")?;
        require_row(&tx, DEPARTMENT_EXISTS, "Department", &department_id.to_string())?;

        tx.execute(
            "INSERT INTO applications(
                app_id, department_id, app_name, environment, auth_type, go_live_date, status,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                app_id.to_string(),
                department_id.to_string(),
                input.app_name,
                input.environment.unwrap_or_default().as_str(),
                input.stored_auth_type(),
                go_live_date,
                input.status.unwrap_or_default().as_str(),
                now,
            ],
        )
        .context("failed to insert application")?;

        tx.execute(
            "INSERT INTO integration_status(
                integration_id, app_id, stage, status, risk_level, last_updated, notes
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![
                integration_id.to_string(),
                app_id.to_string(),
                IntegrationStage::default().as_str(),
                IntegrationHealth::default().as_str(),
                RiskLevel::default().as_str(),
                now,
            ],
        )
        .context("failed to insert integration record")?;

        tx.commit().context("failed to commit application transaction")?;
        tracing::debug!(%app_id, %department_id, %integration_id, "application created");
        self.get_application(app_id)
    }

    pub fn update_application(
        &mut self,
        app_id: ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<Application> {
        let mut application = self.get_application(app_id)?;
        if let Some(department_id) = patch.department_id {
            require_row(&self.conn, DEPARTMENT_EXISTS, "Department", &department_id.to_string())?;
        }
        patch.apply_to(&mut application, now_utc())?;

        self.conn
            .execute(
                "UPDATE applications SET
                    department_id = ?2, app_name = ?3, environment = ?4, auth_type = ?5,
                    go_live_date = ?6, status = ?7, updated_at = ?8
                 WHERE app_id = ?1",
                params![
                    app_id.to_string(),
                    application.department_id.to_string(),
                    application.app_name,
                    application.environment.as_str(),
                    application.auth_type,
                    application.go_live_date.map(iso_date).transpose()?,
                    application.status.as_str(),
                    timestamp(application.updated_at)?,
                ],
            )
            .context("failed to update application")?;

        tracing::debug!(%app_id, "application updated");
        self.get_application(app_id)
    }

    /// Deletes an application, its integration record and its incidents.
    /// Activities that referenced it survive with no application link.
    pub fn delete_application(&mut self, app_id: ApplicationId) -> Result<()> {
        let id = app_id.to_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start application delete transaction")?;
        require_row(&tx, APPLICATION_EXISTS, "Application", &id)?;

        let incidents = tx
            .execute("DELETE FROM incidents WHERE app_id = ?1", params![id])
            .context("failed to delete application incidents")?;
        tx.execute("DELETE FROM integration_status WHERE app_id = ?1", params![id])
            .context("failed to delete integration record")?;
        let unlinked = tx
            .execute(
                "UPDATE engagement_activities SET app_id = NULL WHERE app_id = ?1",
                params![id],
            )
            .context("failed to unlink application activities")?;
        tx.execute("DELETE FROM applications WHERE app_id = ?1", params![id])
            .context("failed to delete application")?;

        tx.commit().context("failed to commit application delete")?;
        tracing::info!(%app_id, incidents, unlinked, "application deleted with dependents");
        Ok(())
    }

    pub fn list_integrations(&self) -> Result<Vec<IntegrationStatus>> {
        let mut stmt = self.conn.prepare(&format!(
            "{INTEGRATION_SELECT} ORDER BY a.app_name ASC, i.integration_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_integration_row)?;
        collect_rows(rows)
    }

    pub fn get_integration(&self, integration_id: IntegrationId) -> Result<IntegrationStatus> {
        self.conn
            .query_row(
                &format!("{INTEGRATION_SELECT} WHERE i.integration_id = ?1"),
                params![integration_id.to_string()],
                parse_integration_row,
            )
            .optional()
            .context("failed to load integration record")?
            .ok_or_else(|| CrmError::not_found("Integration", integration_id).into())
    }

    pub fn get_integration_for_application(
        &self,
        app_id: ApplicationId,
    ) -> Result<IntegrationStatus> {
        self.conn
            .query_row(
                &format!("{INTEGRATION_SELECT} WHERE i.app_id = ?1"),
                params![app_id.to_string()],
                parse_integration_row,
            )
            .optional()
            .context("failed to load integration record")?
            .ok_or_else(|| CrmError::not_found("Integration", app_id).into())
    }

    pub fn update_integration(
        &mut self,
        integration_id: IntegrationId,
        patch: &IntegrationPatch,
    ) -> Result<IntegrationStatus> {
        let mut integration = self.get_integration(integration_id)?;
        patch.apply_to(&mut integration, now_utc());

        self.conn
            .execute(
                "UPDATE integration_status SET
                    stage = ?2, status = ?3, risk_level = ?4, notes = ?5, last_updated = ?6
                 WHERE integration_id = ?1",
                params![
                    integration_id.to_string(),
                    integration.stage.as_str(),
                    integration.status.as_str(),
                    integration.risk_level.as_str(),
                    integration.notes,
                    timestamp(integration.last_updated)?,
                ],
            )
            .context("failed to update integration record")?;

        tracing::debug!(%integration_id, stage = %integration.stage, "integration updated");
        self.get_integration(integration_id)
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT} ORDER BY c.name ASC, c.contact_id ASC"))?;
        let rows = stmt.query_map([], parse_contact_row)?;
        collect_rows(rows)
    }

    pub fn get_contact(&self, contact_id: ContactId) -> Result<Contact> {
        self.conn
            .query_row(
                &format!("{CONTACT_SELECT} WHERE c.contact_id = ?1"),
                params![contact_id.to_string()],
                parse_contact_row,
            )
            .optional()
            .context("failed to load contact")?
            .ok_or_else(|| CrmError::not_found("Contact", contact_id).into())
    }

    pub fn create_contact(&mut self, input: &NewContact) -> Result<Contact> {
        let department_id = input.validate()?;
        require_row(&self.conn, DEPARTMENT_EXISTS, "Department", &department_id.to_string())?;
        let contact_id = ContactId::new();

        self.conn
            .execute(
                "INSERT INTO contacts(
                    contact_id, department_id, name, role, email, phone, active_flag, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    contact_id.to_string(),
                    department_id.to_string(),
                    input.name,
                    input.role.map(ContactRole::as_str),
                    input.email,
                    input.phone,
                    bool_to_sql(input.active_flag.unwrap_or(true)),
                    timestamp(now_utc())?,
                ],
            )
            .context("failed to insert contact")?;

        tracing::debug!(%contact_id, %department_id, "contact created");
        self.get_contact(contact_id)
    }

    pub fn update_contact(
        &mut self,
        contact_id: ContactId,
        patch: &ContactPatch,
    ) -> Result<Contact> {
        let mut contact = self.get_contact(contact_id)?;
        patch.apply_to(&mut contact)?;

        self.conn
            .execute(
                "UPDATE contacts SET
                    name = ?2, role = ?3, email = ?4, phone = ?5, active_flag = ?6
                 WHERE contact_id = ?1",
                params![
                    contact_id.to_string(),
                    contact.name,
                    contact.role.map(ContactRole::as_str),
                    contact.email,
                    contact.phone,
                    bool_to_sql(contact.active_flag),
                ],
            )
            .context("failed to update contact")?;

        tracing::debug!(%contact_id, "contact updated");
        self.get_contact(contact_id)
    }

    pub fn delete_contact(&mut self, contact_id: ContactId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM contacts WHERE contact_id = ?1", params![contact_id.to_string()])
            .context("failed to delete contact")?;
        if deleted == 0 {
            return Err(CrmError::not_found("Contact", contact_id).into());
        }
        tracing::debug!(%contact_id, "contact deleted");
        Ok(())
    }

    pub fn list_activities(&self) -> Result<Vec<EngagementActivity>> {
        let mut stmt = self.conn.prepare(&format!("{ACTIVITY_SELECT} {ACTIVITY_ORDER}"))?;
        let rows = stmt.query_map([], parse_activity_row)?;
        collect_rows(rows)
    }

    /// Newest activities first, at most `limit` of them.
    pub fn list_recent_activities(&self, limit: usize) -> Result<Vec<EngagementActivity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!("{ACTIVITY_SELECT} {ACTIVITY_ORDER} LIMIT ?1"))?;
        let rows = stmt.query_map(params![limit], parse_activity_row)?;
        collect_rows(rows)
    }

    pub fn get_activity(&self, activity_id: ActivityId) -> Result<EngagementActivity> {
        self.conn
            .query_row(
                &format!("{ACTIVITY_SELECT} WHERE e.activity_id = ?1"),
                params![activity_id.to_string()],
                parse_activity_row,
            )
            .optional()
            .context("failed to load activity")?
            .ok_or_else(|| CrmError::not_found("Activity", activity_id).into())
    }

    pub fn create_activity(&mut self, input: &NewActivity) -> Result<EngagementActivity> {
        let department_id = input.validate()?;
        require_row(&self.conn, DEPARTMENT_EXISTS, "Department", &department_id.to_string())?;
        if let Some(app_id) = input.app_id {
            require_row(&self.conn, APPLICATION_EXISTS, "Application", &app_id.to_string())?;
        }
        let activity_id = ActivityId::new();

        self.conn
            .execute(
                "INSERT INTO engagement_activities(
                    activity_id, department_id, app_id, type, date, summary, next_action, owner,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    activity_id.to_string(),
                    department_id.to_string(),
                    input.app_id.map(|app_id| app_id.to_string()),
                    input.activity_type.map(ActivityType::as_str),
                    iso_date(input.date_or(today_utc()))?,
                    input.summary,
                    input.next_action,
                    input.owner,
                    timestamp(now_utc())?,
                ],
            )
            .context("failed to insert activity")?;

        tracing::debug!(%activity_id, %department_id, "activity created");
        self.get_activity(activity_id)
    }

    pub fn delete_activity(&mut self, activity_id: ActivityId) -> Result<()> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM engagement_activities WHERE activity_id = ?1",
                params![activity_id.to_string()],
            )
            .context("failed to delete activity")?;
        if deleted == 0 {
            return Err(CrmError::not_found("Activity", activity_id).into());
        }
        tracing::debug!(%activity_id, "activity deleted");
        Ok(())
    }

    pub fn list_incidents(&self) -> Result<Vec<Incident>> {
        let mut stmt = self.conn.prepare(&format!(
            "{INCIDENT_SELECT} ORDER BY n.created_at DESC, n.incident_id DESC"
        ))?;
        let rows = stmt.query_map([], parse_incident_row)?;
        collect_rows(rows)
    }

    pub fn get_incident(&self, incident_id: IncidentId) -> Result<Incident> {
        self.conn
            .query_row(
                &format!("{INCIDENT_SELECT} WHERE n.incident_id = ?1"),
                params![incident_id.to_string()],
                parse_incident_row,
            )
            .optional()
            .context("failed to load incident")?
            .ok_or_else(|| CrmError::not_found("Incident", incident_id).into())
    }

    pub fn create_incident(&mut self, input: &NewIncident) -> Result<Incident> {
        let app_id = input.validate()?;
        require_row(&self.conn, APPLICATION_EXISTS, "Application", &app_id.to_string())?;
        let incident_id = IncidentId::new();
        let now = now_utc();

        self.conn
            .execute(
                "INSERT INTO incidents(
                    incident_id, app_id, severity, status, description, root_cause, created_at,
                    resolved_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    incident_id.to_string(),
                    app_id.to_string(),
                    input.severity.map(IncidentSeverity::as_str),
                    input.status.unwrap_or_default().as_str(),
                    input.description,
                    input.root_cause,
                    timestamp(now)?,
                    input.resolved_at(now).map(timestamp).transpose()?,
                ],
            )
            .context("failed to insert incident")?;

        tracing::debug!(%incident_id, %app_id, "incident created");
        self.get_incident(incident_id)
    }

    pub fn update_incident(
        &mut self,
        incident_id: IncidentId,
        patch: &IncidentPatch,
    ) -> Result<Incident> {
        let mut incident = self.get_incident(incident_id)?;
        patch.apply_to(&mut incident, now_utc());

        self.conn
            .execute(
                "UPDATE incidents SET
                    severity = ?2, status = ?3, description = ?4, root_cause = ?5, resolved_at = ?6
                 WHERE incident_id = ?1",
                params![
                    incident_id.to_string(),
                    incident.severity.map(IncidentSeverity::as_str),
                    incident.status.as_str(),
                    incident.description,
                    incident.root_cause,
                    incident.resolved_at.map(timestamp).transpose()?,
                ],
            )
            .context("failed to update incident")?;

        tracing::debug!(%incident_id, status = %incident.status, "incident updated");
        self.get_incident(incident_id)
    }

    pub fn delete_incident(&mut self, incident_id: IncidentId) -> Result<()> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM incidents WHERE incident_id = ?1",
                params![incident_id.to_string()],
            )
            .context("failed to delete incident")?;
        if deleted == 0 {
            return Err(CrmError::not_found("Incident", incident_id).into());
        }
        tracing::debug!(%incident_id, "incident deleted");
        Ok(())
    }
}

fn parse_department_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        department_id: DepartmentId(get_ulid(row, 0)?),
        name: row.get(1)?,
        acronym: row.get(2)?,
        tier: get_enum(row, 3, "tier", DepartmentTier::parse)?,
        status: get_enum(row, 4, "department status", DepartmentStatus::parse)?,
        owner_team: row.get(5)?,
        created_at: get_timestamp(row, 6)?,
        updated_at: get_timestamp(row, 7)?,
        app_count: get_count(row, 8)?,
    })
}

fn parse_application_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        app_id: ApplicationId(get_ulid(row, 0)?),
        department_id: DepartmentId(get_ulid(row, 1)?),
        department_name: row.get(2)?,
        app_name: row.get(3)?,
        environment: get_enum(row, 4, "environment", Environment::parse)?,
        auth_type: row.get(5)?,
        go_live_date: get_optional_date(row, 6)?,
        status: get_enum(row, 7, "application status", ApplicationStatus::parse)?,
        created_at: get_timestamp(row, 8)?,
        updated_at: get_timestamp(row, 9)?,
    })
}

fn parse_integration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntegrationStatus> {
    Ok(IntegrationStatus {
        integration_id: IntegrationId(get_ulid(row, 0)?),
        app_id: ApplicationId(get_ulid(row, 1)?),
        app_name: row.get(2)?,
        department_name: row.get(3)?,
        stage: get_enum(row, 4, "stage", IntegrationStage::parse)?,
        status: get_enum(row, 5, "integration status", IntegrationHealth::parse)?,
        risk_level: get_enum(row, 6, "risk_level", RiskLevel::parse)?,
        last_updated: get_timestamp(row, 7)?,
        notes: row.get(8)?,
    })
}

fn parse_contact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let active_flag: i64 = row.get(7)?;
    Ok(Contact {
        contact_id: ContactId(get_ulid(row, 0)?),
        department_id: DepartmentId(get_ulid(row, 1)?),
        department_name: row.get(2)?,
        name: row.get(3)?,
        role: get_optional_enum(row, 4, "role", ContactRole::parse)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        active_flag: active_flag != 0,
        created_at: get_timestamp(row, 8)?,
    })
}

fn parse_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EngagementActivity> {
    Ok(EngagementActivity {
        activity_id: ActivityId(get_ulid(row, 0)?),
        department_id: DepartmentId(get_ulid(row, 1)?),
        department_name: row.get(2)?,
        app_id: get_optional_ulid(row, 3)?.map(ApplicationId),
        app_name: row.get(4)?,
        activity_type: get_optional_enum(row, 5, "activity type", ActivityType::parse)?,
        date: get_date(row, 6)?,
        summary: row.get(7)?,
        next_action: row.get(8)?,
        owner: row.get(9)?,
        created_at: get_timestamp(row, 10)?,
    })
}

fn parse_incident_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        incident_id: IncidentId(get_ulid(row, 0)?),
        app_id: ApplicationId(get_ulid(row, 1)?),
        app_name: row.get(2)?,
        department_name: row.get(3)?,
        severity: get_optional_enum(row, 4, "severity", IncidentSeverity::parse)?,
        status: get_enum(row, 5, "incident status", IncidentStatus::parse)?,
        description: row.get(6)?,
        root_cause: row.get(7)?,
        created_at: get_timestamp(row, 8)?,
        resolved_at: get_optional_timestamp(row, 9)?,
    })
}
