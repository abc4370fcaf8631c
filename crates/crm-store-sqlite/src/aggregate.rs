use anyhow::{Context, Result};
use crm_core::{
    recent_activity_cutoff, ApplicationCounts, ContextSnapshot, DashboardSummary,
    DepartmentCounts, EngagementCounts, IncidentCounts, RiskCounts, CONTEXT_ACTIVITY_LIMIT,
};
use rusqlite::params;
use time::Date;

use crate::{iso_date, SqliteCrmStore};

const DASHBOARD_COUNTS: &str = "SELECT
        (SELECT COUNT(*) FROM departments),
        (SELECT COUNT(*) FROM departments WHERE status = 'active'),
        (SELECT COUNT(*) FROM departments WHERE tier = 'critical'),
        (SELECT COUNT(*) FROM applications),
        (SELECT COUNT(*) FROM applications WHERE status = 'live'),
        (SELECT COUNT(*) FROM applications WHERE status = 'integrating'),
        (SELECT COUNT(*) FROM integration_status WHERE risk_level = 'high'),
        (SELECT COUNT(*) FROM integration_status WHERE status = 'blocked'),
        (SELECT COUNT(*) FROM integration_status WHERE status = 'delayed'),
        (SELECT COUNT(*) FROM incidents WHERE status IN ('open', 'investigating')),
        (SELECT COUNT(*) FROM engagement_activities WHERE date >= ?1)";

impl SqliteCrmStore {
    /// Recomputes every headline count from current rows as of `today`.
    pub fn dashboard(&self, today: Date) -> Result<DashboardSummary> {
        let cutoff = iso_date(recent_activity_cutoff(today))?;
        let counts: [i64; 11] = self
            .conn
            .query_row(DASHBOARD_COUNTS, params![cutoff], |row| {
                let mut values = [0_i64; 11];
                for (index, slot) in values.iter_mut().enumerate() {
                    *slot = row.get(index)?;
                }
                Ok(values)
            })
            .context("failed to compute dashboard counts")?;
        let [
            departments,
            active,
            critical,
            applications,
            live,
            integrating,
            high_risk,
            blocked,
            delayed,
            open,
            recent,
        ] = counts.map(|value| u64::try_from(value).unwrap_or_default());

        Ok(DashboardSummary {
            departments: DepartmentCounts {
                total: departments,
                active,
                critical,
            },
            applications: ApplicationCounts {
                total: applications,
                live,
                integrating,
            },
            risk: RiskCounts {
                high_risk,
                blocked,
                delayed,
            },
            incidents: IncidentCounts { open },
            engagement: EngagementCounts {
                recent_activities: recent,
            },
        })
    }

    /// Fresh snapshot of the store for one assistant turn.
    pub fn context_snapshot(&self) -> Result<ContextSnapshot> {
        Ok(ContextSnapshot {
            departments: self.list_departments()?,
            applications: self.list_applications()?,
            integrations: self.list_integrations()?,
            contacts: self.list_contacts()?,
            recent_activities: self.list_recent_activities(CONTEXT_ACTIVITY_LIMIT)?,
            incidents: self.list_incidents()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixture_application, fixture_department, fixture_store, must};
    use crm_core::{
        ApplicationPatch, ApplicationStatus, DepartmentPatch, DepartmentStatus, DepartmentTier,
        IncidentPatch, IncidentStatus, IntegrationHealth, IntegrationPatch, NewActivity,
        NewIncident, RiskLevel,
    };
    use proptest::prelude::*;
    use time::Month;

    fn date(year: i32, month: Month, day: u8) -> Date {
        match Date::from_calendar_date(year, month, day) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    fn count_where<T>(items: &[T], predicate: impl Fn(&T) -> bool) -> u64 {
        u64::try_from(items.iter().filter(|item| predicate(item)).count()).unwrap_or_default()
    }

    fn assert_dashboard_matches_lists(store: &SqliteCrmStore, today: Date) {
        let summary = must(store.dashboard(today));
        let departments = must(store.list_departments());
        let applications = must(store.list_applications());
        let integrations = must(store.list_integrations());
        let incidents = must(store.list_incidents());
        let activities = must(store.list_activities());
        let cutoff = recent_activity_cutoff(today);

        assert_eq!(summary.departments.total, count_where(&departments, |_| true));
        assert_eq!(
            summary.departments.active,
            count_where(&departments, |d| d.status == DepartmentStatus::Active)
        );
        assert_eq!(
            summary.departments.critical,
            count_where(&departments, |d| d.tier == DepartmentTier::Critical)
        );
        assert_eq!(summary.applications.total, count_where(&applications, |_| true));
        assert_eq!(
            summary.applications.live,
            count_where(&applications, |a| a.status == ApplicationStatus::Live)
        );
        assert_eq!(
            summary.applications.integrating,
            count_where(&applications, |a| a.status == ApplicationStatus::Integrating)
        );
        assert_eq!(
            summary.risk.high_risk,
            count_where(&integrations, |i| i.risk_level == RiskLevel::High)
        );
        assert_eq!(
            summary.risk.blocked,
            count_where(&integrations, |i| i.status == IntegrationHealth::Blocked)
        );
        assert_eq!(
            summary.risk.delayed,
            count_where(&integrations, |i| i.status == IntegrationHealth::Delayed)
        );
        assert_eq!(
            summary.incidents.open,
            count_where(&incidents, |i| !i.status.is_terminal())
        );
        assert_eq!(
            summary.engagement.recent_activities,
            count_where(&activities, |a| a.date >= cutoff)
        );
    }

    #[test]
    fn empty_store_has_zero_counts() {
        let store = fixture_store();
        assert_eq!(must(store.dashboard(date(2024, Month::May, 10))), DashboardSummary::default());
    }

    #[test]
    fn recent_window_follows_month_boundary_rule() {
        let mut store = fixture_store();
        let department = fixture_department(&mut store, "Heritage");
        for raw in ["2024-04-30", "2024-05-01", "2024-05-20", "2024-05-31"] {
            must(store.create_activity(&NewActivity {
                department_id: Some(department.department_id),
                date: crm_core::parse_iso_date(raw),
                ..NewActivity::default()
            }));
        }

        let mid_month = must(store.dashboard(date(2024, Month::May, 20)));
        assert_eq!(mid_month.engagement.recent_activities, 3);

        let last_day = must(store.dashboard(date(2024, Month::May, 31)));
        assert_eq!(last_day.engagement.recent_activities, 1);
    }

    #[test]
    fn counts_track_mutations_without_caching() {
        let mut store = fixture_store();
        let department = fixture_department(&mut store, "Veterans Affairs");
        let application = fixture_application(&mut store, department.department_id, "Benefits");
        let today = date(2024, Month::March, 12);

        let before = must(store.dashboard(today));
        assert_eq!(before.risk.blocked, 0);

        let integration = must(store.get_integration_for_application(application.app_id));
        must(store.update_integration(
            integration.integration_id,
            &IntegrationPatch {
                status: Some(IntegrationHealth::Blocked),
                ..IntegrationPatch::default()
            },
        ));
        let after = must(store.dashboard(today));
        assert_eq!(after.risk.blocked, 1);
        assert_dashboard_matches_lists(&store, today);
    }

    #[test]
    fn snapshot_bounds_activities_and_orders_newest_first() {
        let mut store = fixture_store();
        let department = fixture_department(&mut store, "Environment");
        fixture_application(&mut store, department.department_id, "Permits");
        for day in 1..=25_u8 {
            must(store.create_activity(&NewActivity {
                department_id: Some(department.department_id),
                date: Some(date(2024, Month::January, day)),
                ..NewActivity::default()
            }));
        }

        let snapshot = must(store.context_snapshot());
        assert_eq!(snapshot.departments.len(), 1);
        assert_eq!(snapshot.applications.len(), 1);
        assert_eq!(snapshot.integrations.len(), 1);
        assert_eq!(snapshot.recent_activities.len(), CONTEXT_ACTIVITY_LIMIT);
        assert_eq!(snapshot.recent_activities[0].date, date(2024, Month::January, 25));
        assert_eq!(
            snapshot.recent_activities.last().map(|activity| activity.date),
            Some(date(2024, Month::January, 6))
        );
    }

    #[test]
    fn snapshot_reflects_writes_between_calls() {
        let mut store = fixture_store();
        let department = fixture_department(&mut store, "Justice");
        let first = must(store.context_snapshot());
        assert!(first.incidents.is_empty());

        let application = fixture_application(&mut store, department.department_id, "Case Tracker");
        must(store.create_incident(&NewIncident {
            app_id: Some(application.app_id),
            ..NewIncident::default()
        }));
        let second = must(store.context_snapshot());
        assert_eq!(second.incidents.len(), 1);
        assert_eq!(second.departments[0].app_count, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_dashboard_equals_filtered_lists(
            department_flags in prop::collection::vec((any::<bool>(), any::<bool>()), 1..6),
            app_codes in prop::collection::vec((0usize..6, 0u8..3, 0u8..3, 0u8..3, 0u8..4), 0..12),
            activity_days in prop::collection::vec(1u8..=28, 0..8),
            today_day in 1u8..=31,
        ) {
            let mut store = fixture_store();
            let mut departments = Vec::new();
            for (index, (critical, active)) in department_flags.iter().enumerate() {
                let department = fixture_department(&mut store, &format!("Department {index}"));
                must(store.update_department(department.department_id, &DepartmentPatch {
                    tier: Some(if *critical {
                        DepartmentTier::Critical
                    } else {
                        DepartmentTier::Standard
                    }),
                    status: Some(if *active {
                        DepartmentStatus::Active
                    } else {
                        DepartmentStatus::Inactive
                    }),
                    ..DepartmentPatch::default()
                }));
                departments.push(department.department_id);
            }

            for (index, (owner, status, health, risk, incident)) in app_codes.iter().enumerate() {
                let department_id = departments[owner % departments.len()];
                let application =
                    fixture_application(&mut store, department_id, &format!("App {index}"));
                must(store.update_application(application.app_id, &ApplicationPatch {
                    status: Some(ApplicationStatus::ALL[usize::from(*status)]),
                    ..ApplicationPatch::default()
                }));
                let integration = must(store.get_integration_for_application(application.app_id));
                must(store.update_integration(integration.integration_id, &IntegrationPatch {
                    status: Some(IntegrationHealth::ALL[usize::from(*health)]),
                    risk_level: Some(RiskLevel::ALL[usize::from(*risk)]),
                    ..IntegrationPatch::default()
                }));
                let created = must(store.create_incident(&NewIncident {
                    app_id: Some(application.app_id),
                    ..NewIncident::default()
                }));
                must(store.update_incident(created.incident_id, &IncidentPatch {
                    status: Some(IncidentStatus::ALL[usize::from(*incident)]),
                    ..IncidentPatch::default()
                }));
            }

            for day in &activity_days {
                must(store.create_activity(&NewActivity {
                    department_id: Some(departments[0]),
                    date: Some(date(2024, Month::May, *day)),
                    ..NewActivity::default()
                }));
            }

            assert_dashboard_matches_lists(&store, date(2024, Month::May, today_day));
        }
    }
}
