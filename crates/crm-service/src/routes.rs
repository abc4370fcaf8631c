use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crm_core::{
    ActivityId, Application, ApplicationId, ApplicationPatch, Contact, ContactId, ContactPatch,
    CrmError, DashboardSummary, Department, DepartmentId, DepartmentPatch, EngagementActivity,
    Incident, IncidentId, IncidentPatch, IntegrationId, IntegrationPatch, IntegrationStatus,
    NewActivity, NewApplication, NewContact, NewDepartment, NewIncident, Tag, TagCategory,
    TagCategoryId,
};
use serde::Serialize;
use serde_json::json;

use crate::api::{ChatRequest, ChatResponse, CrmApi};

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
pub struct ServiceState {
    pub api: CrmApi,
    pub operation_timeout: Duration,
    pub assistant_timeout: Duration,
    pub telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    status: &'static str,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteResponse {
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    assistant_timeout_ms: u64,
    assistant: Option<&'static str>,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    invalid_json_total: AtomicU64,
    validation_error_total: AtomicU64,
    not_found_total: AtomicU64,
    write_conflict_total: AtomicU64,
    schema_unavailable_total: AtomicU64,
    database_busy_total: AtomicU64,
    assistant_not_configured_total: AtomicU64,
    upstream_failure_total: AtomicU64,
    internal_error_total: AtomicU64,
    other_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    invalid_json_total: u64,
    validation_error_total: u64,
    not_found_total: u64,
    write_conflict_total: u64,
    schema_unavailable_total: u64,
    database_busy_total: u64,
    assistant_not_configured_total: u64,
    upstream_failure_total: u64,
    internal_error_total: u64,
    other_error_total: u64,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            status: "error",
            error: self.message,
            code: self.code,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ServiceState {
    pub fn new(api: CrmApi, operation_timeout: Duration, assistant_timeout: Duration) -> Self {
        Self {
            api,
            operation_timeout,
            assistant_timeout,
            telemetry: Arc::new(ServiceTelemetry::default()),
        }
    }

    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure { status, code, message: message.into(), details }
    }

    fn invalid_json(rejection: &JsonRejection) -> ServiceFailure {
        Self::failure(
            rejection.status(),
            "invalid_json",
            rejection.body_text(),
            Some(json!({"rejection": rejection.to_string()})),
        )
    }

    fn invalid_json_with_telemetry(&self, rejection: &JsonRejection) -> ServiceFailure {
        self.telemetry.record_failure("invalid_json", false);
        Self::invalid_json(rejection)
    }

    fn classify_crm_error(err: &CrmError) -> ServiceFailure {
        match err {
            CrmError::NotFound { .. } => {
                Self::failure(StatusCode::NOT_FOUND, "not_found", err.to_string(), None)
            }
            CrmError::Validation(message) => {
                Self::failure(StatusCode::BAD_REQUEST, "validation_error", message.clone(), None)
            }
            CrmError::Configuration(message) => Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "assistant_not_configured",
                message.clone(),
                None,
            ),
            CrmError::Upstream(message) => Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_failure",
                message.clone(),
                None,
            ),
        }
    }

    fn classify_api_error(
        err: &anyhow::Error,
        default_status: StatusCode,
        default_code: &'static str,
    ) -> ServiceFailure {
        if let Some(crm_error) = err.downcast_ref::<CrmError>() {
            return Self::classify_crm_error(crm_error);
        }

        let message = err.to_string();
        let diagnostic = format!("{err:#}");
        let normalized = diagnostic.to_ascii_lowercase();

        if normalized.contains("database is locked")
            || normalized.contains("database table is locked")
            || normalized.contains("database is busy")
        {
            return Self::failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "database_busy",
                diagnostic,
                None,
            );
        }

        if normalized.contains("unique constraint failed")
            || normalized.contains("foreign key constraint failed")
        {
            return Self::failure(StatusCode::CONFLICT, "write_conflict", diagnostic, None);
        }

        if normalized.contains("no such table")
            || normalized.contains("schema")
            || normalized.contains("sqlite")
            || normalized.contains("database")
        {
            return Self::failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "schema_unavailable",
                diagnostic,
                None,
            );
        }

        Self::failure(default_status, default_code, message, None)
    }

    /// Runs a read under the operation timeout.
    async fn run_blocking<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(CrmApi) -> anyhow::Result<T> + Send + 'static,
    {
        self.run_blocking_within(
            Some(self.operation_timeout),
            default_status,
            default_code,
            operation_label,
            op,
        )
        .await
    }

    /// Runs a mutation to completion. Lock waits are bounded by the store's
    /// busy timeout, so a failure response always means nothing committed.
    async fn run_write<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(CrmApi) -> anyhow::Result<T> + Send + 'static,
    {
        self.run_blocking_within(None, default_status, default_code, operation_label, op)
            .await
    }

    async fn run_blocking_within<T, F>(
        &self,
        timeout: Option<Duration>,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(CrmApi) -> anyhow::Result<T> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let api = self.api.clone();
        let handle = tokio::task::spawn_blocking(move || op(api));
        let join_result = match timeout {
            Some(limit) => tokio::time::timeout(limit, handle).await.map_err(|_| {
                self.telemetry.record_failure(default_code, true);
                tracing::warn!(
                    operation = operation_label,
                    timeout_ms = millis(limit),
                    "operation timed out"
                );
                Self::failure(
                    default_status,
                    default_code,
                    format!("{operation_label} timed out after {} ms", limit.as_millis()),
                    Some(json!({ "timeout_ms": limit.as_millis() })),
                )
            })?,
            None => handle.await,
        };

        let op_result = join_result.map_err(|err| {
            self.telemetry.record_failure("internal_error", false);
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        match op_result {
            Ok(value) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                let failure = Self::classify_api_error(&err, default_status, default_code);
                self.telemetry.record_failure(failure.code, false);
                if failure.status.is_server_error() {
                    tracing::error!(
                        operation = operation_label,
                        code = failure.code,
                        error = %format!("{err:#}"),
                        "operation failed"
                    );
                } else {
                    tracing::debug!(
                        operation = operation_label,
                        code = failure.code,
                        error = %err,
                        "operation rejected"
                    );
                }
                Err(failure)
            }
        }
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, code: &str, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match code {
            "invalid_json" => &self.invalid_json_total,
            "validation_error" => &self.validation_error_total,
            "not_found" => &self.not_found_total,
            "write_conflict" => &self.write_conflict_total,
            "schema_unavailable" => &self.schema_unavailable_total,
            "database_busy" => &self.database_busy_total,
            "assistant_not_configured" => &self.assistant_not_configured_total,
            "upstream_failure" => &self.upstream_failure_total,
            "internal_error" => &self.internal_error_total,
            _ => &self.other_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            invalid_json_total: self.invalid_json_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            write_conflict_total: self.write_conflict_total.load(Ordering::Relaxed),
            schema_unavailable_total: self.schema_unavailable_total.load(Ordering::Relaxed),
            database_busy_total: self.database_busy_total.load(Ordering::Relaxed),
            assistant_not_configured_total: self
                .assistant_not_configured_total
                .load(Ordering::Relaxed),
            upstream_failure_total: self.upstream_failure_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
            other_error_total: self.other_error_total.load(Ordering::Relaxed),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn deleted(entity: &str) -> Json<DeleteResponse> {
    Json(DeleteResponse {
        message: format!("{entity} deleted"),
    })
}

pub fn app(state: ServiceState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/openapi", get(openapi))
        .route("/dashboard", get(dashboard))
        .route("/departments", get(list_departments).post(create_department))
        .route(
            "/departments/:id",
            get(get_department).put(update_department).delete(delete_department),
        )
        .route("/applications", get(list_applications).post(create_application))
        .route(
            "/applications/:id",
            get(get_application).put(update_application).delete(delete_application),
        )
        .route("/integrations", get(list_integrations))
        .route("/integrations/:id", get(get_integration).put(update_integration))
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        .route("/activities", get(list_activities).post(create_activity))
        .route("/activities/:id", get(get_activity).delete(delete_activity))
        .route("/incidents", get(list_incidents).post(create_incident))
        .route(
            "/incidents/:id",
            get(get_incident).put(update_incident).delete(delete_incident),
        )
        .route("/tags/categories", get(list_tag_categories))
        .route("/tags/categories/:id/tags", get(list_tags))
        .route("/chat", post(chat));
    Router::new().nest("/api", api).with_state(state)
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timeout_ms: millis(state.operation_timeout),
        assistant_timeout_ms: millis(state.assistant_timeout),
        assistant: state.api.assistant_name(),
        telemetry: state.telemetry.snapshot(),
    })
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn dashboard(
    State(state): State<ServiceState>,
) -> Result<Json<DashboardSummary>, ServiceFailure> {
    let summary = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "dashboard", |api| {
            api.with_store(|store| store.dashboard(crm_core::today_utc()))
        })
        .await?;
    Ok(Json(summary))
}

async fn list_departments(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<Department>>, ServiceFailure> {
    let departments = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "list_departments", |api| {
            api.with_store(|store| store.list_departments())
        })
        .await?;
    Ok(Json(departments))
}

async fn get_department(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Department>, ServiceFailure> {
    let department = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "get_department",
            move |api| {
                let department_id = DepartmentId::parse(&id)?;
                api.with_store(|store| store.get_department(department_id))
            },
        )
        .await?;
    Ok(Json(department))
}

async fn create_department(
    State(state): State<ServiceState>,
    payload: Result<Json<NewDepartment>, JsonRejection>,
) -> Result<(StatusCode, Json<Department>), ServiceFailure> {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let department = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "create_department",
            move |api| {
                api.with_store(|store| store.create_department(&input))
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(department)))
}

async fn update_department(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<DepartmentPatch>, JsonRejection>,
) -> Result<Json<Department>, ServiceFailure> {
    let Json(patch) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let department = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "update_department",
            move |api| {
                let department_id = DepartmentId::parse(&id)?;
                api.with_store(|store| store.update_department(department_id, &patch))
            },
        )
        .await?;
    Ok(Json(department))
}

async fn delete_department(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceFailure> {
    state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "delete_department",
            move |api| {
                let department_id = DepartmentId::parse(&id)?;
                api.with_store(|store| store.delete_department(department_id))
            },
        )
        .await?;
    Ok(deleted("Department"))
}

async fn list_applications(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<Application>>, ServiceFailure> {
    let applications = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "list_applications",
            |api| {
                api.with_store(|store| store.list_applications())
            },
        )
        .await?;
    Ok(Json(applications))
}

async fn get_application(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Application>, ServiceFailure> {
    let application = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "get_application",
            move |api| {
                let app_id = ApplicationId::parse(&id)?;
                api.with_store(|store| store.get_application(app_id))
            },
        )
        .await?;
    Ok(Json(application))
}

async fn create_application(
    State(state): State<ServiceState>,
    payload: Result<Json<NewApplication>, JsonRejection>,
) -> Result<(StatusCode, Json<Application>), ServiceFailure> {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let application = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "create_application",
            move |api| {
                api.with_store(|store| store.create_application(&input))
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn update_application(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<ApplicationPatch>, JsonRejection>,
) -> Result<Json<Application>, ServiceFailure> {
    let Json(patch) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let application = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "update_application",
            move |api| {
                let app_id = ApplicationId::parse(&id)?;
                api.with_store(|store| store.update_application(app_id, &patch))
            },
        )
        .await?;
    Ok(Json(application))
}

async fn delete_application(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceFailure> {
    state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "delete_application",
            move |api| {
                let app_id = ApplicationId::parse(&id)?;
                api.with_store(|store| store.delete_application(app_id))
            },
        )
        .await?;
    Ok(deleted("Application"))
}

async fn list_integrations(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<IntegrationStatus>>, ServiceFailure> {
    let integrations = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "list_integrations",
            |api| {
                api.with_store(|store| store.list_integrations())
            },
        )
        .await?;
    Ok(Json(integrations))
}

async fn get_integration(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<IntegrationStatus>, ServiceFailure> {
    let integration = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "get_integration",
            move |api| {
                let integration_id = IntegrationId::parse(&id)?;
                api.with_store(|store| store.get_integration(integration_id))
            },
        )
        .await?;
    Ok(Json(integration))
}

async fn update_integration(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<IntegrationPatch>, JsonRejection>,
) -> Result<Json<IntegrationStatus>, ServiceFailure> {
    let Json(patch) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let integration = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "update_integration",
            move |api| {
                let integration_id = IntegrationId::parse(&id)?;
                api.with_store(|store| store.update_integration(integration_id, &patch))
            },
        )
        .await?;
    Ok(Json(integration))
}

async fn list_contacts(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<Contact>>, ServiceFailure> {
    let contacts = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "list_contacts", |api| {
            api.with_store(|store| store.list_contacts())
        })
        .await?;
    Ok(Json(contacts))
}

async fn get_contact(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Contact>, ServiceFailure> {
    let contact = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "get_contact", move |api| {
            let contact_id = ContactId::parse(&id)?;
            api.with_store(|store| store.get_contact(contact_id))
        })
        .await?;
    Ok(Json(contact))
}

async fn create_contact(
    State(state): State<ServiceState>,
    payload: Result<Json<NewContact>, JsonRejection>,
) -> Result<(StatusCode, Json<Contact>), ServiceFailure> {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let contact = state
        .run_write(StatusCode::INTERNAL_SERVER_ERROR, "write_failed", "create_contact", move |api| {
            api.with_store(|store| store.create_contact(&input))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn update_contact(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<ContactPatch>, JsonRejection>,
) -> Result<Json<Contact>, ServiceFailure> {
    let Json(patch) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let contact = state
        .run_write(StatusCode::INTERNAL_SERVER_ERROR, "write_failed", "update_contact", move |api| {
            let contact_id = ContactId::parse(&id)?;
            api.with_store(|store| store.update_contact(contact_id, &patch))
        })
        .await?;
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceFailure> {
    state
        .run_write(StatusCode::INTERNAL_SERVER_ERROR, "write_failed", "delete_contact", move |api| {
            let contact_id = ContactId::parse(&id)?;
            api.with_store(|store| store.delete_contact(contact_id))
        })
        .await?;
    Ok(deleted("Contact"))
}

async fn list_activities(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<EngagementActivity>>, ServiceFailure> {
    let activities = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "list_activities", |api| {
            api.with_store(|store| store.list_activities())
        })
        .await?;
    Ok(Json(activities))
}

async fn get_activity(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<EngagementActivity>, ServiceFailure> {
    let activity = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "get_activity",
            move |api| {
                let activity_id = ActivityId::parse(&id)?;
                api.with_store(|store| store.get_activity(activity_id))
            },
        )
        .await?;
    Ok(Json(activity))
}

async fn create_activity(
    State(state): State<ServiceState>,
    payload: Result<Json<NewActivity>, JsonRejection>,
) -> Result<(StatusCode, Json<EngagementActivity>), ServiceFailure> {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let activity = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "create_activity",
            move |api| {
                api.with_store(|store| store.create_activity(&input))
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn delete_activity(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceFailure> {
    state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "delete_activity",
            move |api| {
                let activity_id = ActivityId::parse(&id)?;
                api.with_store(|store| store.delete_activity(activity_id))
            },
        )
        .await?;
    Ok(deleted("Activity"))
}

async fn list_incidents(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<Incident>>, ServiceFailure> {
    let incidents = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "list_incidents", |api| {
            api.with_store(|store| store.list_incidents())
        })
        .await?;
    Ok(Json(incidents))
}

async fn get_incident(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ServiceFailure> {
    let incident = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "get_incident",
            move |api| {
                let incident_id = IncidentId::parse(&id)?;
                api.with_store(|store| store.get_incident(incident_id))
            },
        )
        .await?;
    Ok(Json(incident))
}

async fn create_incident(
    State(state): State<ServiceState>,
    payload: Result<Json<NewIncident>, JsonRejection>,
) -> Result<(StatusCode, Json<Incident>), ServiceFailure> {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let incident = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "create_incident",
            move |api| {
                api.with_store(|store| store.create_incident(&input))
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(incident)))
}

async fn update_incident(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<IncidentPatch>, JsonRejection>,
) -> Result<Json<Incident>, ServiceFailure> {
    let Json(patch) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let incident = state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "update_incident",
            move |api| {
                let incident_id = IncidentId::parse(&id)?;
                api.with_store(|store| store.update_incident(incident_id, &patch))
            },
        )
        .await?;
    Ok(Json(incident))
}

async fn delete_incident(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceFailure> {
    state
        .run_write(
            StatusCode::INTERNAL_SERVER_ERROR,
            "write_failed",
            "delete_incident",
            move |api| {
                let incident_id = IncidentId::parse(&id)?;
                api.with_store(|store| store.delete_incident(incident_id))
            },
        )
        .await?;
    Ok(deleted("Incident"))
}

async fn list_tag_categories(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<TagCategory>>, ServiceFailure> {
    let categories = state
        .run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            "list_tag_categories",
            |api| {
                api.with_store(|store| store.list_tag_categories())
            },
        )
        .await?;
    Ok(Json(categories))
}

async fn list_tags(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Tag>>, ServiceFailure> {
    let tags = state
        .run_blocking(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", "list_tags", move |api| {
            let category_id = TagCategoryId::parse(&id)?;
            api.with_store(|store| store.list_tags(category_id))
        })
        .await?;
    Ok(Json(tags))
}

async fn chat(
    State(state): State<ServiceState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ServiceFailure> {
    let Json(request) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    let response = state
        .run_blocking_within(
            Some(state.assistant_timeout),
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream_failure",
            "chat",
            move |api| api.chat(&request),
        )
        .await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use crm_assistant::{AssistantProvider, MockProvider};
    use http::Request;
    use serde_json::Value;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("crm-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_state(assistant: Option<Arc<dyn AssistantProvider>>, timeout_ms: u64) -> ServiceState {
        let api = CrmApi::new(unique_temp_db_path(), assistant);
        if let Err(err) = api.migrate() {
            panic!("failed to migrate test database: {err:#}");
        }
        ServiceState::new(api, Duration::from_millis(timeout_ms), Duration::from_millis(timeout_ms))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string())),
            None => builder.body(axum::body::Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = send(router, method, uri, body).await;
        let status = response.status();
        (status, response_json(response).await)
    }

    fn id_of(value: &Value, field: &str) -> String {
        match value.get(field).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => panic!("missing {field} in {value}"),
        }
    }

    fn cleanup(state: &ServiceState) {
        let _ = std::fs::remove_file(state.api.db_path());
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let (status, value) = call(&router, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["assistant"], Value::Null);
        assert_eq!(value["telemetry"]["requests_total"], 0);
        cleanup(&state);
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_contract() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let response = send(&router, "GET", "/api/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("/api/dashboard"));
        assert!(body.contains("/api/chat"));
        assert!(body.contains("ErrorEnvelope"));
        cleanup(&state);
    }

    #[tokio::test]
    async fn application_lifecycle_creates_integration_and_cascades() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let (status, department) = call(
            &router,
            "POST",
            "/api/departments",
            Some(json!({"name": "Immigration", "short_name": "IRCC", "tier": "critical"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(department["acronym"], "IRCC");
        assert_eq!(department["status"], "active");
        let department_id = id_of(&department, "department_id");

        let (status, application) = call(
            &router,
            "POST",
            "/api/applications",
            Some(json!({
                "department_id": department_id,
                "app_name": "Visa Portal",
                "auth_type": ["GC Key", "Interact Sign In"],
                "go_live_date": "not-a-date"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(application["auth_type"], "GC Key,Interact Sign In");
        assert_eq!(application["go_live_date"], Value::Null);
        assert_eq!(application["department_name"], "Immigration");
        let app_id = id_of(&application, "app_id");

        let (_, integrations) = call(&router, "GET", "/api/integrations", None).await;
        assert_eq!(integrations.as_array().map(Vec::len), Some(1));
        assert_eq!(integrations[0]["stage"], "intake");
        assert_eq!(integrations[0]["status"], "on_track");
        assert_eq!(integrations[0]["risk_level"], "low");
        assert_eq!(integrations[0]["app_name"], "Visa Portal");

        let (_, listed) =
            call(&router, "GET", &format!("/api/departments/{department_id}"), None).await;
        assert_eq!(listed["app_count"], 1);

        let (status, message) =
            call(&router, "DELETE", &format!("/api/departments/{department_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(message, json!({"message": "Department deleted"}));

        let (status, missing) =
            call(&router, "GET", &format!("/api/applications/{app_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["status"], "error");
        assert_eq!(missing["code"], "not_found");
        assert_eq!(missing["error"], "Application not found");
        cleanup(&state);
    }

    #[tokio::test]
    async fn partial_update_and_incident_resolution() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let body = json!({"name": "Health", "owner_team": "Alpha"});
        let (_, department) = call(&router, "POST", "/api/departments", Some(body)).await;
        let department_id = id_of(&department, "department_id");
        let (status, updated) = call(
            &router,
            "PUT",
            &format!("/api/departments/{department_id}"),
            Some(json!({"status": "inactive"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "inactive");
        assert_eq!(updated["owner_team"], "Alpha");
        assert_eq!(updated["name"], "Health");

        let (_, application) = call(
            &router,
            "POST",
            "/api/applications",
            Some(json!({
                "department_id": department_id,
                "app_name": "Benefits",
                "auth_type": "GCCF Consolidator"
            })),
        )
        .await;
        assert_eq!(application["auth_type"], "GCCF Consolidator");
        let app_id = id_of(&application, "app_id");

        let (status, incident) = call(
            &router,
            "POST",
            "/api/incidents",
            Some(json!({"app_id": app_id, "severity": "high"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(incident["status"], "open");
        assert_eq!(incident["resolved_at"], Value::Null);
        let incident_id = id_of(&incident, "incident_id");
        let uri = format!("/api/incidents/{incident_id}");

        let (_, resolved) = call(&router, "PUT", &uri, Some(json!({"status": "resolved"}))).await;
        let resolved_at = resolved["resolved_at"].clone();
        assert!(resolved_at.is_string());

        let (_, edited) = call(&router, "PUT", &uri, Some(json!({"severity": "low"}))).await;
        assert_eq!(edited["resolved_at"], resolved_at);
        let (_, closed) = call(&router, "PUT", &uri, Some(json!({"status": "closed"}))).await;
        assert_eq!(closed["resolved_at"], resolved_at);
        cleanup(&state);
    }

    #[tokio::test]
    async fn dashboard_counts_seeded_portfolio() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let mut departments = Vec::new();
        let tiers = ["critical", "critical", "critical", "standard", "standard", "standard"];
        for (index, tier) in tiers.into_iter().enumerate() {
            let (_, department) = call(
                &router,
                "POST",
                "/api/departments",
                Some(json!({"name": format!("Department {index}"), "tier": tier})),
            )
            .await;
            departments.push(id_of(&department, "department_id"));
        }
        let statuses = ["live"; 7].into_iter().chain(["integrating"; 2]).chain(["deprecated"]);
        for (index, status) in statuses.enumerate() {
            let (code, _) = call(
                &router,
                "POST",
                "/api/applications",
                Some(json!({
                    "department_id": departments[index % departments.len()],
                    "app_name": format!("App {index}"),
                    "status": status
                })),
            )
            .await;
            assert_eq!(code, StatusCode::CREATED);
        }

        let (status, summary) = call(&router, "GET", "/api/dashboard", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["departments"]["total"], 6);
        assert_eq!(summary["departments"]["critical"], 3);
        assert_eq!(summary["departments"]["active"], 6);
        assert_eq!(summary["applications"]["total"], 10);
        assert_eq!(summary["applications"]["live"], 7);
        assert_eq!(summary["applications"]["integrating"], 2);
        assert_eq!(summary["risk"]["high_risk"], 0);
        assert_eq!(summary["incidents"]["open"], 0);
        cleanup(&state);
    }

    #[tokio::test]
    async fn write_errors_map_to_taxonomy() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let (status, missing_name) =
            call(&router, "POST", "/api/departments", Some(json!({"tier": "standard"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(missing_name["code"], "validation_error");

        let orphan = ulid::Ulid::new().to_string();
        let (status, orphaned) = call(
            &router,
            "POST",
            "/api/contacts",
            Some(json!({"department_id": orphan, "name": "Alex"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(orphaned["error"], "Department not found");

        let (status, bad_id) = call(&router, "GET", "/api/incidents/not-a-ulid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(bad_id["code"], "not_found");

        let response = send(&router, "POST", "/api/departments", None).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let value = response_json(response).await;
        assert_eq!(value["code"], "invalid_json");

        let (_, health) = call(&router, "GET", "/api/health", None).await;
        assert_eq!(health["telemetry"]["validation_error_total"], 1);
        assert_eq!(health["telemetry"]["not_found_total"], 2);
        assert_eq!(health["telemetry"]["invalid_json_total"], 1);
        cleanup(&state);
    }

    fn hold_write_lock(path: &std::path::Path, hold: Duration) -> std::thread::JoinHandle<()> {
        let holder = match rusqlite::Connection::open(path) {
            Ok(conn) => conn,
            Err(err) => panic!("failed to open lock holder: {err}"),
        };
        if let Err(err) = holder.execute_batch("BEGIN IMMEDIATE;") {
            panic!("failed to take write lock: {err}");
        }
        std::thread::spawn(move || {
            std::thread::sleep(hold);
            if let Err(err) = holder.execute_batch("COMMIT;") {
                panic!("failed to release write lock: {err}");
            }
        })
    }

    #[tokio::test]
    async fn write_waiting_on_lock_reports_its_commit() {
        let state = test_state(None, 200);
        let router = app(state.clone());
        let holder = hold_write_lock(state.api.db_path(), Duration::from_millis(800));

        let (status, department) =
            call(&router, "POST", "/api/departments", Some(json!({"name": "Treasury"}))).await;
        assert_eq!(status, StatusCode::CREATED, "{department}");
        assert_eq!(department["name"], "Treasury");
        assert!(holder.join().is_ok());

        let (_, listed) = call(&router, "GET", "/api/departments", None).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(state.telemetry.snapshot().timeout_total, 0);
        cleanup(&state);
    }

    #[tokio::test]
    async fn lock_outlasting_busy_timeout_is_reported_as_busy() {
        let mut state = test_state(None, 2500);
        state.api = state.api.clone().with_busy_timeout(Duration::from_millis(100));
        let router = app(state.clone());

        let (_, department) =
            call(&router, "POST", "/api/departments", Some(json!({"name": "Finance"}))).await;
        let uri = format!("/api/departments/{}", id_of(&department, "department_id"));
        let holder = hold_write_lock(state.api.db_path(), Duration::from_millis(600));

        let (status, value) = call(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["code"], "database_busy");
        assert!(value["error"]
            .as_str()
            .is_some_and(|error| error.contains("database is locked")));
        assert!(holder.join().is_ok());

        let (status, kept) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(kept["name"], "Finance");

        let (_, health) = call(&router, "GET", "/api/health", None).await;
        assert_eq!(health["telemetry"]["database_busy_total"], 1);
        assert_eq!(health["telemetry"]["schema_unavailable_total"], 0);
        cleanup(&state);
    }

    #[tokio::test]
    async fn tag_registry_is_seeded_and_ordered() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let (status, categories) = call(&router, "GET", "/api/tags/categories", None).await;
        assert_eq!(status, StatusCode::OK);
        let categories = categories.as_array().cloned().unwrap_or_default();
        assert_eq!(categories.len(), 9);
        let stage = categories
            .iter()
            .find(|category| category["name"] == "integration_stage")
            .cloned()
            .unwrap_or_else(|| panic!("integration_stage category missing"));
        assert_eq!(stage["tag_count"], 5);

        let uri = format!("/api/tags/categories/{}/tags", id_of(&stage, "category_id"));
        let (_, tags) = call(&router, "GET", &uri, None).await;
        let values: Vec<_> = tags
            .as_array()
            .map(|tags| tags.iter().map(|tag| tag["value"].clone()).collect())
            .unwrap_or_default();
        assert_eq!(
            values,
            vec![
                json!("intake"),
                json!("design"),
                json!("implementation"),
                json!("testing"),
                json!("production")
            ]
        );
        cleanup(&state);
    }

    #[tokio::test]
    async fn chat_requires_configured_assistant() {
        let state = test_state(None, 2500);
        let router = app(state.clone());

        let (status, value) =
            call(&router, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["status"], "error");
        assert_eq!(value["code"], "assistant_not_configured");
        assert!(value["error"].as_str().is_some_and(|error| error.contains("GEMINI_API_KEY")));
        cleanup(&state);
    }

    #[tokio::test]
    async fn chat_returns_reply_verbatim_with_history() {
        let reply = "Two departments are critical.\n```chart\n\
            {\"type\":\"pie\",\"title\":\"Tiers\",\"labels\":[\"Critical\",\"Standard\"],\
            \"datasets\":[{\"data\":[2,1]}]}\n```";
        let provider = Arc::new(MockProvider::with_reply(reply));
        let state = test_state(Some(Arc::clone(&provider) as Arc<dyn AssistantProvider>), 2500);
        let router = app(state.clone());

        let (status, value) = call(
            &router,
            "POST",
            "/api/chat",
            Some(json!({
                "message": "show me a pie chart of tiers",
                "history": [
                    {"role": "user", "content": "hello"},
                    {"role": "model", "content": "Hi, how can I help?"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!({"response": reply, "status": "success"}));

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].history_len(), 2);
        assert_eq!(
            calls[0].latest().map(|turn| turn.content.as_str()),
            Some("show me a pie chart of tiers")
        );

        let (status, empty) =
            call(&router, "POST", "/api/chat", Some(json!({"history": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(empty["error"], "No message provided");
        cleanup(&state);
    }

    #[tokio::test]
    async fn chat_upstream_failure_is_surfaced() {
        let provider: Arc<dyn AssistantProvider> =
            Arc::new(MockProvider::failing("quota exceeded"));
        let state = test_state(Some(provider), 2500);
        let router = app(state.clone());

        let (status, value) =
            call(&router, "POST", "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            value,
            json!({"status": "error", "error": "quota exceeded", "code": "upstream_failure"})
        );
        cleanup(&state);
    }

    #[tokio::test]
    async fn unmigrated_database_reports_schema_unavailable() {
        let db_path = std::env::temp_dir()
            .join(format!("crm-service-missing-parent-{}/db.sqlite3", ulid::Ulid::new()));
        let state = ServiceState::new(
            CrmApi::new(db_path, None),
            Duration::from_millis(2500),
            Duration::from_millis(2500),
        );
        let router = app(state);

        let (status, value) = call(&router, "GET", "/api/departments", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(value["code"], "schema_unavailable");
    }
}
