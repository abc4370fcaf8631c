use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crm_assistant::{
    compose_conversation, parse_reply, require_message, AssistantProvider, ChatTurn,
};
use crm_core::CrmError;
use crm_store_sqlite::{SqliteCrmStore, DEFAULT_BUSY_TIMEOUT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub response: String,
    pub status: &'static str,
}

/// Entry point shared by every handler. Each call opens its own store, so a
/// request is one unit of work and nothing is held between requests.
#[derive(Clone)]
pub struct CrmApi {
    db_path: PathBuf,
    busy_timeout: Duration,
    assistant: Option<Arc<dyn AssistantProvider>>,
}

impl fmt::Debug for CrmApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmApi")
            .field("db_path", &self.db_path)
            .field("busy_timeout", &self.busy_timeout)
            .field("assistant", &self.assistant_name())
            .finish()
    }
}

impl CrmApi {
    pub fn new(db_path: PathBuf, assistant: Option<Arc<dyn AssistantProvider>>) -> Self {
        Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            assistant,
        }
    }

    /// Bounds how long a write waits on another connection's lock before
    /// failing with `database is locked`.
    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn assistant_name(&self) -> Option<&'static str> {
        self.assistant.as_ref().map(|assistant| assistant.provider_name())
    }

    /// Brings the schema up to date and seeds the tag registry once.
    pub fn migrate(&self) -> Result<Option<i64>> {
        let mut store = SqliteCrmStore::open_with_busy_timeout(&self.db_path, self.busy_timeout)?;
        store.migrate()?;
        store.schema_version()
    }

    pub fn with_store<T>(&self, op: impl FnOnce(&mut SqliteCrmStore) -> Result<T>) -> Result<T> {
        let mut store = SqliteCrmStore::open_with_busy_timeout(&self.db_path, self.busy_timeout)?;
        op(&mut store)
    }

    /// One assistant turn over a fresh context snapshot. The reply text is
    /// returned unchanged; contract violations are only logged.
    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let Some(assistant) = &self.assistant else {
            return Err(CrmError::Configuration(
                "Gemini API key not configured. Set GEMINI_API_KEY to enable the assistant."
                    .to_string(),
            )
            .into());
        };
        require_message(&request.message)?;

        let snapshot = self.with_store(|store| store.context_snapshot())?;
        let context_json = snapshot.to_context_json()?;
        let conversation = compose_conversation(&context_json, &request.history, &request.message)?;
        let fingerprint = conversation.fingerprint();

        let started = Instant::now();
        let reply = assistant.complete(&conversation).map_err(|err| {
            tracing::error!(
                provider = assistant.provider_name(),
                %fingerprint,
                error = %format!("{err:#}"),
                "assistant call failed"
            );
            CrmError::Upstream(format!("{err:#}"))
        })?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match parse_reply(&reply) {
            Ok(parsed) => {
                tracing::debug!(%fingerprint, has_chart = parsed.chart.is_some(), "reply parsed");
            }
            Err(violation) => {
                tracing::warn!(
                    %fingerprint,
                    %violation,
                    "assistant reply breaks the chart contract"
                );
            }
        }
        tracing::info!(
            provider = assistant.provider_name(),
            %fingerprint,
            history_len = conversation.history_len(),
            context_bytes = context_json.len(),
            reply_bytes = reply.len(),
            elapsed_ms,
            "assistant reply received"
        );

        Ok(ChatResponse {
            response: reply,
            status: "success",
        })
    }
}
