#![forbid(unsafe_code)]

//! Conversation contract between the CRM and an external language model.
//!
//! A chat turn is framed as an opening synthetic exchange (the preamble and
//! the context snapshot sent as a user turn, answered by a fixed
//! acknowledgement), followed by the caller's prior turns and the new
//! message. Replies are prose, optionally carrying one fenced chart block;
//! see [`parse_reply`].

use std::sync::Mutex;

use anyhow::Result;
use crm_core::CrmError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod chart;
mod gemini;

pub use chart::{
    parse_reply, AssistantReply, ChartDataset, ChartSpec, ChartType, ReplyContractError,
};
pub use gemini::{GeminiConfig, GeminiProvider, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

/// Instructions sent ahead of the context snapshot on every turn.
pub const SYSTEM_PREAMBLE: &str = r##"You are the assistant for the CRM of a government identity sign-in service.
You answer questions about the departments the service supports, their applications,
integration progress, contacts, engagement activities, and incidents.

The current database state follows as JSON:
- departments: tier (critical or standard), status (active or inactive), owner team
- applications: systems that sign users in through the service, with environment, auth type and status
- integrations: onboarding stage (intake, design, implementation, testing, production), health and risk level
- contacts: people at each department, each with a business, technical or security role
- recent_activities: the most recent meetings, emails, workshops and incidents, newest first
- incidents: application incidents with severity critical, high, medium or low

Answer concisely and only from this data. Refer to records by name.
Use bullet points when listing several items.

Charts:
When the user asks for a chart, graph or any other visual, include exactly one block
that opens with ```chart and closes with ```. The block holds one JSON object:

```chart
{
  "type": "bar",
  "title": "Departments by Tier",
  "labels": ["Critical", "Standard"],
  "datasets": [{
    "label": "Departments",
    "data": [3, 3],
    "backgroundColor": ["#E74C3C", "#3498DB"]
  }]
}
```

"type" is one of bar, pie, line or doughnut. "label" and "backgroundColor" are optional.
Every dataset's "data" has exactly one number per entry in "labels".
Always explain the chart in prose as well. Never reply with the chart block alone."##;

/// Synthetic model turn that closes the framing exchange.
pub const FRAMING_ACKNOWLEDGEMENT: &str = "Understood. I have the current CRM data and can answer \
questions about departments, applications, integrations, contacts, activities and incidents, \
and draw charts when asked. What would you like to know?";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    #[serde(alias = "model")]
    Assistant,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
}

impl ChatTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered turns handed to a provider. The last turn is always the user's
/// new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    #[must_use]
    pub fn latest(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    /// Turns supplied by the caller, excluding the framing exchange and the
    /// new message.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.turns.len().saturating_sub(3)
    }

    /// Stable hash of every role and content, for correlating log lines.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for turn in &self.turns {
            hasher.update(turn.role.as_str().as_bytes());
            hasher.update([0]);
            hasher.update(turn.content.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Text of the opening user turn carrying the preamble and the snapshot.
#[must_use]
pub fn framing_text(context_json: &str) -> String {
    format!(
        "[System context - do not repeat this]\n{SYSTEM_PREAMBLE}\n\nCurrent Database State:\n{context_json}\n"
    )
}

/// # Errors
/// Returns [`CrmError::Validation`] when `message` is empty or whitespace.
pub fn require_message(message: &str) -> Result<(), CrmError> {
    if message.trim().is_empty() {
        return Err(CrmError::Validation("No message provided".to_string()));
    }
    Ok(())
}

/// Builds the full turn sequence for one chat request.
///
/// # Errors
/// Returns [`CrmError::Validation`] when `message` is empty or whitespace.
pub fn compose_conversation(
    context_json: &str,
    history: &[ChatTurn],
    message: &str,
) -> Result<Conversation, CrmError> {
    require_message(message)?;

    let mut turns = Vec::with_capacity(history.len() + 3);
    turns.push(ChatTurn::user(framing_text(context_json)));
    turns.push(ChatTurn::assistant(FRAMING_ACKNOWLEDGEMENT));
    turns.extend(history.iter().cloned());
    turns.push(ChatTurn::user(message));
    Ok(Conversation { turns })
}

pub trait AssistantProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Sends the conversation and returns the model's reply text verbatim.
    #[allow(clippy::missing_errors_doc)]
    fn complete(&self, conversation: &Conversation) -> Result<String>;
}

/// In-process provider returning a canned or fingerprint-derived reply.
#[derive(Debug, Default)]
pub struct MockProvider {
    reply: Option<String>,
    failure: Option<String>,
    calls: Mutex<Vec<Conversation>>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Conversations received so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<Conversation> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AssistantProvider for MockProvider {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn complete(&self, conversation: &Conversation) -> Result<String> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(conversation.clone()),
            Err(poisoned) => poisoned.into_inner().push(conversation.clone()),
        }
        if let Some(message) = &self.failure {
            return Err(anyhow::anyhow!("{message}"));
        }
        Ok(self.reply.clone().unwrap_or_else(|| {
            let fingerprint = conversation.fingerprint();
            format!("mock:{}", fingerprint.chars().take(16).collect::<String>())
        }))
    }
}
