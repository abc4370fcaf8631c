use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use crate::{AssistantProvider, ChatRole, Conversation};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl GeminiConfig {
    /// Returns `None` when no usable API key is present; the assistant is
    /// then unconfigured.
    #[must_use]
    pub fn from_parts(
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout_ms: u64,
    ) -> Option<Self> {
        let api_key = api_key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty())?;
        Some(Self {
            api_key,
            model: model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: base_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            timeout_ms,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Blocking client for the Gemini `generateContent` API. One request per
/// call and no retries.
#[derive(Debug)]
pub struct GeminiProvider {
    config: GeminiConfig,
    agent: ureq::Agent,
}

impl GeminiProvider {
    #[must_use]
    pub fn new(config: GeminiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self { config, agent }
    }

    #[must_use]
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

impl AssistantProvider for GeminiProvider {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn complete(&self, conversation: &Conversation) -> Result<String> {
        let body = request_body(conversation);
        tracing::debug!(
            model = %self.config.model,
            turns = conversation.turns().len(),
            "sending gemini generateContent request"
        );
        let response = self
            .agent
            .post(&self.config.endpoint())
            .set("content-type", "application/json")
            .set("x-goog-api-key", &self.config.api_key)
            .send_json(&body);

        match response {
            Ok(response) => {
                let payload: Value = response.into_json()?;
                extract_reply(&payload)
            }
            Err(ureq::Error::Status(code, response)) => {
                let payload = response.into_json::<Value>().unwrap_or(Value::Null);
                Err(anyhow::anyhow!(
                    "gemini request failed with http status {code}: {}",
                    error_message(&payload)
                ))
            }
            Err(ureq::Error::Transport(err)) => {
                Err(anyhow::anyhow!("gemini transport failure: {err}"))
            }
        }
    }
}

fn request_body(conversation: &Conversation) -> Value {
    let contents: Vec<Value> = conversation
        .turns()
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            json!({
                "role": role,
                "parts": [{ "text": turn.content }],
            })
        })
        .collect();
    json!({ "contents": contents })
}

fn extract_reply(payload: &Value) -> Result<String> {
    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        let reason = payload
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .unwrap_or("no candidates returned");
        return Err(anyhow::anyhow!("gemini returned no reply: {reason}"));
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("empty content");
        return Err(anyhow::anyhow!("gemini returned no reply text: {reason}"));
    }
    Ok(text)
}

fn error_message(payload: &Value) -> String {
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map_or_else(|| "no error details".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compose_conversation, ChatTurn};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn fixture_config(base_url: &str) -> GeminiConfig {
        match GeminiConfig::from_parts(
            Some("test-key".to_string()),
            Some("test-model".to_string()),
            Some(base_url.to_string()),
            2_000,
        ) {
            Some(config) => config,
            None => panic!("fixture config should be configured"),
        }
    }

    /// Serves one canned HTTP response and hands back the raw request.
    fn serve_once(status: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
        let listener = must_ok(TcpListener::bind("127.0.0.1:0"));
        let address = must_ok(listener.local_addr());
        let handle = thread::spawn(move || {
            let (mut stream, _) = must_ok(listener.accept());
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = must_ok(stream.read(&mut buffer));
                request.extend_from_slice(&buffer[..read]);
                if read == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            must_ok(stream.write_all(response.as_bytes()));
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{address}"), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    #[test]
    fn empty_or_missing_key_leaves_assistant_unconfigured() {
        assert_eq!(GeminiConfig::from_parts(None, None, None, 1_000), None);
        assert_eq!(GeminiConfig::from_parts(Some("  ".to_string()), None, None, 1_000), None);

        let config =
            GeminiConfig::from_parts(Some("key".to_string()), None, Some(String::new()), 1_000);
        assert_eq!(
            config.map(|config| config.endpoint()),
            Some(format!(
                "{DEFAULT_GEMINI_BASE_URL}/v1beta/models/{DEFAULT_GEMINI_MODEL}:generateContent"
            ))
        );
    }

    #[test]
    fn request_body_maps_roles_in_order() {
        let history = [ChatTurn::assistant("earlier")];
        let conversation = must_ok(compose_conversation("{}", &history, "now"));
        let body = request_body(&conversation);
        let roles: Vec<_> = body["contents"]
            .as_array()
            .map(|contents| contents.iter().map(|turn| turn["role"].clone()).collect())
            .unwrap_or_default();
        assert_eq!(roles, vec![json!("user"), json!("model"), json!("model"), json!("user")]);
        assert_eq!(body["contents"][3]["parts"][0]["text"], json!("now"));
    }

    #[test]
    fn reply_text_concatenates_parts() {
        let payload = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "Six departments"}, {"text": " are active."}]
                },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(must_ok(extract_reply(&payload)), "Six departments are active.");
    }

    #[test]
    fn blocked_or_empty_replies_are_errors() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(matches!(extract_reply(&blocked), Err(err) if err.to_string().contains("SAFETY")));

        let empty = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
        });
        assert!(matches!(
            extract_reply(&empty),
            Err(err) if err.to_string().contains("MAX_TOKENS")
        ));
    }

    #[test]
    fn provider_posts_conversation_and_reads_reply() {
        let body =
            json!({"candidates": [{"content": {"parts": [{"text": "All clear."}]}}]}).to_string();
        let (base_url, server) = serve_once("200 OK", body);
        let provider = GeminiProvider::new(fixture_config(&base_url));
        let conversation = must_ok(compose_conversation("{}", &[], "Any incidents?"));

        let reply = must_ok(provider.complete(&conversation));
        assert_eq!(reply, "All clear.");

        let request = match server.join() {
            Ok(request) => request,
            Err(_) => panic!("fixture server panicked"),
        };
        assert!(request.starts_with("POST /v1beta/models/test-model:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("Any incidents?"));
    }

    #[test]
    fn http_failure_surfaces_upstream_message() {
        let body = json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })
        .to_string();
        let (base_url, server) = serve_once("400 Bad Request", body);
        let provider = GeminiProvider::new(fixture_config(&base_url));
        let conversation = must_ok(compose_conversation("{}", &[], "hello"));

        match provider.complete(&conversation) {
            Ok(reply) => panic!("expected failure, got {reply}"),
            Err(err) => {
                let message = err.to_string();
                assert!(message.contains("400"), "{message}");
                assert!(message.contains("API key not valid"), "{message}");
            }
        }
        assert!(server.join().is_ok());
    }
}
