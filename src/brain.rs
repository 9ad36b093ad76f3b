use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::{DEFAULT_PROVIDER, SettingsStore};
use crate::types::{Action, ActionKind, Decision, ModelRequest, PageSnapshot, ScrollDirection};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = r#"You are WebCursor Agent. You operate the web page described in the user message by proposing UI actions. Return STRICT JSON only.

JSON schema:
{
  "thought": "short non-sensitive reasoning",
  "actions": [
    {
      "type": "click|type|scroll|wait|keypress|navigate|select",
      "targetElementId": "el_123",
      "text": "...",
      "key": "Enter|Tab|ArrowDown|...",
      "direction": "up|down",
      "amount": 120,
      "duration": 500,
      "url": "https://example.com",
      "note": "human-readable step label"
    }
  ],
  "done": false,
  "finalMessage": "..."
}

Rules:
1. Return ONLY the JSON object. No markdown, no explanation.
2. Target elements with the "id" values from snapshot.elements (el_0, el_1, ...). They are only valid for the snapshot you were given.
3. Set "done": true with a "finalMessage" once the task is accomplished.
4. Keep batches short; the page is re-observed after every batch."#;

const DEMO_TEXT: &str = "Hello from WebCursor Agent";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API key missing. Set it in options.")]
    MissingApiKey,

    #[error("Only OpenAI provider is configured.")]
    UnsupportedProvider(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI error: {status} {message}")]
    Api { status: u16, message: String },

    /// The reply could not be used as a decision.
    #[error("Model response invalid: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn is_invalid_response(&self) -> bool {
        matches!(self, ClientError::InvalidResponse(_))
    }
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn decide(&self, request: &ModelRequest) -> Result<Decision, ClientError>;
}

/// Parse a raw model reply into a [`Decision`].
///
/// Markdown fences are tolerated; anything that is not a JSON object with an
/// `actions` array is rejected.
pub fn parse_decision(content: &str) -> Result<Decision, ClientError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(cleaned)
        .map_err(|_| ClientError::InvalidResponse("Model response was not valid JSON.".into()))?;

    if !value.get("actions").is_some_and(Value::is_array) {
        return Err(ClientError::InvalidResponse(
            "Model response did not match expected format.".into(),
        ));
    }

    serde_json::from_value(value).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

/// Scripted three-iteration walkthrough that needs no model.
pub fn demo_decision(snapshot: &PageSnapshot, iteration: u32) -> Decision {
    let mut actions = Vec::new();
    match iteration {
        0 => {
            let mut scroll = Action::new(ActionKind::Scroll).with_note("Scroll down (demo)");
            scroll.direction = Some(ScrollDirection::Down);
            scroll.amount = Some(400.0);
            actions.push(scroll);
        }
        1 => {
            if let Some(input) = snapshot
                .elements
                .iter()
                .find(|el| el.tag == "input" || el.tag == "textarea")
            {
                actions.push(
                    Action::new(ActionKind::Type)
                        .targeting(input.id.clone())
                        .with_text(DEMO_TEXT)
                        .with_note("Type in first input (demo)"),
                );
            }
        }
        _ => {
            if let Some(link) = snapshot.elements.iter().find(|el| el.tag == "a") {
                actions.push(
                    Action::new(ActionKind::Click)
                        .targeting(link.id.clone())
                        .with_note("Click first link (demo)"),
                );
            }
        }
    }

    let done = iteration >= 2;
    Decision {
        thought: "Demo mode action".to_string(),
        actions,
        done,
        final_message: if done { "Demo complete".to_string() } else { String::new() },
    }
}

/// Chat-completions client for one OpenAI model.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: OPENAI_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn messages(request: &ModelRequest) -> Value {
        let user = json!({
            "task": request.task,
            "snapshot": request.snapshot,
            "stepCount": request.step_count,
            "maxSteps": request.max_steps,
        });
        json!([
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user.to_string()},
        ])
    }

    pub async fn complete(&self, request: &ModelRequest) -> Result<Decision, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": Self::messages(request),
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("OpenAI API error ({}): {}", status, message);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json_resp: Value = response.json().await?;
        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        debug!("Model says: {}", content);

        parse_decision(content)
    }
}

/// The reasoning client the agent uses: routes demo runs to the scripted
/// planner and everything else to the configured provider.
pub struct Brain {
    settings: Arc<SettingsStore>,
    env_api_key: Option<String>,
}

impl Brain {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            env_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }

    pub fn with_env_key(mut self, key: Option<String>) -> Self {
        self.env_api_key = key;
        self
    }
}

#[async_trait]
impl ReasoningClient for Brain {
    async fn decide(&self, request: &ModelRequest) -> Result<Decision, ClientError> {
        if request.demo_mode {
            return Ok(demo_decision(&request.snapshot, request.iteration));
        }

        let settings = self.settings.get();
        let api_key = self
            .env_api_key
            .clone()
            .or_else(|| Some(settings.api_key.clone()).filter(|k| !k.is_empty()))
            .ok_or(ClientError::MissingApiKey)?;
        if settings.provider != DEFAULT_PROVIDER {
            return Err(ClientError::UnsupportedProvider(settings.provider));
        }

        OpenAiClient::new(api_key, settings.model).complete(request).await
    }
}
