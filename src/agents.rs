use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ConnectionConfig, TEXT_TO_SQL_TOOL_TYPE};

const USER_AGENT: &str = "Snowflake-Agent-Chat/0.1.0";
const DONE_SENTINEL: &str = "[DONE]";

// ============================================================================
// Request Types (matching the Cortex Agents run API)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum MessageContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl Message {
    pub fn new_user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![MessageContent::Text {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Tool {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolResource {
    pub semantic_model_file: String,
}

/// One request per semantic model per user turn. Never mutated after send.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AgentRunRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub tool_resources: HashMap<String, ToolResource>,
}

impl AgentRunRequest {
    pub fn for_semantic_model(config: &AgentConfig, query: &str, semantic_model: &str) -> Self {
        let mut tool_resources = HashMap::new();
        tool_resources.insert(
            config.tool_name.clone(),
            ToolResource {
                semantic_model_file: semantic_model.to_string(),
            },
        );

        Self {
            model: config.model.clone(),
            messages: vec![Message::new_user(query)],
            tools: vec![Tool {
                tool_spec: ToolSpec {
                    tool_type: TEXT_TO_SQL_TOOL_TYPE.to_string(),
                    name: config.tool_name.clone(),
                },
            }],
            tool_resources,
        }
    }

    pub fn semantic_model(&self) -> Option<&str> {
        self.tool_resources
            .values()
            .next()
            .map(|r| r.semantic_model_file.as_str())
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Error making request: {0}")]
    Transport(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u128),

    #[error("Cortex Agents API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse API response. The server may have returned an invalid JSON format: {0}")]
    Decode(String),
}

/// Raw reply from the agent endpoint, before any decoding.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl AgentReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_event_stream(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = self.body.trim_start();
        declared || body.starts_with("event:") || body.starts_with("data:")
    }
}

#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn run(&self, request: &AgentRunRequest) -> Result<AgentReply, AgentError>;
}

pub struct AgentsClient {
    http: reqwest::Client,
    url: String,
    token: String,
    timeout_ms: u128,
}

impl AgentsClient {
    pub fn new(connection: &ConnectionConfig, config: &AgentConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}{}", connection.base_url(), config.endpoint),
            token: connection.agent_token().to_string(),
            timeout_ms: config.timeout.as_millis(),
        })
    }
}

#[async_trait]
impl AgentApi for AgentsClient {
    async fn run(&self, request: &AgentRunRequest) -> Result<AgentReply, AgentError> {
        if let Ok(body) = serde_json::to_string_pretty(request) {
            debug!(url = %self.url, "agent request body:\n{}", body);
        }

        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout(self.timeout_ms)
                } else {
                    AgentError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(self.timeout_ms)
            } else {
                AgentError::Transport(format!("Failed to read response: {}", e))
            }
        })?;

        Ok(AgentReply {
            status,
            content_type,
            body,
        })
    }
}

// ============================================================================
// Body decoding
// ============================================================================

/// Decode an agent reply into a JSON value.
///
/// Event-stream bodies become an array of `{"event": name, "data": payload}`
/// objects, which is the same shape a JSON body from the API carries.
pub async fn decode_reply(reply: &AgentReply) -> Result<Value, AgentError> {
    if reply.is_event_stream() {
        decode_event_stream(&reply.body).await
    } else {
        serde_json::from_str(&reply.body).map_err(|e| AgentError::Decode(e.to_string()))
    }
}

async fn decode_event_stream(body: &str) -> Result<Value, AgentError> {
    // The parser only emits an event once its terminating blank line is seen.
    let mut framed = body.replace("\r\n", "\n");
    if !framed.ends_with("\n\n") {
        framed.push_str(if framed.ends_with('\n') { "\n" } else { "\n\n" });
    }

    let chunks = futures::stream::iter(vec![Ok::<_, std::convert::Infallible>(
        framed.into_bytes(),
    )]);
    let mut events = chunks.eventsource();
    let mut decoded = Vec::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| AgentError::Decode(e.to_string()))?;
        if event.data.trim() == DONE_SENTINEL {
            continue;
        }
        match serde_json::from_str::<Value>(&event.data) {
            Ok(data) => decoded.push(json!({ "event": event.event, "data": data })),
            Err(e) => debug!(event = %event.event, error = %e, "skipping non-JSON event data"),
        }
    }

    Ok(Value::Array(decoded))
}

// ============================================================================
// Dispatch
// ============================================================================

/// Ask every configured semantic model the same question, one at a time and
/// in configuration order. Any failure aborts the whole dispatch; callers
/// never see a partial list.
pub async fn dispatch<A>(
    api: &A,
    config: &AgentConfig,
    query: &str,
) -> Result<Vec<Value>, AgentError>
where
    A: AgentApi + ?Sized,
{
    let mut results = Vec::with_capacity(config.semantic_models.len());

    for semantic_model in &config.semantic_models {
        let request = AgentRunRequest::for_semantic_model(config, query, semantic_model);
        info!(semantic_model = %semantic_model, model = %config.model, "dispatching agent request");

        let reply = api.run(&request).await?;

        if !reply.is_success() {
            warn!(status = reply.status, semantic_model = %semantic_model, "agent returned non-success status");
            return Err(AgentError::Status {
                status: reply.status,
                body: reply.body,
            });
        }

        let payload = decode_reply(&reply).await?;
        results.push(payload);
    }

    Ok(results)
}
