use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    extract::{extract_response, EMPTY_CONFIG},
    functions::{FunctionRegistry, ToolChoice},
    prompts::{PromptError, PromptLibrary},
    trace::{AgentTrace, TraceReconstructor},
    types::{ChatMessage, CompletionRequest, MessageRole},
    LLMError, LLMProvider,
};

pub const DEFAULT_MAX_ROUNDS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] LLMError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("{0}")]
    Failed(String),
}

/// The agent's answer for one request. `proposed_config` is a payload
/// template, not rendered JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub selected_action: String,
    pub reasoning: String,
    pub proposed_config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgentTrace>,
}

impl AgentResponse {
    /// Action reported when the model output could not be parsed.
    pub const PARSE_ERROR: &'static str = "parse_error";
    /// Action reported when the agent itself failed.
    pub const ERROR: &'static str = "error";

    pub fn new(
        selected_action: impl Into<String>,
        reasoning: impl Into<String>,
        proposed_config: impl Into<String>,
    ) -> Self {
        Self {
            selected_action: selected_action.into(),
            reasoning: reasoning.into(),
            proposed_config: proposed_config.into(),
            trace: None,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self::new(Self::ERROR, format!("Agent failed: {message}"), EMPTY_CONFIG)
    }

    pub fn with_trace(mut self, trace: AgentTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn is_sentinel(&self) -> bool {
        self.selected_action == Self::PARSE_ERROR || self.selected_action == Self::ERROR
    }
}

/// Workflow state handed to the agent next to the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(variables: Map<String, Value>) -> Self {
        Self {
            user_input: None,
            variables,
        }
    }

    pub fn with_user_input(mut self, user_input: impl Into<String>) -> Self {
        self.user_input = Some(user_input.into());
        self
    }

    /// Variables as a JSON object, the binding set for payload templates.
    pub fn bindings(&self) -> Value {
        Value::Object(self.variables.clone())
    }
}

#[async_trait]
pub trait ActionAgent: Send + Sync {
    async fn run(
        &self,
        request: &str,
        context: &WorkflowContext,
    ) -> Result<AgentResponse, AgentError>;

    fn name(&self) -> &str {
        "agent"
    }
}

/// Wraps a synchronous closure as an agent.
pub struct FnAgent<F> {
    name: String,
    f: F,
}

impl<F> FnAgent<F>
where
    F: Fn(&str, &WorkflowContext) -> Result<AgentResponse, AgentError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> ActionAgent for FnAgent<F>
where
    F: Fn(&str, &WorkflowContext) -> Result<AgentResponse, AgentError> + Send + Sync,
{
    async fn run(
        &self,
        request: &str,
        context: &WorkflowContext,
    ) -> Result<AgentResponse, AgentError> {
        (self.f)(request, context)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Deterministic keyword agent used for harness self-checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAgent;

impl KeywordAgent {
    pub fn respond(request: &str) -> AgentResponse {
        let lower = request.to_lowercase();

        let (action, config) = if lower.contains("slack") {
            (
                "slack_post_message",
                r#"{ "channel": "{{ slack_channel }}", "text": "{{ summary }}" }"#,
            )
        } else if lower.contains("notion") {
            (
                "notion_create_page",
                r#"{ "parent": { "database_id": "{{ notion_database_id }}" } }"#,
            )
        } else if lower.contains("github") || lower.contains("issue") {
            (
                "github_create_issue",
                r#"{ "title": "Issue", "body": "{{ summary }}" }"#,
            )
        } else if lower.contains("spreadsheet") || lower.contains("sheet") {
            if lower.contains("existing") || lower.contains("append") {
                (
                    "google_sheets_append",
                    r#"{ "spreadsheetId": "{{ spreadsheet_id }}", "values": [] }"#,
                )
            } else {
                (
                    "google_sheets_create",
                    r#"{ "properties": { "title": "New Sheet" } }"#,
                )
            }
        } else {
            ("unknown", EMPTY_CONFIG)
        };

        AgentResponse::new(
            action,
            format!("Mock agent selected {action} based on keywords"),
            config,
        )
    }
}

#[async_trait]
impl ActionAgent for KeywordAgent {
    async fn run(
        &self,
        request: &str,
        _context: &WorkflowContext,
    ) -> Result<AgentResponse, AgentError> {
        Ok(Self::respond(request))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Tool-calling agent: lets the model look up actions and documentation,
/// then extracts its final JSON answer.
#[derive(Clone)]
pub struct IntegrationAgent {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: Option<f32>,
    functions: Arc<FunctionRegistry>,
    prompts: Arc<PromptLibrary>,
    action_listing: String,
    max_rounds: usize,
    trace: bool,
}

impl fmt::Debug for IntegrationAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationAgent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("functions", &self.functions.names())
            .field("max_rounds", &self.max_rounds)
            .field("trace", &self.trace)
            .finish()
    }
}

impl IntegrationAgent {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        prompts: Arc<PromptLibrary>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            functions: Arc::new(FunctionRegistry::new()),
            prompts,
            action_listing: String::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            trace: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_function_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.functions = registry;
        self
    }

    /// Action catalog text rendered into the system prompt.
    pub fn with_action_listing(mut self, listing: impl Into<String>) -> Self {
        self.action_listing = listing.into();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    fn build_request(&self, messages: &[ChatMessage]) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), messages.to_vec());

        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        if !self.functions.is_empty() {
            request = request
                .with_function_registry(self.functions.as_ref())
                .with_tool_choice(ToolChoice::auto());
        }

        request
    }
}

#[async_trait]
impl ActionAgent for IntegrationAgent {
    async fn run(
        &self,
        request: &str,
        context: &WorkflowContext,
    ) -> Result<AgentResponse, AgentError> {
        let started = Instant::now();
        let bindings = context.bindings();

        let mut messages = vec![
            ChatMessage::system(self.prompts.render_system(&bindings, &self.action_listing)?),
            ChatMessage::user(self.prompts.render_user(request, &bindings)?),
        ];
        let mut durations: HashMap<String, f64> = HashMap::new();
        let mut finished = false;

        for round in 0..self.max_rounds {
            let response = self.provider.complete(self.build_request(&messages)).await?;
            let mut assistant = response.message;

            for (i, call) in assistant.tool_calls.iter_mut().enumerate() {
                if call.id.is_none() {
                    call.id = Some(format!("call_{round}_{i}"));
                }
            }

            let calls = assistant.tool_calls.clone();
            messages.push(assistant);

            if calls.is_empty() {
                finished = true;
                break;
            }

            for call in calls {
                let id = call.id.unwrap_or_default();
                let name = call.function.name.clone();
                let tool_started = Instant::now();

                let content = match self.functions.invoke(&call.function).await {
                    Ok(Value::String(text)) => text,
                    Ok(value) => value.to_string(),
                    Err(error) => {
                        tracing::warn!(tool = %name, %error, "tool call failed");
                        json!({ "error": error.to_string() }).to_string()
                    }
                };

                let elapsed = elapsed_ms(tool_started);
                tracing::debug!(round, tool = %name, duration_ms = elapsed, "tool call finished");
                durations.insert(id.clone(), elapsed);
                messages.push(ChatMessage::tool(id, content).with_name(name));
            }
        }

        if !finished {
            tracing::warn!(
                max_rounds = self.max_rounds,
                "agent stopped before producing a final answer"
            );
        }

        let output = messages
            .iter()
            .rev()
            .filter(|message| message.role == MessageRole::Assistant)
            .find_map(ChatMessage::non_empty_text)
            .unwrap_or(EMPTY_CONFIG);

        let response = extract_response(output);
        tracing::info!(
            action = %response.selected_action,
            duration_ms = elapsed_ms(started),
            "agent finished"
        );

        if !self.trace {
            return Ok(response);
        }

        let trace = TraceReconstructor::new()
            .with_tool_durations(durations)
            .reconstruct(&messages, elapsed_ms(started), self.model.as_str());
        Ok(response.with_trace(trace))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_agent_routes_requests() {
        let cases = [
            ("Post the summary to Slack", "slack_post_message"),
            ("Add these products to my Notion database", "notion_create_page"),
            ("Open an issue for the failure", "github_create_issue"),
            ("Add these results to the existing spreadsheet", "google_sheets_append"),
            ("Create a new sheet for leads", "google_sheets_create"),
            ("Send an SMS via Twilio", "unknown"),
        ];

        for (request, expected) in cases {
            assert_eq!(KeywordAgent::respond(request).selected_action, expected, "{request}");
        }
        assert_eq!(KeywordAgent::respond("Ping someone").proposed_config, "{}");
    }

    #[test]
    fn error_sentinel_has_empty_config() {
        let response = AgentResponse::error("provider unavailable");
        assert_eq!(response.selected_action, AgentResponse::ERROR);
        assert_eq!(response.proposed_config, "{}");
        assert!(response.reasoning.contains("provider unavailable"));
        assert!(response.is_sentinel());
    }

    #[test]
    fn trace_is_omitted_when_absent() {
        let value = serde_json::to_value(AgentResponse::new("a", "r", "{}")).unwrap();
        assert!(value.get("trace").is_none());
    }

    #[test]
    fn context_accepts_missing_fields() {
        let context: WorkflowContext =
            serde_json::from_str(r#"{"variables": {"summary": "ok"}}"#).unwrap();
        assert!(context.user_input.is_none());
        assert_eq!(context.bindings()["summary"], "ok");
    }
}
