use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::functions::ToolCall;
use crate::types::{ChatMessage, MessageRole};

const FINAL_OBSERVATION_CHARS: usize = 200;
const TOOL_OBSERVATION_CHARS: usize = 500;

/// Arguments shown for a step. Object arguments stay structured; anything the
/// provider sent that is not an object is kept as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionInput {
    #[default]
    None,
    Structured(Map<String, Value>),
    Text(String),
}

impl ActionInput {
    pub fn from_arguments(arguments: &Value) -> Self {
        match arguments {
            Value::Null => Self::None,
            Value::Object(map) if map.is_empty() => Self::None,
            Value::Object(map) => Self::Structured(map.clone()),
            Value::String(text) if text.trim().is_empty() => Self::None,
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn as_object(&self) -> Map<String, Value> {
        match self {
            Self::Structured(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtStep {
    pub step_number: u32,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_input: ActionInput,
    #[serde(default)]
    pub observation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Map<String, Value>,
    #[serde(default)]
    pub tool_output: String,
    #[serde(default)]
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub steps: Vec<ThoughtStep>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_duration_ms: f64,
    pub model_name: String,
}

/// Rebuilds the reasoning steps and tool calls of one agent run from its transcript.
#[derive(Debug, Clone, Default)]
pub struct TraceReconstructor {
    tool_durations: HashMap<String, f64>,
}

impl TraceReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measured tool durations keyed by tool-call id.
    pub fn with_tool_durations(mut self, durations: HashMap<String, f64>) -> Self {
        self.tool_durations = durations;
        self
    }

    pub fn reconstruct(
        &self,
        events: &[ChatMessage],
        total_duration_ms: f64,
        model_name: impl Into<String>,
    ) -> AgentTrace {
        let mut steps: Vec<ThoughtStep> = Vec::new();
        let mut tool_calls = Vec::new();
        let mut pending: HashMap<&str, usize> = HashMap::new();

        for event in events {
            match event.role {
                MessageRole::System | MessageRole::User => continue,
                MessageRole::Assistant if event.tool_calls.is_empty() => {
                    if let Some(text) = event.non_empty_text() {
                        let number = next_step_number(&steps);
                        steps.push(ThoughtStep {
                            step_number: number,
                            thought: Some("Generating final response".to_string()),
                            action: Some("Final Answer".to_string()),
                            action_input: ActionInput::None,
                            observation: Some(truncate(text, FINAL_OBSERVATION_CHARS)),
                        });
                    }
                }
                MessageRole::Assistant => {
                    for call in &event.tool_calls {
                        let number = next_step_number(&steps);
                        if let Some(id) = call.id.as_deref() {
                            pending.insert(id, steps.len());
                        }
                        steps.push(ThoughtStep {
                            step_number: number,
                            thought: Some(explain_tool_call(call)),
                            action: Some(format!("Call tool: {}", call.function.name)),
                            action_input: ActionInput::from_arguments(&call.function.arguments),
                            observation: None,
                        });
                    }
                }
                MessageRole::Tool => {
                    let content = event.text().unwrap_or_default();
                    let id = event.tool_call_id.as_deref();
                    let duration_ms = id
                        .and_then(|id| self.tool_durations.get(id))
                        .copied()
                        .unwrap_or(0.0);

                    let matched = id.and_then(|id| pending.remove(id));
                    let record = match matched.and_then(|index| steps.get_mut(index)) {
                        Some(step) => {
                            step.observation = Some(truncate(content, TOOL_OBSERVATION_CHARS));
                            ToolCallRecord {
                                tool_name: step_tool_name(step),
                                tool_input: step.action_input.as_object(),
                                tool_output: content.to_string(),
                                duration_ms,
                            }
                        }
                        None => {
                            tracing::debug!(tool_call_id = ?id, "tool result without a matching call");
                            ToolCallRecord {
                                tool_name: event
                                    .name
                                    .clone()
                                    .unwrap_or_else(|| "unknown".to_string()),
                                tool_input: Map::new(),
                                tool_output: content.to_string(),
                                duration_ms,
                            }
                        }
                    };
                    tool_calls.push(record);
                }
            }
        }

        AgentTrace {
            steps,
            tool_calls,
            total_duration_ms,
            model_name: model_name.into(),
        }
    }
}

fn next_step_number(steps: &[ThoughtStep]) -> u32 {
    steps.len() as u32 + 1
}

fn step_tool_name(step: &ThoughtStep) -> String {
    step.action
        .as_deref()
        .and_then(|action| action.strip_prefix("Call tool: "))
        .unwrap_or("unknown")
        .to_string()
}

/// One-line explanation of why the agent called a tool.
pub fn explain_tool_call(call: &ToolCall) -> String {
    let function = &call.function;
    let query = function.argument_str("query").filter(|q| !q.is_empty());

    match function.name.as_str() {
        "get_available_actions" => match query {
            Some(query) => format!(
                "I need to find integration actions matching '{query}' to pick the right one for this request."
            ),
            None => "I need to see which integration actions are available before selecting one."
                .to_string(),
        },
        "retrieve_api_documentation" => {
            let action_id = function.argument_str("action_id").unwrap_or("unknown");
            let mut thought =
                format!("I need the API documentation for '{action_id}' to build a correct payload.");
            if let Some(query) = query {
                thought.push_str(&format!(" Focusing on: {query}."));
            }
            thought
        }
        name => format!("Calling tool '{name}' to gather more information."),
    }
}

/// Truncates to `limit` characters, appending `...` when anything was cut.
pub fn truncate(text: &str, limit: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(limit) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionCall;
    use serde_json::json;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall::new(FunctionCall::new(name, arguments)).with_id(id)
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are an integration agent."),
            ChatMessage::user("Post the summary to Slack"),
            ChatMessage::assistant_tool_calls(vec![call(
                "call_1",
                "get_available_actions",
                json!({ "query": "slack" }),
            )]),
            ChatMessage::tool("call_1", "{\"total_actions\": 1}"),
            ChatMessage::assistant_tool_calls(vec![call(
                "call_2",
                "retrieve_api_documentation",
                json!({ "action_id": "slack_post_message", "query": "blocks" }),
            )]),
            ChatMessage::tool("call_2", "x".repeat(600)),
            ChatMessage::assistant("{\"selected_action\": \"slack_post_message\"}"),
        ]
    }

    #[test]
    fn steps_follow_the_transcript() {
        let durations = HashMap::from([("call_1".to_string(), 12.5)]);
        let trace = TraceReconstructor::new()
            .with_tool_durations(durations)
            .reconstruct(&transcript(), 900.0, "gpt-4o");

        assert_eq!(trace.model_name, "gpt-4o");
        assert_eq!(trace.total_duration_ms, 900.0);
        let numbers: Vec<u32> = trace.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let first = &trace.steps[0];
        assert_eq!(first.action.as_deref(), Some("Call tool: get_available_actions"));
        assert_eq!(
            first.thought.as_deref(),
            Some("I need to find integration actions matching 'slack' to pick the right one for this request.")
        );
        assert_eq!(first.observation.as_deref(), Some("{\"total_actions\": 1}"));

        let second = &trace.steps[1];
        assert_eq!(
            second.thought.as_deref(),
            Some("I need the API documentation for 'slack_post_message' to build a correct payload. Focusing on: blocks.")
        );
        let observation = second.observation.as_deref().unwrap();
        assert_eq!(observation.len(), 503);
        assert!(observation.ends_with("..."));

        let last = &trace.steps[2];
        assert_eq!(last.action.as_deref(), Some("Final Answer"));
        assert_eq!(last.thought.as_deref(), Some("Generating final response"));
        assert!(last.action_input.is_none());

        assert_eq!(trace.tool_calls.len(), 2);
        assert_eq!(trace.tool_calls[0].tool_name, "get_available_actions");
        assert_eq!(trace.tool_calls[0].tool_input.get("query"), Some(&json!("slack")));
        assert_eq!(trace.tool_calls[0].duration_ms, 12.5);
        assert_eq!(trace.tool_calls[1].duration_ms, 0.0);
        assert_eq!(trace.tool_calls[1].tool_output.len(), 600);
    }

    #[test]
    fn reconstruction_is_idempotent() {
        let reconstructor = TraceReconstructor::new();
        let events = transcript();
        assert_eq!(
            reconstructor.reconstruct(&events, 1.0, "m"),
            reconstructor.reconstruct(&events, 1.0, "m")
        );
    }

    #[test]
    fn unmatched_result_is_recorded_with_empty_input() {
        let events = vec![
            ChatMessage::tool("never_issued", "late result").with_name("retrieve_api_documentation"),
            ChatMessage::tool("also_unknown", "other"),
        ];
        let trace = TraceReconstructor::new().reconstruct(&events, 0.0, "m");

        assert!(trace.steps.is_empty());
        assert_eq!(trace.tool_calls.len(), 2);
        assert_eq!(trace.tool_calls[0].tool_name, "retrieve_api_documentation");
        assert!(trace.tool_calls[0].tool_input.is_empty());
        assert_eq!(trace.tool_calls[1].tool_name, "unknown");
    }

    #[test]
    fn results_are_matched_by_id_not_position() {
        let events = vec![
            ChatMessage::assistant_tool_calls(vec![
                call("a", "get_available_actions", json!({ "query": "slack" })),
                call("b", "retrieve_api_documentation", json!({ "action_id": "slack_post_message" })),
            ]),
            ChatMessage::tool("b", "docs for slack"),
            ChatMessage::tool("a", "action list"),
        ];
        let durations = HashMap::from([("a".to_string(), 4.0), ("b".to_string(), 9.0)]);
        let trace = TraceReconstructor::new()
            .with_tool_durations(durations)
            .reconstruct(&events, 20.0, "m");

        let numbers: Vec<u32> = trace.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(trace.steps[0].action.as_deref(), Some("Call tool: get_available_actions"));
        assert_eq!(trace.steps[0].observation.as_deref(), Some("action list"));
        assert_eq!(trace.steps[1].action.as_deref(), Some("Call tool: retrieve_api_documentation"));
        assert_eq!(trace.steps[1].observation.as_deref(), Some("docs for slack"));

        let names: Vec<&str> = trace.tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["retrieve_api_documentation", "get_available_actions"]);
        assert_eq!(trace.tool_calls[0].tool_input.get("action_id"), Some(&json!("slack_post_message")));
        assert_eq!(trace.tool_calls[0].tool_output, "docs for slack");
        assert_eq!(trace.tool_calls[0].duration_ms, 9.0);
        assert_eq!(trace.tool_calls[1].tool_input.get("query"), Some(&json!("slack")));
        assert_eq!(trace.tool_calls[1].duration_ms, 4.0);
    }

    #[test]
    fn repeated_result_id_is_unmatched() {
        let events = vec![
            ChatMessage::assistant_tool_calls(vec![call(
                "a",
                "get_available_actions",
                json!({ "query": "slack" }),
            )]),
            ChatMessage::tool("a", "first"),
            ChatMessage::tool("a", "second"),
        ];
        let trace = TraceReconstructor::new().reconstruct(&events, 0.0, "m");

        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].observation.as_deref(), Some("first"));
        assert_eq!(trace.tool_calls.len(), 2);
        assert_eq!(trace.tool_calls[0].tool_name, "get_available_actions");
        assert_eq!(trace.tool_calls[0].tool_input.get("query"), Some(&json!("slack")));
        assert_eq!(trace.tool_calls[1].tool_name, "unknown");
        assert_eq!(trace.tool_calls[1].tool_output, "second");
        assert!(trace.tool_calls[1].tool_input.is_empty());
    }

    #[test]
    fn orphaned_call_keeps_no_observation() {
        let events = vec![ChatMessage::assistant_tool_calls(vec![
            call("a", "lookup_weather", json!({})),
            ToolCall::new(FunctionCall::from_raw("lookup_weather", "city=Berlin")),
        ])];
        let trace = TraceReconstructor::new().reconstruct(&events, 0.0, "m");

        assert_eq!(trace.steps.len(), 2);
        assert_eq!(
            trace.steps[0].thought.as_deref(),
            Some("Calling tool 'lookup_weather' to gather more information.")
        );
        assert!(trace.steps[0].action_input.is_none());
        assert_eq!(trace.steps[1].action_input, ActionInput::Text("city=Berlin".to_string()));
        assert!(trace.steps.iter().all(|step| step.observation.is_none()));
        assert!(trace.tool_calls.is_empty());
    }

    #[test]
    fn long_final_answer_is_truncated() {
        let events = vec![ChatMessage::assistant("ü".repeat(250)), ChatMessage::assistant("  ")];
        let trace = TraceReconstructor::new().reconstruct(&events, 0.0, "m");
        assert_eq!(trace.steps.len(), 1);
        let observation = trace.steps[0].observation.as_deref().unwrap();
        assert_eq!(observation.chars().count(), 203);
    }

    #[test]
    fn action_input_serializes_none_as_null() {
        assert_eq!(serde_json::to_value(ActionInput::None).unwrap(), Value::Null);
        assert_eq!(
            serde_json::to_value(ActionInput::Text("raw".into())).unwrap(),
            json!("raw")
        );
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
