pub mod error;
pub mod providers;
pub mod types;
pub mod functions;
pub mod extract;
pub mod trace;
pub mod template;
pub mod prompts;
pub mod agent;
pub mod catalog;
pub mod labels;
pub mod metrics;
pub mod eval;
pub mod config;

pub use error::LLMError;
pub use providers::LLMProvider;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
pub use functions::{
    DynKernelFunction, FunctionCall, FunctionDefinition, FunctionRegistry, KernelFunction, Tool,
    ToolCall, ToolChoice, ToolChoiceFunction, ToolChoiceSimple,
};
pub use extract::extract_response;
pub use trace::{ActionInput, AgentTrace, ThoughtStep, ToolCallRecord, TraceReconstructor};
pub use template::{HandlebarsEngine, TemplateCheck, TemplateEngine, TemplateError, TemplateValidator};
pub use prompts::{PromptError, PromptLibrary};
pub use agent::{
    ActionAgent,
    AgentError,
    AgentResponse,
    FnAgent,
    IntegrationAgent,
    KeywordAgent,
    WorkflowContext,
};
pub use catalog::{
    agent_tools,
    ActionCatalog,
    DirectoryRetriever,
    DocumentRetriever,
    IntegrationAction,
};
pub use labels::RunLabels;
pub use metrics::{ComparisonReport, EvalMetrics, MetricChange};
pub use eval::{
    EvalError,
    EvalResults,
    ScenarioContext,
    ScenarioDef,
    ScenarioProgress,
    ScenarioResult,
    ScenarioRunner,
};
pub use config::{Config, ConfigError};
pub use schemars::JsonSchema;
