use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    eval::EvalError,
    functions::{DynKernelFunction, FunctionDefinition, FunctionRegistry, KernelFunction},
    LLMError,
};

pub const ACTIONS_FILE: &str = "actions.json";
pub const API_DOCS_DIR: &str = "api_docs";
const DOCS_PER_LOOKUP: usize = 4;
const MAX_CHUNK_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationAction {
    pub id: String,
    pub name: String,
    pub description: String,
    pub api_reference: String,
}

const BUILTIN_ACTIONS: [(&str, &str, &str, &str); 13] = [
    (
        "google_sheets_create",
        "Create Google Spreadsheet",
        "Create a new Google Sheets spreadsheet with a title and optional initial sheets",
        "https://developers.google.com/sheets/api/reference/rest/v4/spreadsheets/create",
    ),
    (
        "google_sheets_append",
        "Append Rows to Google Sheet",
        "Append rows of values to an existing Google Sheets spreadsheet",
        "https://developers.google.com/sheets/api/reference/rest/v4/spreadsheets.values/append",
    ),
    (
        "notion_create_page",
        "Create Notion Page",
        "Create a new page in a Notion database or as a child of another page",
        "https://developers.notion.com/reference/post-page",
    ),
    (
        "notion_update_block",
        "Update Notion Block",
        "Update the content of an existing Notion block",
        "https://developers.notion.com/reference/update-a-block",
    ),
    (
        "slack_post_message",
        "Send Slack Message",
        "Post a message to a Slack channel",
        "https://api.slack.com/methods/chat.postMessage",
    ),
    (
        "airtable_create_record",
        "Create Airtable Record",
        "Create a new record in an Airtable base table",
        "https://airtable.com/developers/web/api/create-records",
    ),
    (
        "hubspot_create_contact",
        "Create HubSpot Contact",
        "Create a new contact in HubSpot CRM",
        "https://developers.hubspot.com/docs/api/crm/contacts",
    ),
    (
        "github_create_issue",
        "Create GitHub Issue",
        "Create a new issue in a GitHub repository",
        "https://docs.github.com/en/rest/issues/issues#create-an-issue",
    ),
    (
        "trello_create_card",
        "Create Trello Card",
        "Create a new card in a Trello list",
        "https://developer.atlassian.com/cloud/trello/rest/api-group-cards/#api-cards-post",
    ),
    (
        "jira_create_issue",
        "Create Jira Issue",
        "Create a new issue or ticket in a Jira project",
        "https://developer.atlassian.com/cloud/jira/platform/rest/v3/api-group-issues/#api-rest-api-3-issue-post",
    ),
    (
        "stripe_create_customer",
        "Create Stripe Customer",
        "Create a new customer in Stripe for billing and payments",
        "https://stripe.com/docs/api/customers/create",
    ),
    (
        "sendgrid_send_email",
        "Send Email via SendGrid",
        "Send a transactional email through SendGrid",
        "https://docs.sendgrid.com/api-reference/mail-send/mail-send",
    ),
    (
        "twilio_send_sms",
        "Send SMS via Twilio",
        "Send an SMS text message through Twilio",
        "https://www.twilio.com/docs/sms/api/message-resource#create-a-message-resource",
    ),
];

/// Integration family an action belongs to, used to filter documentation.
pub fn integration_for(action_id: &str) -> Option<&'static str> {
    let integration = match action_id {
        "google_sheets_create" | "google_sheets_append" => "google_sheets",
        "notion_create_page" | "notion_update_block" => "notion",
        "slack_post_message" => "slack",
        "airtable_create_record" => "airtable",
        "hubspot_create_contact" => "hubspot",
        "github_create_issue" => "github",
        "trello_create_card" => "trello",
        "jira_create_issue" => "jira",
        "stripe_create_customer" => "stripe",
        "sendgrid_send_email" => "sendgrid",
        "twilio_send_sms" => "twilio",
        _ => return None,
    };
    Some(integration)
}

/// The integration actions the agent may choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCatalog {
    actions: Vec<IntegrationAction>,
}

impl ActionCatalog {
    pub fn new(actions: Vec<IntegrationAction>) -> Self {
        Self { actions }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_ACTIONS
                .iter()
                .map(|(id, name, description, api_reference)| IntegrationAction {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                    api_reference: api_reference.to_string(),
                })
                .collect(),
        )
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| EvalError::io(path, source))?;
        let actions = serde_json::from_str(&content).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::new(actions))
    }

    /// Loads `actions.json` from the data directory, falling back to the
    /// built-in catalog when the file does not exist.
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, EvalError> {
        let path = data_dir.as_ref().join(ACTIONS_FILE);
        if path.is_file() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no action catalog file, using built-in actions");
            Ok(Self::builtin())
        }
    }

    pub fn actions(&self) -> &[IntegrationAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IntegrationAction> {
        self.actions.iter().find(|action| action.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Case-insensitive substring match on id, name and description.
    pub fn find(&self, query: &str) -> Vec<&IntegrationAction> {
        let query = query.to_lowercase();
        self.actions
            .iter()
            .filter(|action| {
                action.id.to_lowercase().contains(&query)
                    || action.name.to_lowercase().contains(&query)
                    || action.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Markdown listing for the system prompt.
    pub fn prompt_listing(&self) -> String {
        let mut lines = vec!["Available Integration Actions:".to_string()];
        for action in &self.actions {
            lines.push(format!("\n- **{}**: {}", action.id, action.name));
            lines.push(format!("  Description: {}", action.description));
            lines.push(format!("  API Reference: {}", action.api_reference));
        }
        lines.join("\n")
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Source of API documentation snippets.
pub trait DocumentRetriever: Send + Sync {
    fn search(&self, query: &str, integration: Option<&str>, k: usize) -> Vec<String>;
}

#[derive(Debug, Clone)]
struct DocChunk {
    integration: String,
    text: String,
    terms: HashSet<String>,
}

/// Keyword retriever over markdown files named after their integration
/// (`slack.md`, `google_sheets.md`).
#[derive(Debug, Clone, Default)]
pub struct DirectoryRetriever {
    chunks: Vec<DocChunk>,
}

impl DirectoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every `*.md` file in `dir`. A missing directory yields an empty index.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, EvalError> {
        let dir = dir.as_ref();
        let mut retriever = Self::new();
        if !dir.is_dir() {
            tracing::debug!(path = %dir.display(), "no API documentation directory");
            return Ok(retriever);
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| EvalError::io(dir, source))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("md"))
            .collect();
        files.sort();

        for path in files {
            let Some(integration) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let integration = integration.to_string();
            let content = fs::read_to_string(&path).map_err(|source| EvalError::io(&path, source))?;
            retriever.add_document(&integration, &content);
        }

        tracing::debug!(chunks = retriever.chunks.len(), "indexed API documentation");
        Ok(retriever)
    }

    pub fn add_document(&mut self, integration: &str, content: &str) {
        for text in split_chunks(content) {
            self.chunks.push(DocChunk {
                integration: integration.to_string(),
                terms: terms(&text),
                text,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl DocumentRetriever for DirectoryRetriever {
    fn search(&self, query: &str, integration: Option<&str>, k: usize) -> Vec<String> {
        let query_terms = terms(query);

        let mut scored: Vec<(usize, usize, &DocChunk)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| integration.map_or(true, |name| chunk.integration.starts_with(name)))
            .map(|(index, chunk)| (chunk.terms.intersection(&query_terms).count(), index, chunk))
            .collect();

        // highest score first, document order on ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(score, _, _)| *score > 0 || integration.is_some())
            .map(|(_, _, chunk)| chunk.text.clone())
            .filter(|text| seen.insert(text.chars().take(100).collect::<String>()))
            .take(k)
            .collect()
    }
}

/// Splits markdown into heading sections, then paragraphs when a section is long.
fn split_chunks(content: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.starts_with("## ") || line.starts_with("### ") {
            if !current.trim().is_empty() {
                sections.push(current.trim().to_string());
            }
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    let mut chunks = Vec::new();
    for section in sections {
        if section.chars().count() <= MAX_CHUNK_CHARS {
            chunks.push(section);
            continue;
        }

        let mut buffer = String::new();
        for paragraph in section.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if !buffer.is_empty() && buffer.chars().count() + paragraph.chars().count() > MAX_CHUNK_CHARS {
                chunks.push(std::mem::take(&mut buffer));
            }
            if !buffer.is_empty() {
                buffer.push_str("\n\n");
            }
            buffer.push_str(paragraph);
        }
        if !buffer.is_empty() {
            chunks.push(buffer);
        }
    }

    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetActionsArgs {
    /// Optional search term matched against action ids, names and descriptions
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RetrieveDocsArgs {
    /// Integration action id, for example `slack_post_message`
    action_id: String,
    /// Optional extra search terms to narrow the documentation
    #[serde(default)]
    query: Option<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, LLMError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments.clone() };
    serde_json::from_value(arguments).map_err(|error| LLMError::InvalidFunctionArguments(error.to_string()))
}

pub struct GetAvailableActions {
    catalog: Arc<ActionCatalog>,
}

impl GetAvailableActions {
    pub fn new(catalog: Arc<ActionCatalog>) -> Self {
        Self { catalog }
    }

    pub fn lookup(&self, query: Option<&str>) -> Value {
        let actions: Vec<&IntegrationAction> = match query.filter(|q| !q.trim().is_empty()) {
            Some(query) => self.catalog.find(query),
            None => self.catalog.actions().iter().collect(),
        };

        if actions.is_empty() {
            return json!({
                "message": format!("No actions found matching '{}'", query.unwrap_or_default()),
                "available_count": self.catalog.len(),
                "suggestion": "Try a broader search or call without a query to see all actions",
            });
        }

        json!({
            "total_actions": actions.len(),
            "actions": actions,
        })
    }
}

#[async_trait]
impl KernelFunction for GetAvailableActions {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::for_arguments::<GetActionsArgs>("get_available_actions").with_description(
            "List the available integration actions. Each action has an id, name, description and API reference. Pass a query to filter them.",
        )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: GetActionsArgs = parse_args(arguments)?;
        let result = self.lookup(args.query.as_deref());
        Ok(Value::String(serde_json::to_string_pretty(&result)?))
    }
}

pub struct RetrieveApiDocumentation {
    catalog: Arc<ActionCatalog>,
    retriever: Arc<dyn DocumentRetriever>,
}

impl RetrieveApiDocumentation {
    pub fn new(catalog: Arc<ActionCatalog>, retriever: Arc<dyn DocumentRetriever>) -> Self {
        Self { catalog, retriever }
    }

    pub fn lookup(&self, action_id: &str, query: Option<&str>) -> Value {
        let Some(action) = self.catalog.get(action_id) else {
            return json!({
                "error": format!("Unknown action: {action_id}"),
                "suggestion": "Use get_available_actions tool first to see valid action IDs",
            });
        };

        let mut search = format!("{} {} payload structure", action.name, action.description);
        if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
            search.push(' ');
            search.push_str(query);
        }

        let sections = self
            .retriever
            .search(&search, integration_for(action_id), DOCS_PER_LOOKUP);

        if sections.is_empty() {
            return json!({
                "action": action,
                "documentation": "No documentation found for this action.",
                "note": "You may need to use your knowledge of the API or ask the user for more details.",
            });
        }

        json!({
            "action": action,
            "api_reference": action.api_reference,
            "documentation": sections.join("\n\n---\n\n"),
            "chunks_retrieved": sections.len(),
        })
    }
}

#[async_trait]
impl KernelFunction for RetrieveApiDocumentation {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::for_arguments::<RetrieveDocsArgs>("retrieve_api_documentation").with_description(
            "Retrieve API documentation for an integration action, including payload structure, required fields and examples. Use it after choosing an action.",
        )
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: RetrieveDocsArgs = parse_args(arguments)?;
        let result = self.lookup(&args.action_id, args.query.as_deref());
        Ok(Value::String(serde_json::to_string_pretty(&result)?))
    }
}

/// Registry holding the two agent tools.
pub fn agent_tools(
    catalog: Arc<ActionCatalog>,
    retriever: Arc<dyn DocumentRetriever>,
) -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    let functions: [DynKernelFunction; 2] = [
        Arc::new(GetAvailableActions::new(Arc::clone(&catalog))),
        Arc::new(RetrieveApiDocumentation::new(catalog, retriever)),
    ];
    registry.register_all(functions);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLACK_DOCS: &str = "# Slack\n\nSlack Web API.\n\n## chat.postMessage\n\nPosts a message to a channel. Payload fields: `channel` (required) and `text`.\n\n## Rate limits\n\nTier 4 limits apply.\n";

    fn retriever() -> Arc<DirectoryRetriever> {
        let mut retriever = DirectoryRetriever::new();
        retriever.add_document("slack", SLACK_DOCS);
        retriever.add_document("github", "## Create an issue\n\nPayload needs a `title` and optional `body`.\n");
        Arc::new(retriever)
    }

    #[test]
    fn builtin_catalog_lookup() {
        let catalog = ActionCatalog::builtin();
        assert_eq!(catalog.len(), 13);
        assert_eq!(catalog.get("slack_post_message").unwrap().name, "Send Slack Message");
        assert!(catalog.contains("google_sheets_append"));
        assert!(!catalog.contains("invalid_action"));

        let ids: Vec<&str> = catalog.find("spreadsheet").iter().map(|a| a.id.as_str()).collect();
        assert!(ids.contains(&"google_sheets_create"));
        assert!(catalog.find("xyznonexistent").is_empty());
        assert!(catalog.prompt_listing().contains("- **twilio_send_sms**: Send SMS via Twilio"));
    }

    #[test]
    fn every_builtin_action_has_an_integration() {
        for action in ActionCatalog::builtin().actions() {
            assert!(integration_for(&action.id).is_some(), "{}", action.id);
        }
        assert_eq!(integration_for("made_up"), None);
    }

    #[test]
    fn retriever_filters_by_integration_and_ranks() {
        let retriever = retriever();
        let hits = retriever.search("post message channel", Some("slack"), 4);
        assert!(hits[0].contains("chat.postMessage"));
        assert!(hits.iter().all(|hit| !hit.contains("title")));

        let unfiltered = retriever.search("issue title", None, 4);
        assert_eq!(unfiltered.len(), 1);
        assert!(unfiltered[0].contains("Create an issue"));
    }

    #[test]
    fn get_available_actions_reports_empty_search() {
        let tool = GetAvailableActions::new(Arc::new(ActionCatalog::builtin()));
        let all = tool.lookup(None);
        assert_eq!(all["total_actions"], 13);

        let slack = tool.lookup(Some("slack"));
        assert_eq!(slack["actions"][0]["id"], "slack_post_message");

        let none = tool.lookup(Some("xyznonexistent"));
        assert_eq!(none["available_count"], 13);
        assert!(none["message"].as_str().unwrap().contains("xyznonexistent"));
    }

    #[test]
    fn documentation_lookup_results() {
        let catalog = Arc::new(ActionCatalog::builtin());
        let tool = RetrieveApiDocumentation::new(Arc::clone(&catalog), retriever());

        let slack = tool.lookup("slack_post_message", None);
        assert!(slack["documentation"].as_str().unwrap().to_lowercase().contains("channel"));
        assert_eq!(slack["api_reference"], "https://api.slack.com/methods/chat.postMessage");

        let unknown = tool.lookup("invalid_action", None);
        assert_eq!(unknown["error"], "Unknown action: invalid_action");

        let empty = RetrieveApiDocumentation::new(catalog, Arc::new(DirectoryRetriever::new()));
        let missing = empty.lookup("twilio_send_sms", Some("sms"));
        assert_eq!(missing["documentation"], "No documentation found for this action.");
    }

    #[tokio::test]
    async fn tools_return_json_text() {
        let registry = agent_tools(Arc::new(ActionCatalog::builtin()), retriever());
        assert_eq!(registry.names(), vec!["get_available_actions", "retrieve_api_documentation"]);

        let call = crate::functions::FunctionCall::new("get_available_actions", json!({ "query": "notion" }));
        let output = registry.invoke(&call).await.unwrap();
        let parsed: Value = serde_json::from_str(output.as_str().unwrap()).unwrap();
        assert_eq!(parsed["total_actions"], 2);

        let bad = crate::functions::FunctionCall::new("retrieve_api_documentation", json!({}));
        assert!(matches!(
            registry.invoke(&bad).await,
            Err(LLMError::InvalidFunctionArguments(_))
        ));
    }
}
