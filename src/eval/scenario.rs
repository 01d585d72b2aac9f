use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::EvalError;

pub use crate::agent::WorkflowContext as ScenarioContext;

/// One request the agent is graded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub request: String,
    pub expected_action: String,
    #[serde(default)]
    pub context: ScenarioContext,
    #[serde(default)]
    pub description: String,
}

impl ScenarioDef {
    pub fn new(request: impl Into<String>, expected_action: impl Into<String>) -> Self {
        let request = request.into();
        Self {
            context: ScenarioContext::default().with_user_input(request.clone()),
            request,
            expected_action: expected_action.into(),
            description: String::new(),
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.context.variables = match variables {
            Value::Object(map) => map,
            other => {
                tracing::debug!(
                    request = %self.request,
                    variables = %other,
                    "scenario variables are not a JSON object, using none"
                );
                Map::new()
            }
        };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    List(Vec<ScenarioDef>),
    Wrapped { scenarios: Vec<ScenarioDef> },
    Single(ScenarioDef),
}

impl ScenarioFile {
    fn into_vec(self) -> Vec<ScenarioDef> {
        match self {
            Self::List(scenarios) | Self::Wrapped { scenarios } => scenarios,
            Self::Single(scenario) => vec![scenario],
        }
    }
}

/// Loads scenarios from a JSON or YAML file, or from every such file in a
/// directory (sorted by name). A file may hold a list, a `scenarios` list or
/// a single scenario.
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<ScenarioDef>, EvalError> {
    let path = path.as_ref();

    let files = if path.is_dir() {
        scenario_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut scenarios = Vec::new();
    for file in files {
        scenarios.extend(load_file(&file)?);
    }

    if scenarios.is_empty() {
        return Err(EvalError::NoScenarios(path.to_path_buf()));
    }

    tracing::debug!(count = scenarios.len(), path = %path.display(), "loaded scenarios");
    Ok(scenarios)
}

fn scenario_files(dir: &Path) -> Result<Vec<PathBuf>, EvalError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|source| EvalError::io(dir, source))?;

    for entry in entries {
        let path = entry.map_err(|source| EvalError::io(dir, source))?.path();
        if path.is_file() && (is_yaml(&path) || is_json(&path)) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

fn load_file(path: &Path) -> Result<Vec<ScenarioDef>, EvalError> {
    let content = fs::read_to_string(path).map_err(|source| EvalError::io(path, source))?;

    let file: ScenarioFile = if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(|source| EvalError::Yaml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_str(&content).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };

    Ok(file.into_vec())
}

/// The built-in scenario set: the four core use cases followed by one
/// scenario for each remaining integration action.
pub fn default_scenarios() -> Vec<ScenarioDef> {
    vec![
        ScenarioDef::new("Post the summary to Slack", "slack_post_message")
            .with_variables(json!({
                "summary": "Found 3 products. Average price: $91.66. Lowest: USB-C Hub ($45.00)",
                "slack_channel": "#product-alerts",
                "scraper_results": [
                    { "name": "Wireless Headphones", "price": 79.99, "url": "https://store.example.com/p/1001" }
                ]
            }))
            .with_description("Simple variable interpolation for Slack message"),
        ScenarioDef::new("Add these products to my Notion database", "notion_create_page")
            .with_variables(json!({
                "scraper_results": [
                    { "name": "Wireless Headphones", "price": 79.99, "url": "https://store.example.com/p/1001" },
                    { "name": "USB-C Hub", "price": 45.0, "url": "https://store.example.com/p/1002" },
                    { "name": "Mechanical Keyboard", "price": 149.99, "url": "https://store.example.com/p/1003" }
                ],
                "notion_database_id": "8a3b1c4d-5e6f-7a8b-9c0d-1e2f3a4b5c6d"
            }))
            .with_description("Array loop for creating Notion pages"),
        ScenarioDef::new("Create a GitHub issue for the failed scrape", "github_create_issue")
            .with_variables(json!({
                "summary": "Scrape failed: Connection timeout after 30s. URL: https://store.example.com",
                "error_details": "TimeoutError: Request exceeded 30000ms"
            }))
            .with_description("String interpolation for GitHub issue"),
        ScenarioDef::new("Add these results to the existing spreadsheet", "google_sheets_append")
            .with_variables(json!({
                "scraper_results": [
                    { "name": "Wireless Headphones", "price": 79.99, "url": "https://store.example.com/p/1001" },
                    { "name": "USB-C Hub", "price": 45.0, "url": "https://store.example.com/p/1002" }
                ],
                "spreadsheet_id": "1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms"
            }))
            .with_description("Array loop for appending to existing spreadsheet"),
        ScenarioDef::new("Update the Notion block with the new status message", "notion_update_block")
            .with_variables(json!({
                "block_id": "b1c2d3e4-5f6a-7b8c-9d0e-1f2a3b4c5d6e",
                "new_content": "Status: Completed ✅ - All tasks finished successfully.",
                "status": "completed"
            }))
            .with_description("Notion block update with text content"),
        ScenarioDef::new("Create a record in my Airtable base with the product data", "airtable_create_record")
            .with_variables(json!({
                "base_id": "appXYZ123456789",
                "table_name": "Products",
                "product_data": {
                    "name": "New Product",
                    "price": 99.99,
                    "category": "Electronics",
                    "in_stock": true
                }
            }))
            .with_description("Airtable record creation with product fields"),
        ScenarioDef::new("Add this lead as a contact in HubSpot", "hubspot_create_contact")
            .with_variables(json!({
                "lead": {
                    "email": "john.smith@acmecorp.com",
                    "first_name": "John",
                    "last_name": "Smith",
                    "company": "Acme Corporation",
                    "job_title": "VP of Engineering",
                    "phone": "+1-555-123-4567"
                }
            }))
            .with_description("HubSpot contact creation with lead data"),
        ScenarioDef::new("Create a Trello card for this task", "trello_create_card")
            .with_variables(json!({
                "list_id": "5f1a2b3c4d5e6f7a8b9c0d1e",
                "task": {
                    "name": "Review pull request #42",
                    "description": "Code review needed for the authentication module updates",
                    "due_date": "2024-01-15T17:00:00Z"
                }
            }))
            .with_description("Trello card creation with task details"),
        ScenarioDef::new("Create a Jira ticket for this bug", "jira_create_issue")
            .with_variables(json!({
                "project_key": "PROJ",
                "bug": {
                    "summary": "Login page returns 500 error on mobile",
                    "description": "Users on iOS Safari cannot log in. Error occurs after entering credentials.",
                    "priority": "High"
                },
                "labels": ["mobile", "urgent", "login"]
            }))
            .with_description("Jira issue creation for bug tracking"),
        ScenarioDef::new("Create a new customer in Stripe for this signup", "stripe_create_customer")
            .with_variables(json!({
                "customer": {
                    "email": "newuser@example.com",
                    "name": "Jane Doe",
                    "phone": "+1-555-987-6543"
                },
                "plan": "premium",
                "signup_source": "landing_page"
            }))
            .with_description("Stripe customer creation with metadata"),
        ScenarioDef::new("Send an email notification via SendGrid about the order", "sendgrid_send_email")
            .with_variables(json!({
                "recipient": { "email": "customer@example.com", "name": "John Customer" },
                "order": { "id": "ORD-12345", "total": "$149.99", "status": "shipped" },
                "from_email": "orders@store.com",
                "from_name": "Store Notifications"
            }))
            .with_description("SendGrid email for order notification"),
        ScenarioDef::new("Send an SMS alert via Twilio about the system status", "twilio_send_sms")
            .with_variables(json!({
                "alert_phone": "+14155551234",
                "twilio_number": "+14155559876",
                "alert": {
                    "type": "warning",
                    "message": "CPU usage exceeded 90% on production server",
                    "timestamp": "2024-01-08T14:30:00Z"
                }
            }))
            .with_description("Twilio SMS for system alerts"),
    ]
}
