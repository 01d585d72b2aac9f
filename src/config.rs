use std::{collections::HashMap, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    agent::{IntegrationAgent, DEFAULT_MAX_ROUNDS},
    catalog::{agent_tools, ActionCatalog, DirectoryRetriever},
    eval::EvalError,
    labels::RunLabels,
    prompts::{PromptError, PromptLibrary},
    providers::openai::{OpenAI, OpenAIConfig},
    LLMError,
};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("OPENAI_API_KEY is not set; add it to the environment or a .env file")]
    MissingApiKey,
    #[error(transparent)]
    Provider(#[from] LLMError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Data(#[from] EvalError),
}

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub request_timeout: Option<Duration>,
    pub temperature: f32,
    pub verbose: bool,
    pub max_rounds: usize,
    pub data_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub results_dir: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            organization: None,
            request_timeout: None,
            temperature: DEFAULT_TEMPERATURE,
            verbose: false,
            max_rounds: DEFAULT_MAX_ROUNDS,
            data_dir: PathBuf::from("data"),
            prompts_dir: PathBuf::from("prompts"),
            results_dir: PathBuf::from("results"),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Builds a config from explicit key/value pairs. Empty values count as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|value| value.trim().to_string());

        let mut config = Self::default();
        config.api_key = get("OPENAI_API_KEY");
        config.base_url = get("OPENAI_BASE_URL");
        config.organization = get("OPENAI_ORGANIZATION");
        if let Some(model) = get("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(ms) = parse::<u64>(&vars, "OPENAI_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(temperature) = parse::<f32>(&vars, "AGENT_TEMPERATURE")? {
            config.temperature = temperature;
        }
        if let Some(verbose) = get("AGENT_VERBOSE") {
            config.verbose = parse_flag("AGENT_VERBOSE", &verbose)?;
        }
        if let Some(max_rounds) = parse::<usize>(&vars, "AGENT_MAX_ROUNDS")? {
            config.max_rounds = max_rounds.max(1);
        }
        if let Some(dir) = get("INTEGRATOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("INTEGRATOR_PROMPTS_DIR") {
            config.prompts_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("INTEGRATOR_RESULTS_DIR") {
            config.results_dir = PathBuf::from(dir);
        }
        if let Some(level) = get("RUST_LOG") {
            config.log_level = level;
        }

        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn api_docs_dir(&self) -> PathBuf {
        self.data_dir.join(crate::catalog::API_DOCS_DIR)
    }

    /// Labels for a run started from the current directory.
    pub fn run_labels(&self) -> RunLabels {
        RunLabels::detect(".", &self.prompts_dir)
    }

    pub fn openai_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let mut openai = OpenAIConfig::new(self.require_api_key()?);
        if let Some(base_url) = &self.base_url {
            openai = openai.with_base_url(base_url.clone());
        }
        if let Some(organization) = &self.organization {
            openai = openai.with_organization(organization.clone());
        }
        if let Some(timeout) = self.request_timeout {
            openai = openai.with_timeout(timeout);
        }
        Ok(openai)
    }

    pub fn openai(&self) -> Result<OpenAI, ConfigError> {
        Ok(OpenAI::from_config(self.openai_config()?)?)
    }

    /// Wires the OpenAI provider, prompts, action catalog and documentation
    /// tools into an agent. `model` overrides the configured model.
    pub fn integration_agent(&self, model: Option<&str>) -> Result<IntegrationAgent, ConfigError> {
        let provider = Arc::new(self.openai()?);
        let prompts = Arc::new(PromptLibrary::load(&self.prompts_dir)?);
        let catalog = Arc::new(ActionCatalog::load(&self.data_dir)?);
        let retriever = Arc::new(DirectoryRetriever::load(self.api_docs_dir())?);
        let tools = agent_tools(Arc::clone(&catalog), retriever);

        tracing::debug!(
            actions = catalog.len(),
            tools = ?tools.names(),
            prompts = %self.prompts_dir.display(),
            "assembled integration agent"
        );

        Ok(IntegrationAgent::new(
            provider,
            model.unwrap_or(&self.model),
            prompts,
        )
        .with_temperature(self.temperature)
        .with_max_rounds(self.max_rounds)
        .with_action_listing(catalog.prompt_listing())
        .with_function_registry(Arc::new(tools))
        .with_trace(self.verbose))
    }
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    match vars.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                value: value.clone(),
            }),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
