use std::path::PathBuf;

pub mod report;
pub mod runner;
pub mod scenario;

pub use report::{EvalResults, ScenarioResult};
pub use runner::{ScenarioProgress, ScenarioRunner};
pub use scenario::{default_scenarios, load_scenarios, ScenarioContext, ScenarioDef};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no scenarios found in {0}")]
    NoScenarios(PathBuf),
}

impl EvalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
