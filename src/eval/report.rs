use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use super::EvalError;
use crate::metrics::EvalMetrics;

/// Outcome of one scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioResult {
    pub scenario_id: usize,
    pub request: String,
    pub expected_action: String,
    pub actual_action: Option<String>,
    pub action_correct: bool,
    pub liquid_valid: bool,
    pub renders_to_json: bool,
    pub reasoning: String,
    pub proposed_config: String,
    pub rendered_config: Option<String>,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn marker(&self) -> &'static str {
        if self.action_correct {
            "✓"
        } else {
            "✗"
        }
    }
}

/// One evaluation run: labels, aggregate metrics and per-scenario details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalResults {
    pub timestamp: String,
    pub git_sha: String,
    pub prompt_hash: String,
    pub total_scenarios: usize,
    #[serde(default)]
    pub metrics: EvalMetrics,
    #[serde(default)]
    pub details: Vec<ScenarioResult>,
}

impl EvalResults {
    pub fn default_filename() -> String {
        format!("eval_{}.json", Local::now().format("%Y%m%d_%H%M%S"))
    }

    /// Writes the results as pretty JSON into `dir` and returns the file path.
    pub fn save(&self, dir: impl AsRef<Path>, filename: Option<&str>) -> Result<PathBuf, EvalError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| EvalError::io(dir, source))?;

        let path = match filename {
            Some(name) => dir.join(name),
            None => dir.join(Self::default_filename()),
        };
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| EvalError::io(&path, source))?;

        tracing::info!(path = %path.display(), "saved evaluation results");
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| EvalError::io(path, source))?;

        serde_json::from_str(&content).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Markdown rows for a CI job summary.
    pub fn summary_table(&self) -> String {
        let m = &self.metrics;
        let mut out = String::new();
        out.push_str("| Metric | Value |\n");
        out.push_str("|--------|-------|\n");
        out.push_str(&format!("| Action Accuracy | {:.1}% |\n", m.action_accuracy));
        out.push_str(&format!("| Liquid Valid | {:.1}% |\n", m.liquid_valid));
        out.push_str(&format!("| Renders to JSON | {:.1}% |\n", m.renders_to_json));
        out.push_str(&format!("| Avg Latency | {:.0}ms |\n", m.avg_latency_ms));
        out.push_str(&format!("| Error Rate | {:.1}% |\n", m.error_rate));
        out.push('\n');
        out.push_str(&format!("Prompt Hash: `{}`\n", self.prompt_hash));
        out
    }

    pub fn print_summary(&self) {
        let rule = "=".repeat(60);
        let m = &self.metrics;

        println!("\n{rule}");
        println!("{}", "EVALUATION RESULTS".bold());
        println!("{rule}");
        println!("Timestamp: {}", self.timestamp);
        println!("Git SHA: {}", self.git_sha);
        println!("Prompt Hash: {}", self.prompt_hash);
        println!("Total Scenarios: {}", self.total_scenarios);
        println!();
        println!("METRICS:");
        println!("  Action Accuracy:  {:.1}%", m.action_accuracy);
        println!("  Liquid Valid:     {:.1}%", m.liquid_valid);
        println!("  Renders to JSON:  {:.1}%", m.renders_to_json);
        println!("  Avg Latency:      {:.0}ms", m.avg_latency_ms);
        println!("  Error Rate:       {:.1}%", m.error_rate);
        println!();
        println!("SCENARIO DETAILS:");

        for detail in &self.details {
            let marker = if detail.action_correct {
                detail.marker().green()
            } else {
                detail.marker().red()
            };
            println!(
                "  {marker} [{}] {}...",
                detail.scenario_id + 1,
                preview(&detail.request, 40)
            );
            println!("      Expected: {}", detail.expected_action);
            println!(
                "      Got:      {}",
                detail.actual_action.as_deref().unwrap_or("N/A")
            );
            if let Some(error) = &detail.error {
                println!("      Error:    {}...", preview(error, 50).as_str().red());
            }
        }
        println!("{rule}");
    }
}

pub(crate) fn preview(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filename_is_timestamped() {
        let name = EvalResults::default_filename();
        assert!(name.starts_with("eval_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "eval_20240108_143000.json".len());
    }

    #[test]
    fn summary_table_formats_metrics() {
        let results = EvalResults {
            prompt_hash: "abcd1234".to_string(),
            metrics: EvalMetrics {
                action_accuracy: 66.6666,
                liquid_valid: 100.0,
                renders_to_json: 50.0,
                avg_latency_ms: 1234.4,
                error_rate: 25.0,
            },
            ..EvalResults::default()
        };
        let table = results.summary_table();

        assert!(table.contains("| Action Accuracy | 66.7% |"));
        assert!(table.contains("| Avg Latency | 1234ms |"));
        assert!(table.contains("| Error Rate | 25.0% |"));
        assert!(table.ends_with("Prompt Hash: `abcd1234`\n"));
    }

    #[test]
    fn old_result_files_load_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval_old.json");
        fs::write(
            &path,
            r#"{"timestamp": "2024-01-08T14:30:00", "git_sha": "abc1234", "prompt_hash": "no-prompts",
                "total_scenarios": 1, "metrics": {"action_accuracy": 100.0},
                "details": [{"scenario_id": 0, "request": "Post to Slack", "expected_action": "slack_post_message"}]}"#,
        )
        .unwrap();

        let results = EvalResults::load(&path).unwrap();
        assert_eq!(results.metrics.action_accuracy, 100.0);
        assert_eq!(results.metrics.error_rate, 0.0);
        assert!(!results.details[0].action_correct);
        assert!(results.details[0].actual_action.is_none());
    }
}
