use std::{any::Any, fmt, panic::AssertUnwindSafe, time::Instant};

use chrono::Local;
use futures_util::FutureExt;

use crate::{
    agent::{elapsed_ms, ActionAgent, AgentResponse},
    eval::{
        report::{preview, EvalResults, ScenarioResult},
        scenario::ScenarioDef,
    },
    labels::RunLabels,
    metrics,
    template::TemplateValidator,
};

/// Passed to the progress callback after each scenario.
#[derive(Debug)]
pub struct ScenarioProgress<'a> {
    /// Zero-based position in the run.
    pub index: usize,
    pub total: usize,
    pub scenario: &'a ScenarioDef,
    pub result: &'a ScenarioResult,
}

type ProgressFn = dyn Fn(&ScenarioProgress<'_>) + Send + Sync;

/// Runs scenarios one after another against an agent and grades the answers.
pub struct ScenarioRunner {
    scenarios: Vec<ScenarioDef>,
    labels: RunLabels,
    validator: TemplateValidator,
    progress: Option<Box<ProgressFn>>,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("scenarios", &self.scenarios.len())
            .field("labels", &self.labels)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl ScenarioRunner {
    pub fn new(scenarios: Vec<ScenarioDef>) -> Self {
        Self {
            scenarios,
            labels: RunLabels::default(),
            validator: TemplateValidator::new(),
            progress: None,
        }
    }

    pub fn with_labels(mut self, labels: RunLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_validator(mut self, validator: TemplateValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ScenarioProgress<'_>) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn scenarios(&self) -> &[ScenarioDef] {
        &self.scenarios
    }

    pub async fn run_scenario(
        &self,
        scenario: &ScenarioDef,
        scenario_id: usize,
        agent: &dyn ActionAgent,
    ) -> ScenarioResult {
        let mut result = ScenarioResult {
            scenario_id,
            request: scenario.request.clone(),
            expected_action: scenario.expected_action.clone(),
            ..ScenarioResult::default()
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(agent.run(&scenario.request, &scenario.context))
            .catch_unwind()
            .await;
        let latency_ms = elapsed_ms(started);

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                tracing::warn!(scenario_id, %error, "agent failed");
                result.error = Some(error.to_string());
                return result;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(scenario_id, panic = %message, "agent panicked");
                result.error = Some(message);
                return result;
            }
        };

        self.grade(scenario, response, latency_ms, result)
    }

    fn grade(
        &self,
        scenario: &ScenarioDef,
        response: AgentResponse,
        latency_ms: f64,
        mut result: ScenarioResult,
    ) -> ScenarioResult {
        let check = self
            .validator
            .validate(&response.proposed_config, &scenario.context.bindings());

        result.latency_ms = latency_ms;
        result.action_correct = response.selected_action == scenario.expected_action;
        result.liquid_valid = check.syntax_valid;
        result.renders_to_json = check.renders_to_json;
        result.rendered_config = check.rendered;
        result.actual_action = Some(response.selected_action);
        result.reasoning = response.reasoning;
        result.proposed_config = response.proposed_config;
        result
    }

    /// Runs every scenario in order. Failures are recorded per scenario and
    /// never stop the run.
    pub async fn run(&self, agent: &dyn ActionAgent) -> EvalResults {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let total = self.scenarios.len();
        let mut details = Vec::with_capacity(total);

        tracing::info!(agent = agent.name(), scenarios = total, "starting evaluation run");

        for (index, scenario) in self.scenarios.iter().enumerate() {
            tracing::info!(
                scenario = index + 1,
                total,
                request = %preview(&scenario.request, 50),
                "running scenario"
            );

            let result = self.run_scenario(scenario, index, agent).await;

            tracing::debug!(
                scenario = index + 1,
                expected = %scenario.expected_action,
                actual = result.actual_action.as_deref().unwrap_or("N/A"),
                latency_ms = result.latency_ms,
                "scenario finished"
            );

            if let Some(progress) = &self.progress {
                progress(&ScenarioProgress {
                    index,
                    total,
                    scenario,
                    result: &result,
                });
            }
            details.push(result);
        }

        let metrics = metrics::aggregate(&details);
        tracing::info!(
            action_accuracy = metrics.action_accuracy,
            error_rate = metrics.error_rate,
            "evaluation run finished"
        );

        EvalResults {
            timestamp,
            git_sha: self.labels.git_sha.clone(),
            prompt_hash: self.labels.prompt_hash.clone(),
            total_scenarios: total,
            metrics,
            details,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("agent panicked: {message}")
    } else {
        "agent panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, FnAgent, KeywordAgent, WorkflowContext};

    fn slack_scenario() -> ScenarioDef {
        ScenarioDef::new("Post the summary to Slack", "slack_post_message").with_variables(
            serde_json::json!({ "slack_channel": "#alerts", "summary": "Found 3 products" }),
        )
    }

    #[tokio::test]
    async fn grades_a_successful_answer() {
        let runner = ScenarioRunner::new(Vec::new());
        let result = runner.run_scenario(&slack_scenario(), 0, &KeywordAgent).await;

        assert!(result.error.is_none());
        assert!(result.action_correct);
        assert!(result.liquid_valid);
        assert!(result.renders_to_json);
        assert_eq!(
            result.rendered_config.as_deref(),
            Some(r##"{ "channel": "#alerts", "text": "Found 3 products" }"##)
        );
        assert!(result.latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn agent_error_is_recorded() {
        let agent = FnAgent::new("failing", |_: &str, _: &WorkflowContext| {
            Err(AgentError::Failed("rate limited".to_string()))
        });
        let result = ScenarioRunner::new(Vec::new())
            .run_scenario(&slack_scenario(), 3, &agent)
            .await;

        assert_eq!(result.scenario_id, 3);
        assert_eq!(result.error.as_deref(), Some("rate limited"));
        assert_eq!(result.latency_ms, 0.0);
        assert!(result.actual_action.is_none());
        assert!(!result.action_correct && !result.liquid_valid && !result.renders_to_json);
    }

    #[tokio::test]
    async fn agent_panic_is_isolated() {
        let agent = FnAgent::new("panicking", |_: &str, _: &WorkflowContext| -> Result<AgentResponse, AgentError> {
            panic!("tool registry missing")
        });
        let result = ScenarioRunner::new(Vec::new())
            .run_scenario(&slack_scenario(), 0, &agent)
            .await;

        assert_eq!(
            result.error.as_deref(),
            Some("agent panicked: tool registry missing")
        );
        assert_eq!(result.latency_ms, 0.0);
    }

    #[tokio::test]
    async fn run_stamps_labels_and_reports_progress() {
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let runner = ScenarioRunner::new(vec![slack_scenario(), slack_scenario()])
            .with_labels(RunLabels::new("abc1234", "deadbeef"))
            .with_progress(move |progress| {
                sink.lock().unwrap().push((progress.index, progress.total, progress.result.marker()));
            });

        let results = runner.run(&KeywordAgent).await;

        assert_eq!(results.git_sha, "abc1234");
        assert_eq!(results.prompt_hash, "deadbeef");
        assert_eq!(results.total_scenarios, 2);
        assert_eq!(results.metrics.action_accuracy, 100.0);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 2, "✓"), (1, 2, "✓")]);
    }
}
