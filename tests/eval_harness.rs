use integrator::{
    eval::{default_scenarios, EvalResults, ScenarioDef, ScenarioRunner},
    metrics, AgentError, AgentResponse, FnAgent, KeywordAgent, RunLabels, WorkflowContext,
};
use serde_json::json;

fn scenarios() -> Vec<ScenarioDef> {
    vec![
        ScenarioDef::new("Post the summary to Slack", "slack_post_message")
            .with_variables(json!({ "slack_channel": "#alerts", "summary": "Found 3 products" })),
        ScenarioDef::new("Open a ticket", "jira_create_issue"),
        ScenarioDef::new("Create a GitHub issue", "github_create_issue")
            .with_variables(json!({ "summary": "Scrape failed" })),
        ScenarioDef::new("Text the on-call engineer", "twilio_send_sms"),
    ]
}

fn flaky_agent() -> FnAgent<impl Fn(&str, &WorkflowContext) -> Result<AgentResponse, AgentError> + Send + Sync>
{
    FnAgent::new("flaky", |request: &str, _: &WorkflowContext| {
        if request == "Open a ticket" {
            return Err(AgentError::Failed("upstream timeout".to_string()));
        }
        Ok(KeywordAgent::respond(request))
    })
}

#[tokio::test]
async fn slack_scenario_renders_end_to_end() {
    let runner = ScenarioRunner::new(scenarios()[..1].to_vec());
    let results = runner.run(&KeywordAgent).await;
    let detail = &results.details[0];

    assert!(detail.action_correct);
    assert!(detail.liquid_valid);
    assert!(detail.renders_to_json);
    assert_eq!(
        detail.rendered_config.as_deref(),
        Some(r##"{ "channel": "#alerts", "text": "Found 3 products" }"##)
    );
}

#[tokio::test]
async fn one_failing_scenario_does_not_stop_the_run() {
    let results = ScenarioRunner::new(scenarios())
        .with_labels(RunLabels::new("abc1234", "0123abcd"))
        .run(&flaky_agent())
        .await;

    assert_eq!(results.total_scenarios, 4);
    assert_eq!(results.details.len(), 4);

    let failed = &results.details[1];
    assert_eq!(failed.error.as_deref(), Some("upstream timeout"));
    assert!(failed.actual_action.is_none());

    for index in [0, 2, 3] {
        let detail = &results.details[index];
        assert!(detail.error.is_none(), "scenario {index}");
        assert!(detail.actual_action.is_some(), "scenario {index}");
    }

    // slack and github are right, the SMS request falls through to "unknown"
    assert!((results.metrics.action_accuracy - 66.67).abs() < 0.01);
    assert_eq!(results.metrics.error_rate, 25.0);
    assert_eq!(results.details[3].actual_action.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn builtin_scenarios_run_with_mock_agent() {
    let results = ScenarioRunner::new(default_scenarios()).run(&KeywordAgent).await;

    assert_eq!(results.total_scenarios, 12);
    assert_eq!(results.metrics.error_rate, 0.0);
    assert!(results.details.iter().all(|detail| detail.liquid_valid));
    assert!(results.details[0].action_correct);
}

#[tokio::test]
async fn saved_runs_compare() {
    let dir = tempfile::tempdir().unwrap();

    let baseline = ScenarioRunner::new(scenarios())
        .with_labels(RunLabels::new("abc1234", "0123abcd"))
        .run(&flaky_agent())
        .await;
    let current = ScenarioRunner::new(scenarios())
        .with_labels(RunLabels::new("def5678", "4567cdef"))
        .run(&KeywordAgent)
        .await;

    let baseline_path = baseline.save(dir.path(), Some("eval_baseline.json")).unwrap();
    let current_path = current.save(dir.path().join("nested"), None).unwrap();
    assert!(current_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap()
        .starts_with("eval_"));

    let loaded = EvalResults::load(&baseline_path).unwrap();
    assert_eq!(loaded.git_sha, "abc1234");
    assert_eq!(loaded.timestamp, baseline.timestamp);
    assert_eq!(loaded.details.len(), 4);
    assert_eq!(loaded.details[1].error.as_deref(), Some("upstream timeout"));

    let report = metrics::compare(&loaded, &EvalResults::load(&current_path).unwrap());
    assert!(report.prompt_changed());

    let accuracy = &report.metric_changes["action_accuracy"];
    assert!((accuracy.baseline - 66.67).abs() < 0.01);
    assert_eq!(accuracy.current, 50.0);
    assert!(!accuracy.improved);
    assert_eq!(report.changes().count(), 4);
}
