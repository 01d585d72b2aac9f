use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::eval::{report::ScenarioResult, EvalResults};

pub const ACTION_ACCURACY: &str = "action_accuracy";
pub const LIQUID_VALID: &str = "liquid_valid";
pub const RENDERS_TO_JSON: &str = "renders_to_json";
pub const AVG_LATENCY_MS: &str = "avg_latency_ms";
pub const ERROR_RATE: &str = "error_rate";

/// Metrics compared between runs, in report order.
pub const COMPARED_METRICS: [&str; 4] = [ACTION_ACCURACY, LIQUID_VALID, RENDERS_TO_JSON, AVG_LATENCY_MS];

/// Aggregate metrics of one evaluation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalMetrics {
    /// Percentage of successful scenarios that picked the expected action
    pub action_accuracy: f64,
    /// Percentage of successful scenarios whose config compiled as a template
    pub liquid_valid: f64,
    /// Percentage of successful scenarios whose config rendered to JSON
    pub renders_to_json: f64,
    /// Mean agent latency over successful scenarios
    pub avg_latency_ms: f64,
    /// Percentage of all scenarios that ended in an error
    pub error_rate: f64,
}

impl EvalMetrics {
    pub fn get(&self, metric: &str) -> Option<f64> {
        match metric {
            ACTION_ACCURACY => Some(self.action_accuracy),
            LIQUID_VALID => Some(self.liquid_valid),
            RENDERS_TO_JSON => Some(self.renders_to_json),
            AVG_LATENCY_MS => Some(self.avg_latency_ms),
            ERROR_RATE => Some(self.error_rate),
            _ => None,
        }
    }
}

/// Computes run metrics. Rates other than `error_rate` only count scenarios
/// that completed without error; an empty denominator yields 0.
pub fn aggregate(results: &[ScenarioResult]) -> EvalMetrics {
    let successful: Vec<&ScenarioResult> = results.iter().filter(|r| r.error.is_none()).collect();
    let failed = results.len() - successful.len();

    let rate = |count: usize| percentage(count, successful.len());

    let latency_sum: f64 = successful.iter().map(|r| r.latency_ms).sum();
    let avg_latency_ms = if successful.is_empty() {
        0.0
    } else {
        latency_sum / successful.len() as f64
    };

    EvalMetrics {
        action_accuracy: rate(successful.iter().filter(|r| r.action_correct).count()),
        liquid_valid: rate(successful.iter().filter(|r| r.liquid_valid).count()),
        renders_to_json: rate(successful.iter().filter(|r| r.renders_to_json).count()),
        avg_latency_ms,
        error_rate: percentage(failed, results.len()),
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Movement of one metric between two runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricChange {
    pub baseline: f64,
    pub current: f64,
    /// `current - baseline`
    pub change: f64,
    /// Higher is better, except for latency
    pub improved: bool,
}

impl MetricChange {
    pub fn new(metric: &str, baseline: f64, current: f64) -> Self {
        let change = current - baseline;
        let improved = if metric == AVG_LATENCY_MS {
            change < 0.0
        } else {
            change > 0.0
        };

        Self {
            baseline,
            current,
            change,
            improved,
        }
    }

    /// `↑` improved, `↓` changed for the worse, `=` unchanged.
    pub fn arrow(&self) -> &'static str {
        if self.improved {
            "↑"
        } else if self.change != 0.0 {
            "↓"
        } else {
            "="
        }
    }

    pub fn signed_change(&self) -> String {
        if self.change >= 0.0 {
            format!("+{:.1}", self.change)
        } else {
            format!("{:.1}", self.change)
        }
    }
}

/// Metric-by-metric comparison of two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub baseline_timestamp: String,
    pub current_timestamp: String,
    pub baseline_prompt_hash: String,
    pub current_prompt_hash: String,
    pub metric_changes: BTreeMap<String, MetricChange>,
}

impl ComparisonReport {
    /// Changes in report order.
    pub fn changes(&self) -> impl Iterator<Item = (&'static str, &MetricChange)> {
        COMPARED_METRICS
            .iter()
            .filter_map(|metric| self.metric_changes.get(*metric).map(|change| (*metric, change)))
    }

    pub fn prompt_changed(&self) -> bool {
        self.baseline_prompt_hash != self.current_prompt_hash
    }

    pub fn print(&self) {
        let rule = "=".repeat(60);
        println!("\n{rule}");
        println!("COMPARISON RESULTS");
        println!("{rule}");
        println!(
            "  baseline: {} (prompt {})",
            self.baseline_timestamp, self.baseline_prompt_hash
        );
        println!(
            "  current:  {} (prompt {})",
            self.current_timestamp, self.current_prompt_hash
        );
        for (metric, change) in self.changes() {
            println!(
                "  {metric}: {:.1} → {:.1} ({}) {}",
                change.baseline,
                change.current,
                change.signed_change(),
                change.arrow()
            );
        }
        println!("{rule}");
    }
}

pub fn compare(baseline: &EvalResults, current: &EvalResults) -> ComparisonReport {
    let metric_changes = COMPARED_METRICS
        .iter()
        .map(|metric| {
            let before = baseline.metrics.get(metric).unwrap_or_default();
            let after = current.metrics.get(metric).unwrap_or_default();
            (metric.to_string(), MetricChange::new(metric, before, after))
        })
        .collect();

    ComparisonReport {
        baseline_timestamp: baseline.timestamp.clone(),
        current_timestamp: current.timestamp.clone(),
        baseline_prompt_hash: baseline.prompt_hash.clone(),
        current_prompt_hash: current.prompt_hash.clone(),
        metric_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: usize, correct: bool, latency_ms: f64, error: Option<&str>) -> ScenarioResult {
        ScenarioResult {
            scenario_id: id,
            request: format!("request {id}"),
            expected_action: "slack_post_message".to_string(),
            actual_action: error.is_none().then(|| "slack_post_message".to_string()),
            action_correct: correct,
            liquid_valid: error.is_none(),
            renders_to_json: correct,
            latency_ms,
            error: error.map(str::to_string),
            ..ScenarioResult::default()
        }
    }

    #[test]
    fn aggregate_over_successful_subset() {
        let results = vec![
            result(0, true, 100.0, None),
            result(1, false, 0.0, Some("provider unavailable")),
            result(2, true, 200.0, None),
            result(3, false, 300.0, None),
        ];
        let metrics = aggregate(&results);

        assert!((metrics.action_accuracy - 66.67).abs() < 0.01);
        assert!((metrics.liquid_valid - 100.0).abs() < f64::EPSILON);
        assert!((metrics.renders_to_json - 66.67).abs() < 0.01);
        assert!((metrics.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((metrics.error_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_denominators_yield_zero() {
        assert_eq!(aggregate(&[]), EvalMetrics::default());

        let all_failed = vec![result(0, false, 0.0, Some("boom"))];
        let metrics = aggregate(&all_failed);
        assert_eq!(metrics.action_accuracy, 0.0);
        assert_eq!(metrics.avg_latency_ms, 0.0);
        assert_eq!(metrics.error_rate, 100.0);
    }

    #[test]
    fn latency_improves_downwards() {
        let faster = MetricChange::new(AVG_LATENCY_MS, 1200.0, 900.0);
        assert!(faster.improved);
        assert_eq!(faster.arrow(), "↑");
        assert_eq!(faster.signed_change(), "-300.0");

        let worse = MetricChange::new(ACTION_ACCURACY, 75.0, 50.0);
        assert!(!worse.improved);
        assert_eq!(worse.arrow(), "↓");

        let same = MetricChange::new(LIQUID_VALID, 100.0, 100.0);
        assert!(!same.improved);
        assert_eq!(same.arrow(), "=");
        assert_eq!(same.signed_change(), "+0.0");
    }

    #[test]
    fn missing_metrics_load_as_zero() {
        let metrics: EvalMetrics = serde_json::from_str(r#"{"action_accuracy": 50.0}"#).unwrap();
        assert_eq!(metrics.action_accuracy, 50.0);
        assert_eq!(metrics.avg_latency_ms, 0.0);
        assert_eq!(metrics.get("unknown_metric"), None);
    }
}
