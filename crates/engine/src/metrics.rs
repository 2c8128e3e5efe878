//! Per-agent metric aggregation

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use uibench_common::{AgentMetrics, LabelCounts, MetricsSummary, ScoreResult};

/// Round to four decimal places
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Compute metrics from label counts
pub fn metrics_from_counts(agent_name: &str, counts: LabelCounts) -> AgentMetrics {
    let total = counts.total();
    let precision = ratio(counts.tp, counts.tp + counts.fp);
    let recall = ratio(counts.tp, counts.tp + counts.fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    AgentMetrics {
        agent_name: agent_name.to_string(),
        total,
        counts,
        precision: round4(precision),
        recall: round4(recall),
        f1: round4(f1),
        miss_rate: round4(ratio(counts.fn_, counts.tp + counts.fn_)),
        accuracy: round4(ratio(counts.tp + counts.tn, total - counts.error)),
        error_rate: round4(ratio(counts.error, total)),
    }
}

/// One pass over the scores, grouped by agent, in agent name order
pub fn calculate_agent_metrics(scores: &[ScoreResult]) -> Vec<AgentMetrics> {
    let mut grouped: BTreeMap<&str, LabelCounts> = BTreeMap::new();
    for score in scores {
        grouped
            .entry(score.agent_name.as_str())
            .or_default()
            .record(score.label);
    }

    grouped
        .into_iter()
        .map(|(agent, counts)| metrics_from_counts(agent, counts))
        .collect()
}

pub fn summarize(run_id: &str, scores: &[ScoreResult]) -> MetricsSummary {
    let by_agent = calculate_agent_metrics(scores);
    let cases: BTreeSet<&str> = scores.iter().map(|s| s.case_id.as_str()).collect();

    MetricsSummary {
        run_id: run_id.to_string(),
        total_cases: cases.len(),
        total_agents: by_agent.len(),
        by_agent,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uibench_common::ScoreLabel;

    fn score(case_id: &str, agent: &str, label: ScoreLabel) -> ScoreResult {
        ScoreResult {
            case_id: case_id.to_string(),
            scene_id: "s1".to_string(),
            agent_name: agent.to_string(),
            ground_truth_has_defect: matches!(label, ScoreLabel::Tp | ScoreLabel::Fn),
            predicted_has_defect: matches!(label, ScoreLabel::Tp | ScoreLabel::Fp),
            label,
            execution_success: label != ScoreLabel::Error,
        }
    }

    #[test]
    fn test_three_tp_one_fp_one_fn() {
        let labels = [
            ScoreLabel::Tp,
            ScoreLabel::Tp,
            ScoreLabel::Tp,
            ScoreLabel::Fp,
            ScoreLabel::Fn,
        ];
        let scores: Vec<ScoreResult> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| score(&format!("c{}", i), "a", *l))
            .collect();

        let metrics = calculate_agent_metrics(&scores);
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.precision, 0.75);
        assert_eq!(m.recall, 0.75);
        assert_eq!(m.f1, 0.75);
        assert_eq!(m.miss_rate, 0.25);
        assert_eq!(m.accuracy, 0.6);
        assert_eq!(m.error_rate, 0.0);
    }

    #[test]
    fn test_zero_denominators() {
        let m = metrics_from_counts("a", LabelCounts::default());
        assert_eq!(m.total, 0);
        assert_eq!(
            (m.precision, m.recall, m.f1, m.miss_rate, m.accuracy, m.error_rate),
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
        );

        let all_errors = LabelCounts {
            error: 3,
            ..Default::default()
        };
        let m = metrics_from_counts("a", all_errors);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.error_rate, 1.0);
    }

    #[test]
    fn test_rounding() {
        let counts = LabelCounts {
            tp: 1,
            fp: 2,
            ..Default::default()
        };
        assert_eq!(metrics_from_counts("a", counts).precision, 0.3333);
        assert_eq!(round4(0.66666), 0.6667);
    }

    #[test]
    fn test_grouped_by_agent() {
        let scores = vec![
            score("c1", "zeta", ScoreLabel::Tn),
            score("c1", "alpha", ScoreLabel::Error),
            score("c2", "alpha", ScoreLabel::Tp),
        ];
        let summary = summarize("run-1", &scores);
        assert_eq!(summary.total_cases, 2);
        assert_eq!(summary.total_agents, 2);
        assert_eq!(summary.by_agent[0].agent_name, "alpha");
        assert_eq!(summary.by_agent[0].error_rate, 0.5);
        assert_eq!(summary.by_agent[0].accuracy, 1.0);
        assert_eq!(summary.by_agent[1].counts.tn, 1);
    }
}
