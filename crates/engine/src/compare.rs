//! Side-by-side comparison of several agents over one run

use crate::metrics::calculate_agent_metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uibench_common::{AgentMetrics, ScoreLabel, ScoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCaseOutcome {
    pub agent_name: String,
    pub predicted_has_defect: bool,
    pub label: ScoreLabel,
}

/// Every agent's outcome for one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseComparison {
    pub case_id: String,
    pub scene_id: String,
    pub ground_truth_has_defect: bool,
    pub results: Vec<AgentCaseOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub rank: usize,
    pub agent_name: String,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub run_id: String,
    pub agent_metrics: Vec<AgentMetrics>,
    pub case_comparisons: Vec<CaseComparison>,
    pub ranking: Vec<RankEntry>,
}

impl ComparisonReport {
    pub fn build(run_id: &str, scores: &[ScoreResult]) -> Self {
        let agent_metrics = calculate_agent_metrics(scores);

        let mut by_case: BTreeMap<&str, CaseComparison> = BTreeMap::new();
        for score in scores {
            let entry = by_case
                .entry(score.case_id.as_str())
                .or_insert_with(|| CaseComparison {
                    case_id: score.case_id.clone(),
                    scene_id: score.scene_id.clone(),
                    ground_truth_has_defect: score.ground_truth_has_defect,
                    results: Vec::new(),
                });
            // A missing test case scores with a false ground truth; prefer a known one
            entry.ground_truth_has_defect |= score.ground_truth_has_defect;
            entry.results.push(AgentCaseOutcome {
                agent_name: score.agent_name.clone(),
                predicted_has_defect: score.predicted_has_defect,
                label: score.label,
            });
        }

        let case_comparisons = by_case
            .into_values()
            .map(|mut c| {
                c.results.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
                c
            })
            .collect();

        Self {
            run_id: run_id.to_string(),
            ranking: rank(&agent_metrics),
            agent_metrics,
            case_comparisons,
        }
    }
}

/// F1 descending, ties by name, ranks start at 1
fn rank(metrics: &[AgentMetrics]) -> Vec<RankEntry> {
    let mut ordered: Vec<&AgentMetrics> = metrics.iter().collect();
    ordered.sort_by(|a, b| {
        b.f1.total_cmp(&a.f1)
            .then_with(|| a.agent_name.cmp(&b.agent_name))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, m)| RankEntry {
            rank: i + 1,
            agent_name: m.agent_name.clone(),
            f1: m.f1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(case_id: &str, agent: &str, truth: bool, predicted: bool) -> ScoreResult {
        let label = crate::scoring::classify(true, truth, predicted);
        ScoreResult {
            case_id: case_id.to_string(),
            scene_id: "s1".to_string(),
            agent_name: agent.to_string(),
            ground_truth_has_defect: truth,
            predicted_has_defect: predicted,
            label,
            execution_success: true,
        }
    }

    #[test]
    fn test_report_shape() {
        let scores = vec![
            score("c2", "noop", true, false),
            score("c1", "noop", false, false),
            score("c2", "dummy", true, true),
            score("c1", "dummy", false, true),
        ];
        let report = ComparisonReport::build("r1", &scores);

        let ids: Vec<&str> = report.case_comparisons.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(report.case_comparisons[0].results[0].agent_name, "dummy");

        assert_eq!(report.ranking[0].agent_name, "dummy");
        assert_eq!(report.ranking[0].rank, 1);
        assert_eq!(report.ranking[1].agent_name, "noop");
        assert_eq!(report.ranking[1].f1, 0.0);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["caseComparisons"].is_array());
        assert_eq!(json["ranking"][0]["agentName"], "dummy");
    }

    #[test]
    fn test_ties_ranked_by_name() {
        let scores = vec![score("c1", "b", true, true), score("c1", "a", true, true)];
        let report = ComparisonReport::build("r1", &scores);
        let names: Vec<&str> = report.ranking.iter().map(|r| r.agent_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(report.ranking[1].rank, 2);
    }
}
