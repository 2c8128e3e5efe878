//! Classification of execution results against ground truth

use std::collections::HashMap;
use tracing::warn;
use uibench_common::{CaseExecutionResult, ScoreLabel, ScoreResult, TestCase};

/// Label lookup for one task. A failed execution is always `ERROR`.
pub fn classify(execution_success: bool, ground_truth: bool, predicted: bool) -> ScoreLabel {
    match (execution_success, ground_truth, predicted) {
        (false, _, _) => ScoreLabel::Error,
        (true, true, true) => ScoreLabel::Tp,
        (true, false, true) => ScoreLabel::Fp,
        (true, true, false) => ScoreLabel::Fn,
        (true, false, false) => ScoreLabel::Tn,
    }
}

/// Score one execution. Without a matching test case the label is `ERROR`.
pub fn score_case(exec: &CaseExecutionResult, test_case: Option<&TestCase>) -> ScoreResult {
    let predicted = exec.result.has_defect;

    let (ground_truth, label, execution_success) = match test_case {
        Some(case) => {
            let truth = case.ground_truth.has_defect;
            (truth, classify(exec.success, truth, predicted), exec.success)
        }
        None => (false, ScoreLabel::Error, false),
    };

    ScoreResult {
        case_id: exec.case_id.clone(),
        scene_id: exec.scene_id.clone(),
        agent_name: exec.agent_name.clone(),
        ground_truth_has_defect: ground_truth,
        predicted_has_defect: predicted,
        label,
        execution_success,
    }
}

/// Score every execution, preserving input order
pub fn score_cases(executions: &[CaseExecutionResult], cases: &[TestCase]) -> Vec<ScoreResult> {
    let by_id: HashMap<&str, &TestCase> = cases.iter().map(|c| (c.case_id.as_str(), c)).collect();

    executions
        .iter()
        .map(|exec| {
            let case = by_id.get(exec.case_id.as_str()).copied();
            if case.is_none() {
                warn!(case_id = %exec.case_id, agent = %exec.agent_name, "No test case for result, scoring as ERROR");
            }
            score_case(exec, case)
        })
        .collect()
}
