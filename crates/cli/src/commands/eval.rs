//! Re-scoring an existing run

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;
use uibench_common::data::load_test_cases;
use uibench_common::{CaseExecutionResult, MetricsSummary, ScoreResult, TestCase};
use uibench_engine::scoring::score_cases;
use uibench_engine::{metrics, ComparisonReport};

use crate::artifacts::{self, RunArtifacts, RunRecord};
use crate::output::{print_info, print_list, print_success, OutputFormat};

#[derive(Args)]
pub struct EvalArgs {
    /// Run directory containing raw-results.json
    pub run_dir: PathBuf,

    /// Test case file (defaults to the one recorded for the run)
    #[arg(short, long)]
    pub cases: Option<PathBuf>,
}

/// Scores, metrics, and comparison for one run
pub struct Evaluation {
    pub scores: Vec<ScoreResult>,
    pub summary: MetricsSummary,
    pub comparison: ComparisonReport,
}

/// Score results and write `score.json`, `metrics.json`, and `comparison.json`
pub fn evaluate(
    run_id: &str,
    results: &[CaseExecutionResult],
    cases: &[TestCase],
    store: &RunArtifacts,
) -> Result<Evaluation> {
    let scores = score_cases(results, cases);
    let summary = metrics::summarize(run_id, &scores);
    let comparison = ComparisonReport::build(run_id, &scores);

    store.write_json(artifacts::SCORE, &scores)?;
    store.write_json(artifacts::METRICS, &summary)?;
    store.write_json(artifacts::COMPARISON, &comparison)?;

    Ok(Evaluation {
        scores,
        summary,
        comparison,
    })
}

pub fn print_evaluation(evaluation: &Evaluation, format: OutputFormat) {
    print_list(&evaluation.summary.by_agent, format);
    if evaluation.comparison.ranking.len() > 1 {
        print_list(&evaluation.comparison.ranking, format);
    }
}

fn run_id_of(dir: &Path, record: Option<&RunRecord>) -> String {
    record
        .map(|r| r.run_id.clone())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn execute(args: EvalArgs, format: OutputFormat) -> Result<()> {
    let store = RunArtifacts::open(&args.run_dir)?;
    let results: Vec<CaseExecutionResult> = store.read_json(artifacts::RAW_RESULTS)?;
    let record: Option<RunRecord> = store.read_json(artifacts::RUN_CONFIG).ok();

    let cases_path = match (&args.cases, &record) {
        (Some(path), _) => path.clone(),
        (None, Some(record)) => record.config.cases_path.clone(),
        (None, None) => anyhow::bail!(
            "No {} in {}; pass --cases",
            artifacts::RUN_CONFIG,
            args.run_dir.display()
        ),
    };
    let cases = load_test_cases(&cases_path)
        .with_context(|| format!("Failed to load test cases for {}", args.run_dir.display()))?;

    let run_id = run_id_of(&args.run_dir, record.as_ref());
    info!(run_id = %run_id, results = results.len(), "Re-scoring run");
    print_info(&format!("Evaluating {} results from {}", results.len(), args.run_dir.display()));

    let evaluation = evaluate(&run_id, &results, &cases, &store)?;
    print_evaluation(&evaluation, format);
    print_success(&format!(
        "Scored {} results, artifacts in {}",
        evaluation.scores.len(),
        store.dir().display()
    ));
    Ok(())
}
