//! Benchmark run

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uibench_common::data::{
    filter_cases_by_ids, load_scenes, load_test_cases, validate_case_scene_refs,
};
use uibench_common::{generate_run_id, CaseExecutionResult, RunConfig, Scene, TestCase};
use uibench_engine::plan::{build_run_tasks, prepare_scenes, unavailable_results};
use uibench_engine::{AgentRegistry, DevServerManager, PortAllocator, Scheduler, ShutdownCoordinator};

use super::agents::print_agents;
use super::eval::{evaluate, print_evaluation};
use crate::artifacts::{self, EnvInfo, RunArtifacts, RunRecord};
use crate::logging::EventLog;
use crate::output::{print_info, print_success, print_warning, OutputFormat};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Configuration file
    #[arg(long, default_value = "uibench.toml", env = "UIBENCH_CONFIG")]
    pub config: PathBuf,

    /// Scenes file
    #[arg(short, long)]
    pub scenes: Option<PathBuf>,

    /// Test case file
    #[arg(short, long)]
    pub cases: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Agents to run (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Maximum tasks in flight
    #[arg(short = 'p', long)]
    pub concurrency: Option<usize>,

    /// Per-task timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Only run these case ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub filter_cases: Vec<String>,

    /// List registered agents and exit
    #[arg(long)]
    pub list_agents: bool,
}

impl RunArgs {
    /// Load the config file and apply command-line overrides
    pub fn resolve_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load(&self.config)
            .with_context(|| format!("Failed to load config {}", self.config.display()))?;

        if let Some(scenes) = &self.scenes {
            config.scenes_path = scenes.clone();
        }
        if let Some(cases) = &self.cases {
            config.cases_path = cases.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if !self.agents.is_empty() {
            config.agents = self.agents.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Requested agents minus the ones disabled by configuration.
/// Unknown names fail here, before anything is started.
fn select_agents(registry: &AgentRegistry, requested: &[String]) -> Result<Vec<String>> {
    let mut selected = Vec::new();
    for name in requested {
        registry.get_required(name)?;
        if registry.is_enabled(name) {
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        } else {
            print_warning(&format!("Agent {} is disabled by configuration, skipping", name));
        }
    }
    if selected.is_empty() {
        anyhow::bail!("No enabled agents to run");
    }
    Ok(selected)
}

struct Inputs {
    scenes: Vec<Scene>,
    cases: Vec<TestCase>,
}

fn load_inputs(config: &RunConfig, filter: &[String]) -> Result<Inputs> {
    let scenes = load_scenes(&config.scenes_path)?;
    let mut cases = load_test_cases(&config.cases_path)?;

    if !filter.is_empty() {
        cases = filter_cases_by_ids(cases, filter);
        if cases.is_empty() {
            anyhow::bail!("No test cases match --filter-cases {}", filter.join(","));
        }
    }
    validate_case_scene_refs(&cases, &scenes)?;

    Ok(Inputs { scenes, cases })
}

pub async fn execute(args: RunArgs, format: OutputFormat, events: &EventLog) -> Result<()> {
    let mut registry = super::default_registry()?;
    if args.list_agents {
        print_agents(&registry, format);
        return Ok(());
    }

    let config = args.resolve_config()?;
    registry.apply_configs(&config.agent_configs);
    let agent_names = select_agents(&registry, &config.agents)?;
    let inputs = load_inputs(&config, &args.filter_cases)?;

    let run_id = generate_run_id();
    let store = RunArtifacts::create(&config.output_dir, &run_id)?;
    events
        .open(&store.path(artifacts::EVENTS))
        .context("Failed to open run event log")?;

    store.write_json(artifacts::ENV, &EnvInfo::capture())?;
    store.write_json(
        artifacts::RUN_CONFIG,
        &RunRecord {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            agents: agent_names.clone(),
            case_count: inputs.cases.len(),
            filter_cases: args.filter_cases.clone(),
            config: config.clone(),
        },
    )?;

    print_info(&format!(
        "Run {}: {} cases x {} agents, concurrency {}",
        run_id,
        inputs.cases.len(),
        agent_names.len(),
        config.concurrency
    ));

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let ports = Arc::new(PortAllocator::new(config.port_range));
    let devservers = Arc::new(DevServerManager::new(ports.clone())?);

    {
        let ports = ports.clone();
        coordinator.register("ports", move || async move {
            ports.release_all();
        });
    }
    {
        let devservers = devservers.clone();
        coordinator.register("devservers", move || async move {
            devservers.stop_all().await;
        });
    }
    let _signals = coordinator.listen_for_signals();

    let registry = Arc::new(registry);
    let ctx = RunContext {
        run_id: &run_id,
        config: &config,
        agent_names: &agent_names,
        inputs: &inputs,
        registry: &registry,
        devservers: &devservers,
        coordinator: &coordinator,
    };

    let outcome = AssertUnwindSafe(ctx.execute()).catch_unwind().await;
    coordinator.shutdown().await;

    let results = match outcome {
        Ok(results) => results?,
        Err(panic) => {
            let _ = events.close();
            std::panic::resume_unwind(panic);
        }
    };

    store.write_json(artifacts::RAW_RESULTS, &results)?;
    let evaluation = evaluate(&run_id, &results, &inputs.cases, &store)?;
    events.close()?;

    print_evaluation(&evaluation, format);
    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        print_warning(&format!("{} of {} tasks failed", failed, results.len()));
    }
    print_success(&format!("Run complete, artifacts in {}", store.dir().display()));
    Ok(())
}

struct RunContext<'a> {
    run_id: &'a str,
    config: &'a RunConfig,
    agent_names: &'a [String],
    inputs: &'a Inputs,
    registry: &'a Arc<AgentRegistry>,
    devservers: &'a Arc<DevServerManager>,
    coordinator: &'a Arc<ShutdownCoordinator>,
}

impl RunContext<'_> {
    async fn execute(&self) -> Result<Vec<CaseExecutionResult>> {
        self.registry.initialize(self.agent_names).await?;
        {
            let registry = self.registry.clone();
            let names = self.agent_names.to_vec();
            self.coordinator.register("agents", move || async move {
                registry.cleanup(&names).await;
            });
        }

        let base_dir = scenes_base_dir(&self.config.scenes_path);
        let prepared = prepare_scenes(
            &self.inputs.scenes,
            &self.inputs.cases,
            self.devservers,
            &base_dir,
        )
        .await;
        for failure in &prepared.failures {
            print_warning(&format!(
                "Scene {} unavailable ({}): {}",
                failure.scene_id, failure.category, failure.error
            ));
        }

        let agents = self.registry.resolve(self.agent_names)?;
        let tasks = build_run_tasks(
            &self.inputs.cases,
            &agents,
            &prepared,
            self.registry,
            self.run_id,
            Duration::from_millis(self.config.timeout_ms),
        );
        info!(run_id = %self.run_id, tasks = tasks.len(), "Scheduling tasks");

        let scheduler =
            Scheduler::new(self.config.concurrency).with_cancel(self.coordinator.token());
        let mut results = scheduler.run(tasks).await;
        if self.coordinator.has_run() {
            warn!("Run interrupted, remaining tasks were not executed");
        }

        results.extend(unavailable_results(
            &self.inputs.cases,
            self.agent_names,
            &prepared,
        ));
        results.sort_by(|a, b| {
            a.case_id
                .cmp(&b.case_id)
                .then_with(|| a.agent_name.cmp(&b.agent_name))
        });
        Ok(results)
    }
}

/// Relative project paths in the scenes file resolve against its directory
fn scenes_base_dir(scenes_path: &Path) -> PathBuf {
    scenes_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
