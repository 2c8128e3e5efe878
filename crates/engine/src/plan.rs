//! Turning scenes and cases into runnable tasks

use crate::agent::AgentAdapter;
use crate::devserver::{DevServerConfig, DevServerManager};
use crate::ports::AllocateOptions;
use crate::registry::AgentRegistry;
use crate::scheduler::RunTask;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uibench_common::data::{combine_url, find_scene, group_cases_by_scene};
use uibench_common::{
    CaseExecutionResult, Error, ErrorCategory, ErrorRecord, Result, Scene, SceneSource, TestCase,
};

/// A scene that could not be served
#[derive(Debug, Clone)]
pub struct SceneFailure {
    pub scene_id: String,
    pub error: String,
    pub category: ErrorCategory,
}

#[derive(Debug, Default)]
pub struct PreparedScenes {
    /// Base URL per ready scene
    pub urls: BTreeMap<String, String>,
    pub failures: Vec<SceneFailure>,
}

impl PreparedScenes {
    pub fn failure(&self, scene_id: &str) -> Option<&SceneFailure> {
        self.failures.iter().find(|f| f.scene_id == scene_id)
    }
}

/// Resolve a base URL for every scene the cases reference.
///
/// `localProject` scenes are served concurrently. A scene that fails is
/// recorded and does not affect the others.
pub async fn prepare_scenes(
    scenes: &[Scene],
    cases: &[TestCase],
    devservers: &DevServerManager,
    base_dir: &Path,
) -> PreparedScenes {
    let grouped = group_cases_by_scene(cases);

    let jobs = grouped.keys().map(|scene_id| async move {
        let outcome = match find_scene(scenes, scene_id) {
            Some(scene) => prepare_scene(scene, devservers, base_dir).await,
            None => Err(Error::NotFound {
                kind: "scene".to_string(),
                id: scene_id.to_string(),
            }),
        };
        (scene_id.to_string(), outcome)
    });

    let mut prepared = PreparedScenes::default();
    for (scene_id, outcome) in futures::future::join_all(jobs).await {
        match outcome {
            Ok(url) => {
                prepared.urls.insert(scene_id, url);
            }
            Err(e) => {
                error!(scene_id = %scene_id, category = %e.category(), "Scene unavailable: {}", e);
                prepared.failures.push(SceneFailure {
                    scene_id,
                    error: e.to_string(),
                    category: e.category(),
                });
            }
        }
    }

    info!(
        ready = prepared.urls.len(),
        failed = prepared.failures.len(),
        "Scenes prepared"
    );
    prepared
}

async fn prepare_scene(scene: &Scene, devservers: &DevServerManager, base_dir: &Path) -> Result<String> {
    if let SceneSource::BaseUrl { base_url } = &scene.source {
        return Ok(base_url.clone());
    }

    let ports = devservers.ports();
    let port = ports
        .allocate_for_scene(&scene.scene_id, &AllocateOptions::default())
        .await?;

    let config = DevServerConfig::from_source(&scene.source, port, base_dir)
        .ok_or_else(|| Error::Internal(format!("scene {} has no local project", scene.scene_id)))?;

    match devservers.start(&scene.scene_id, &config).await {
        Ok(instance) => Ok(instance.url),
        Err(e) => {
            ports.release_for_scene(&scene.scene_id);
            Err(e)
        }
    }
}

/// One task per (case, agent) whose scene is ready
pub fn build_run_tasks(
    cases: &[TestCase],
    agents: &[Arc<dyn AgentAdapter>],
    prepared: &PreparedScenes,
    registry: &AgentRegistry,
    run_id: &str,
    default_timeout: Duration,
) -> Vec<RunTask> {
    let mut tasks = Vec::with_capacity(cases.len() * agents.len());
    for case in cases {
        let Some(base) = prepared.urls.get(&case.ui_scene_id) else {
            continue;
        };
        let access_url = combine_url(base, &case.route_path);
        let test_case = Arc::new(case.clone());

        for agent in agents {
            tasks.push(RunTask {
                test_case: test_case.clone(),
                agent: agent.clone(),
                access_url: access_url.clone(),
                run_id: run_id.to_string(),
                timeout: registry.effective_timeout(agent.name(), default_timeout),
            });
        }
    }
    tasks
}

/// Failed results for every (case, agent) whose scene could not be served
pub fn unavailable_results(
    cases: &[TestCase],
    agent_names: &[String],
    prepared: &PreparedScenes,
) -> Vec<CaseExecutionResult> {
    let mut results = Vec::new();
    for case in cases {
        let Some(failure) = prepared.failure(&case.ui_scene_id) else {
            continue;
        };
        let message = format!("Scene \"{}\" unavailable: {}", failure.scene_id, failure.error);
        for agent in agent_names {
            results.push(CaseExecutionResult::not_run(
                &case.case_id,
                &case.ui_scene_id,
                agent,
                ErrorRecord::new(message.clone()),
            ));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::register_builtin_agents;
    use crate::ports::PortAllocator;
    use tempfile::TempDir;
    use uibench_common::{GroundTruth, PortRange, Route};

    fn scene(id: &str, source: SceneSource) -> Scene {
        Scene {
            scene_id: id.to_string(),
            name: id.to_string(),
            description: None,
            source,
            routes: vec![Route {
                path: "/".to_string(),
                name: None,
            }],
        }
    }

    fn case(id: &str, scene_id: &str, route: &str) -> TestCase {
        TestCase {
            case_id: id.to_string(),
            ui_scene_id: scene_id.to_string(),
            route_path: route.to_string(),
            case_type: String::new(),
            case_category: String::new(),
            prompt: "p".to_string(),
            ground_truth: GroundTruth::default(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_prepare_mixed_scenes() {
        let tmp = TempDir::new().unwrap();
        let ports = Arc::new(PortAllocator::new(PortRange::new(44000, 44100)));
        let devservers = DevServerManager::new(ports.clone()).unwrap();

        let scenes = vec![
            scene(
                "remote",
                SceneSource::BaseUrl {
                    base_url: "http://localhost:5173/".to_string(),
                },
            ),
            scene(
                "local",
                SceneSource::LocalProject {
                    project_path: "missing-app".into(),
                    dev_command: "npm run dev".to_string(),
                    install_command: None,
                    ready_timeout: 1000,
                    ready_poll_interval: None,
                },
            ),
            scene(
                "unused",
                SceneSource::BaseUrl {
                    base_url: "http://unused".to_string(),
                },
            ),
        ];
        let cases = vec![
            case("c1", "remote", "/login"),
            case("c2", "local", "/"),
            case("c3", "ghost", "/"),
        ];

        let prepared = prepare_scenes(&scenes, &cases, &devservers, tmp.path()).await;
        assert_eq!(prepared.urls.len(), 1);
        assert_eq!(prepared.urls["remote"], "http://localhost:5173/");
        assert!(!prepared.urls.contains_key("unused"));

        let local = prepared.failure("local").unwrap();
        assert_eq!(local.category, ErrorCategory::Resource);
        assert!(prepared.failure("ghost").is_some());
        assert_eq!(ports.scene_port("local"), None);
        assert!(ports.allocated_ports().is_empty());
    }

    #[test]
    fn test_build_tasks_and_unavailable() {
        let mut registry = AgentRegistry::new();
        register_builtin_agents(&mut registry).unwrap();
        let names = vec!["dummy".to_string(), "noop".to_string()];
        let agents = registry.resolve(&names).unwrap();

        let mut prepared = PreparedScenes::default();
        prepared
            .urls
            .insert("remote".to_string(), "http://localhost:5173/".to_string());
        prepared.failures.push(SceneFailure {
            scene_id: "local".to_string(),
            error: "boom".to_string(),
            category: ErrorCategory::Resource,
        });

        let cases = vec![case("c1", "remote", "/login"), case("c2", "local", "/")];
        let tasks = build_run_tasks(
            &cases,
            &agents,
            &prepared,
            &registry,
            "run-1",
            Duration::from_secs(30),
        );
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.access_url == "http://localhost:5173/login"));
        assert!(tasks.iter().all(|t| t.timeout == Duration::from_secs(30)));

        let failed = unavailable_results(&cases, &names, &prepared);
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| !r.success && r.case_id == "c2"));
        assert_eq!(
            failed[0].result.errors[0].message,
            "Scene \"local\" unavailable: boom"
        );
    }
}
