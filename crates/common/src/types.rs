//! Core types for UIBench
//!
//! Input records (`Scene`, `TestCase`) keep the snake_case field names of the
//! data files. Output records (`CaseExecutionResult`, `ScoreResult`,
//! `AgentMetrics`, ...) serialize with camelCase names, which is the stable
//! JSON shape consumed by report writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================================================
// Scenes
// ============================================================================

/// Where a scene's UI is served from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SceneSource {
    /// An already running address
    #[serde(rename = "baseUrl")]
    BaseUrl {
        #[serde(rename = "baseUrl")]
        base_url: String,
    },

    /// A local project that must be served for the duration of the run
    #[serde(rename = "localProject", rename_all = "camelCase")]
    LocalProject {
        project_path: PathBuf,
        #[serde(default = "default_dev_command")]
        dev_command: String,
        #[serde(default = "default_install_command")]
        install_command: Option<String>,
        #[serde(default = "default_ready_timeout_ms")]
        ready_timeout: u64,
        #[serde(default)]
        ready_poll_interval: Option<u64>,
    },
}

fn default_dev_command() -> String {
    "npm run dev".to_string()
}

fn default_install_command() -> Option<String> {
    Some("npm install".to_string())
}

fn default_ready_timeout_ms() -> u64 {
    60_000
}

impl SceneSource {
    pub fn is_local_project(&self) -> bool {
        matches!(self, SceneSource::LocalProject { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A UI target under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SceneSource,
    pub routes: Vec<Route>,
}

// ============================================================================
// Test cases
// ============================================================================

/// Defect severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectLevel {
    Low,
    Medium,
    High,
}

/// The authoritative label for a test case
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    pub has_defect: bool,
    #[serde(default)]
    pub defect_details: Vec<String>,
    #[serde(default)]
    pub defect_level: Option<DefectLevel>,
}

/// One (scene, instruction, ground truth) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub case_id: String,
    pub ui_scene_id: String,
    #[serde(default = "default_route_path")]
    pub route_path: String,
    #[serde(default)]
    pub case_type: String,
    #[serde(default)]
    pub case_category: String,
    pub prompt: String,
    pub ground_truth: GroundTruth,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_route_path() -> String {
    "/".to_string()
}

// ============================================================================
// Agents
// ============================================================================

/// Kind of defect an agent reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectType {
    Display,
    Interaction,
    Other,
}

/// Static identity of an agent implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub supported_defect_types: Vec<DefectType>,
    /// Per-agent task timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl AgentMeta {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            supported_defect_types: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_defect_types(mut self, types: Vec<DefectType>) -> Self {
        self.supported_defect_types = types;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A single defect reported by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedDefect {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub defect_type: Option<DefectType>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Opaque agent output, kept verbatim for audit and never inspected by the core
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawOutput(serde_json::Value);

impl RawOutput {
    pub fn none() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self(serde_json::Value::String(text.into()))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_null()
    }
}

/// One error captured while running a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// An agent's normalized verdict
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub has_defect: bool,
    #[serde(default)]
    pub defects: Vec<DetectedDefect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub raw_output: RawOutput,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl AgentResult {
    /// Result recorded when the task itself failed
    pub fn failed(error: ErrorRecord) -> Self {
        Self {
            has_defect: false,
            defects: Vec::new(),
            confidence: None,
            raw_output: RawOutput::none(),
            errors: vec![error],
        }
    }
}

/// Outcome of running one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseExecutionResult {
    pub case_id: String,
    pub scene_id: String,
    pub agent_name: String,
    pub result: AgentResult,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// False when the task failed (timeout, error, panic), independent of the verdict
    pub success: bool,
}

impl CaseExecutionResult {
    /// A failed result that never ran (for example, its scene could not be served)
    pub fn not_run(case_id: &str, scene_id: &str, agent_name: &str, error: ErrorRecord) -> Self {
        let now = Utc::now();
        Self {
            case_id: case_id.to_string(),
            scene_id: scene_id.to_string(),
            agent_name: agent_name.to_string(),
            result: AgentResult::failed(error),
            duration_ms: 0,
            started_at: now,
            finished_at: now,
            success: false,
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Classification label for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScoreLabel {
    #[serde(rename = "TP")]
    Tp,
    #[serde(rename = "FP")]
    Fp,
    #[serde(rename = "FN")]
    Fn,
    #[serde(rename = "TN")]
    Tn,
    #[serde(rename = "ERROR")]
    Error,
}

impl ScoreLabel {
    pub const ALL: [ScoreLabel; 5] = [
        ScoreLabel::Tp,
        ScoreLabel::Fp,
        ScoreLabel::Fn,
        ScoreLabel::Tn,
        ScoreLabel::Error,
    ];
}

impl std::fmt::Display for ScoreLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreLabel::Tp => write!(f, "TP"),
            ScoreLabel::Fp => write!(f, "FP"),
            ScoreLabel::Fn => write!(f, "FN"),
            ScoreLabel::Tn => write!(f, "TN"),
            ScoreLabel::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub case_id: String,
    pub scene_id: String,
    pub agent_name: String,
    pub ground_truth_has_defect: bool,
    pub predicted_has_defect: bool,
    pub label: ScoreLabel,
    pub execution_success: bool,
}

/// Per-label counts, serialized as `{"TP": n, "FP": n, ...}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelCounts {
    #[serde(rename = "TP")]
    pub tp: usize,
    #[serde(rename = "FP")]
    pub fp: usize,
    #[serde(rename = "FN")]
    pub fn_: usize,
    #[serde(rename = "TN")]
    pub tn: usize,
    #[serde(rename = "ERROR")]
    pub error: usize,
}

impl LabelCounts {
    pub fn record(&mut self, label: ScoreLabel) {
        match label {
            ScoreLabel::Tp => self.tp += 1,
            ScoreLabel::Fp => self.fp += 1,
            ScoreLabel::Fn => self.fn_ += 1,
            ScoreLabel::Tn => self.tn += 1,
            ScoreLabel::Error => self.error += 1,
        }
    }

    pub fn get(&self, label: ScoreLabel) -> usize {
        match label {
            ScoreLabel::Tp => self.tp,
            ScoreLabel::Fp => self.fp,
            ScoreLabel::Fn => self.fn_,
            ScoreLabel::Tn => self.tn,
            ScoreLabel::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn + self.error
    }
}

/// Aggregate metrics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent_name: String,
    pub total: usize,
    pub counts: LabelCounts,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub miss_rate: f64,
    pub accuracy: f64,
    pub error_rate: f64,
}

/// Metrics for every agent in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub run_id: String,
    pub total_cases: usize,
    pub total_agents: usize,
    pub by_agent: Vec<AgentMetrics>,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Dev servers
// ============================================================================

/// Dev server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevServerStatus {
    Starting,
    Ready,
    Stopped,
    Error,
}

impl Default for DevServerStatus {
    fn default() -> Self {
        Self::Starting
    }
}

impl DevServerStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: DevServerStatus) -> bool {
        matches!(
            (self, next),
            (DevServerStatus::Starting, DevServerStatus::Ready)
                | (DevServerStatus::Starting, DevServerStatus::Error)
                | (DevServerStatus::Ready, DevServerStatus::Stopped)
        )
    }
}

impl std::fmt::Display for DevServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevServerStatus::Starting => write!(f, "starting"),
            DevServerStatus::Ready => write!(f, "ready"),
            DevServerStatus::Stopped => write!(f, "stopped"),
            DevServerStatus::Error => write!(f, "error"),
        }
    }
}

/// Public view of a dev server tracked by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerInstance {
    pub scene_id: String,
    pub project_path: PathBuf,
    pub port: u16,
    pub url: String,
    pub status: DevServerStatus,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cases grouped by scene id, in scene id order
pub type CasesByScene<'a> = BTreeMap<&'a str, Vec<&'a TestCase>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_source_defaults() {
        let json = r#"{
            "scene_id": "login",
            "name": "Login",
            "source": { "type": "localProject", "projectPath": "./demo-app" },
            "routes": [{ "path": "/login" }]
        }"#;
        let scene: Scene = serde_json::from_str(json).unwrap();
        match scene.source {
            SceneSource::LocalProject {
                dev_command,
                install_command,
                ready_timeout,
                ready_poll_interval,
                ..
            } => {
                assert_eq!(dev_command, "npm run dev");
                assert_eq!(install_command.as_deref(), Some("npm install"));
                assert_eq!(ready_timeout, 60_000);
                assert_eq!(ready_poll_interval, None);
            }
            _ => panic!("Expected localProject source"),
        }
    }

    #[test]
    fn test_base_url_source() {
        let json = r#"{ "type": "baseUrl", "baseUrl": "http://localhost:5173" }"#;
        let source: SceneSource = serde_json::from_str(json).unwrap();
        assert_eq!(
            source,
            SceneSource::BaseUrl {
                base_url: "http://localhost:5173".to_string()
            }
        );
    }

    #[test]
    fn test_case_defaults() {
        let json = r#"{
            "case_id": "c1",
            "ui_scene_id": "login",
            "prompt": "Check the button",
            "ground_truth": { "has_defect": true }
        }"#;
        let case: TestCase = serde_json::from_str(json).unwrap();
        assert_eq!(case.route_path, "/");
        assert!(case.ground_truth.defect_details.is_empty());
        assert_eq!(case.ground_truth.defect_level, None);
    }

    #[test]
    fn test_score_result_json_shape() {
        let score = ScoreResult {
            case_id: "c1".into(),
            scene_id: "s1".into(),
            agent_name: "dummy".into(),
            ground_truth_has_defect: true,
            predicted_has_defect: false,
            label: ScoreLabel::Fn,
            execution_success: true,
        };
        let value = serde_json::to_value(&score).unwrap();
        assert_eq!(value["caseId"], "c1");
        assert_eq!(value["groundTruthHasDefect"], true);
        assert_eq!(value["label"], "FN");
    }

    #[test]
    fn test_label_counts_json_shape() {
        let mut counts = LabelCounts::default();
        counts.record(ScoreLabel::Tp);
        counts.record(ScoreLabel::Error);
        let value = serde_json::to_value(counts).unwrap();
        assert_eq!(value["TP"], 1);
        assert_eq!(value["ERROR"], 1);
        assert_eq!(value["FN"], 0);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_raw_output_is_preserved_verbatim() {
        let raw = serde_json::json!({ "steps": [1, 2, 3], "nested": { "k": "v" } });
        let result = AgentResult {
            raw_output: RawOutput::json(raw.clone()),
            ..Default::default()
        };
        let text = serde_json::to_string(&result).unwrap();
        let back: AgentResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.raw_output.as_value(), &raw);
    }

    #[test]
    fn test_dev_server_transitions() {
        use DevServerStatus::*;
        assert!(Starting.can_transition_to(Ready));
        assert!(Starting.can_transition_to(Error));
        assert!(Ready.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Starting));
        assert!(!Starting.can_transition_to(Stopped));
    }
}
