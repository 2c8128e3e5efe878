//! Run directory layout and JSON artifacts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use uibench_common::RunConfig;

pub const ENV: &str = "env.json";
pub const RUN_CONFIG: &str = "run-config.json";
pub const RAW_RESULTS: &str = "raw-results.json";
pub const SCORE: &str = "score.json";
pub const METRICS: &str = "metrics.json";
pub const COMPARISON: &str = "comparison.json";
pub const EVENTS: &str = "events.ndjson";

/// `<output>/<run_id>/`
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    pub fn create(output_dir: &Path, run_id: &str) -> Result<Self> {
        let dir = output_dir.join(run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing run directory
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("Run directory not found: {}", dir.display());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path(name);
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Wrote artifact");
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

/// Where and how a run executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvInfo {
    pub platform: String,
    pub arch: String,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub git_commit: Option<String>,
    pub uibench_version: String,
}

impl EnvInfo {
    pub fn capture() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            timestamp: Utc::now(),
            git_commit: git_commit(),
            uibench_version: uibench_common::VERSION.to_string(),
        }
    }
}

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

/// The effective configuration of a run, as written to `run-config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub agents: Vec<String>,
    pub case_count: usize,
    pub filter_cases: Vec<String>,
    pub config: RunConfig,
}
