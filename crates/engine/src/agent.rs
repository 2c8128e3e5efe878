//! The agent contract
//!
//! Every agent under test implements [`AgentAdapter`]. The engine hands it an
//! [`AgentContext`] per task and expects an [`AgentResult`] back; anything the
//! agent returns as an error (or a panic) becomes a failed result, never a
//! failed run.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uibench_common::{AgentMeta, AgentResult, GroundTruth};

/// Task metadata passed to the agent
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    pub case_id: String,
    pub scene_id: String,
    pub run_id: String,
    pub tags: Vec<String>,
    pub timeout_ms: u64,
}

/// Everything an agent sees for one task
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Fully qualified URL of the page under test
    pub access_url: String,
    pub prompt: String,
    /// Exposed for debugging only; agents must not read it to decide
    pub ground_truth: Option<GroundTruth>,
    pub meta: TaskMeta,
    /// Fires when the task times out or the run shuts down
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl AgentContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Time left before the task deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Which optional lifecycle hooks an adapter implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleHooks {
    pub initialize: bool,
    pub cleanup: bool,
}

impl LifecycleHooks {
    pub const NONE: Self = Self {
        initialize: false,
        cleanup: false,
    };

    pub const BOTH: Self = Self {
        initialize: true,
        cleanup: true,
    };
}

#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn meta(&self) -> &AgentMeta;

    /// Hooks the registry should call around a run. Both by default; the
    /// default hook bodies are no-ops. Return [`LifecycleHooks::NONE`] to opt out.
    fn hooks(&self) -> LifecycleHooks {
        LifecycleHooks::BOTH
    }

    /// Called once per run before any task
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_case(&self, ctx: AgentContext) -> anyhow::Result<AgentResult>;

    /// Called once per run after all tasks
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.meta().name
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn context(prompt: &str, timeout: Duration) -> AgentContext {
        AgentContext {
            access_url: "http://localhost:4000/".to_string(),
            prompt: prompt.to_string(),
            ground_truth: None,
            meta: TaskMeta {
                case_id: "c1".to_string(),
                scene_id: "s1".to_string(),
                run_id: "run".to_string(),
                tags: Vec::new(),
                timeout_ms: timeout.as_millis() as u64,
            },
            cancel: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }
}
