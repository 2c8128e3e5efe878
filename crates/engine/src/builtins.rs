//! Built-in agents for smoke runs and pipeline checks

use crate::agent::{AgentAdapter, AgentContext, LifecycleHooks};
use crate::registry::AgentRegistry;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uibench_common::{AgentMeta, AgentResult, DefectType, DetectedDefect, RawOutput, Result};

const DUMMY_DELAY: Duration = Duration::from_millis(10);

/// Keyword heuristic over the prompt text
pub struct DummyAgent {
    meta: AgentMeta,
}

impl Default for DummyAgent {
    fn default() -> Self {
        Self {
            meta: AgentMeta::new("dummy", "1.0.0")
                .with_description("Flags a defect when the prompt mentions one")
                .with_defect_types(vec![DefectType::Display, DefectType::Interaction]),
        }
    }
}

fn mentions_defect(prompt: &str) -> bool {
    prompt.to_lowercase().contains("defect") || prompt.contains("缺陷")
}

#[async_trait]
impl AgentAdapter for DummyAgent {
    fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    fn hooks(&self) -> LifecycleHooks {
        LifecycleHooks::NONE
    }

    async fn run_case(&self, ctx: AgentContext) -> anyhow::Result<AgentResult> {
        tokio::select! {
            _ = tokio::time::sleep(DUMMY_DELAY) => {}
            _ = ctx.cancelled() => anyhow::bail!("cancelled"),
        }

        let has_defect = mentions_defect(&ctx.prompt);
        let defects = if has_defect {
            vec![DetectedDefect {
                defect_type: Some(DefectType::Display),
                description: "Keyword match in prompt".to_string(),
                severity: None,
                evidence: None,
            }]
        } else {
            Vec::new()
        };

        Ok(AgentResult {
            has_defect,
            defects,
            confidence: Some(if has_defect { 0.8 } else { 0.9 }),
            raw_output: RawOutput::json(json!({
                "agent": "dummy",
                "url": ctx.access_url,
                "caseId": ctx.meta.case_id,
            })),
            errors: Vec::new(),
        })
    }
}

/// Never reports a defect
pub struct NoopAgent {
    meta: AgentMeta,
}

impl Default for NoopAgent {
    fn default() -> Self {
        Self {
            meta: AgentMeta::new("noop", "1.0.0")
                .with_description("Never reports a defect"),
        }
    }
}

#[async_trait]
impl AgentAdapter for NoopAgent {
    fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    fn hooks(&self) -> LifecycleHooks {
        LifecycleHooks::NONE
    }

    async fn run_case(&self, _ctx: AgentContext) -> anyhow::Result<AgentResult> {
        Ok(AgentResult {
            has_defect: false,
            confidence: Some(1.0),
            ..Default::default()
        })
    }
}

/// Always reports one defect
pub struct AlwaysDefectAgent {
    meta: AgentMeta,
}

impl Default for AlwaysDefectAgent {
    fn default() -> Self {
        Self {
            meta: AgentMeta::new("always-defect", "1.0.0")
                .with_description("Always reports a defect")
                .with_defect_types(vec![DefectType::Other]),
        }
    }
}

#[async_trait]
impl AgentAdapter for AlwaysDefectAgent {
    fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    fn hooks(&self) -> LifecycleHooks {
        LifecycleHooks::NONE
    }

    async fn run_case(&self, _ctx: AgentContext) -> anyhow::Result<AgentResult> {
        Ok(AgentResult {
            has_defect: true,
            defects: vec![DetectedDefect {
                defect_type: Some(DefectType::Other),
                description: "Always reports a defect".to_string(),
                severity: None,
                evidence: None,
            }],
            confidence: Some(1.0),
            raw_output: RawOutput::none(),
            errors: Vec::new(),
        })
    }
}

pub fn register_builtin_agents(registry: &mut AgentRegistry) -> Result<()> {
    registry.register(Arc::new(DummyAgent::default()))?;
    registry.register(Arc::new(NoopAgent::default()))?;
    registry.register(Arc::new(AlwaysDefectAgent::default()))?;
    Ok(())
}
