//! Agent registry
//!
//! The only place agents are looked up by name. Lifecycle hooks are read once
//! at registration; runtime configuration (enabled flag, timeout override)
//! is layered on top with `apply_configs`.

use crate::agent::{AgentAdapter, LifecycleHooks};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uibench_common::{AgentConfig, AgentMeta, Error, Result};

struct RegisteredAgent {
    adapter: Arc<dyn AgentAdapter>,
    hooks: LifecycleHooks,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, RegisteredAgent>,
    configs: BTreeMap<String, AgentConfig>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its `meta().name`. Fails on duplicates.
    pub fn register(&mut self, adapter: Arc<dyn AgentAdapter>) -> Result<()> {
        let name = adapter.meta().name.clone();
        if self.agents.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "agent".to_string(),
                id: name,
            });
        }

        let hooks = adapter.hooks();
        debug!(agent = %name, version = %adapter.meta().version, ?hooks, "Registered agent");
        self.agents.insert(name, RegisteredAgent { adapter, hooks });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.agents.get(name).map(|a| a.adapter.clone())
    }

    /// Like `get`, but an unknown name is an error listing what is available
    pub fn get_required(&self, name: &str) -> Result<Arc<dyn AgentAdapter>> {
        self.get(name).ok_or_else(|| Error::UnknownAgent {
            name: name.to_string(),
            available: self.list_names().join(", "),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn list_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn list_meta(&self) -> Vec<AgentMeta> {
        self.agents
            .values()
            .map(|a| a.adapter.meta().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Record runtime overrides. Configs for unregistered agents are skipped.
    pub fn apply_configs(&mut self, configs: &[AgentConfig]) {
        for config in configs {
            if !self.has(&config.name) {
                warn!(agent = %config.name, "Config for unregistered agent ignored");
                continue;
            }
            self.configs.insert(config.name.clone(), config.clone());
        }
    }

    pub fn config(&self, name: &str) -> Option<&AgentConfig> {
        self.configs.get(name)
    }

    /// Config override, else the agent's own timeout, else `default`
    pub fn effective_timeout(&self, name: &str, default: Duration) -> Duration {
        if let Some(ms) = self.configs.get(name).and_then(|c| c.timeout_ms) {
            return Duration::from_millis(ms);
        }
        self.agents
            .get(name)
            .and_then(|a| a.adapter.meta().timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// Unconfigured agents count as enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.has(name) && self.configs.get(name).map_or(true, |c| c.enabled)
    }

    pub fn list_enabled_names(&self) -> Vec<String> {
        self.agents
            .keys()
            .filter(|name| self.is_enabled(name))
            .cloned()
            .collect()
    }

    /// Resolve a list of names, failing on the first unknown one
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn AgentAdapter>>> {
        names.iter().map(|n| self.get_required(n)).collect()
    }

    /// Run the `initialize` hook of each named agent that declares one.
    /// The first failure aborts.
    pub async fn initialize(&self, names: &[String]) -> Result<()> {
        for name in names {
            let agent = self.agents.get(name).ok_or_else(|| Error::UnknownAgent {
                name: name.clone(),
                available: self.list_names().join(", "),
            })?;
            if !agent.hooks.initialize {
                continue;
            }

            info!(agent = %name, "Initializing agent");
            agent
                .adapter
                .initialize()
                .await
                .map_err(|e| Error::AgentInit {
                    name: name.clone(),
                    reason: format!("{:#}", e),
                })?;
        }
        Ok(())
    }

    /// Run the `cleanup` hook of each named agent that declares one.
    /// Failures are logged and do not stop the remaining hooks.
    pub async fn cleanup(&self, names: &[String]) {
        for name in names {
            let Some(agent) = self.agents.get(name) else {
                continue;
            };
            if !agent.hooks.cleanup {
                continue;
            }

            debug!(agent = %name, "Cleaning up agent");
            if let Err(e) = agent.adapter.cleanup().await {
                warn!(agent = %name, "Agent cleanup failed: {:#}", e);
            }
        }
    }
}
