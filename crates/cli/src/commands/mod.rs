//! CLI Commands

pub mod agents;
pub mod eval;
pub mod run;

use uibench_engine::builtins::register_builtin_agents;
use uibench_engine::AgentRegistry;

/// A registry holding every agent this binary ships with
pub fn default_registry() -> anyhow::Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    register_builtin_agents(&mut registry)?;
    Ok(registry)
}
