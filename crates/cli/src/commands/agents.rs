//! Agent listing

use anyhow::Result;
use uibench_common::AgentMeta;
use uibench_engine::AgentRegistry;

use crate::output::{print_list, OutputFormat};

pub fn print_agents(registry: &AgentRegistry, format: OutputFormat) {
    let agents: Vec<AgentMeta> = registry.list_meta();
    print_list(&agents, format);
}

pub fn execute(format: OutputFormat) -> Result<()> {
    let registry = super::default_registry()?;
    print_agents(&registry, format);
    Ok(())
}
