//! UIBench Engine
//!
//! Execution and orchestration for agent benchmark runs:
//! - Port allocation and reclamation
//! - Dev server lifecycle for locally served scenes
//! - Agent contract, registry, and built-in agents
//! - Bounded-concurrency scheduling with per-task timeouts
//! - Scoring, metrics, and multi-agent comparison
//! - Run-wide shutdown coordination

pub mod agent;
pub mod builtins;
pub mod compare;
pub mod devserver;
pub mod metrics;
pub mod plan;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod scoring;
pub mod shutdown;

pub use agent::{AgentAdapter, AgentContext, LifecycleHooks, TaskMeta};
pub use compare::ComparisonReport;
pub use devserver::{DevServerConfig, DevServerManager, DevServerSettings};
pub use ports::{AllocateOptions, PortAllocator};
pub use registry::AgentRegistry;
pub use scheduler::{RunTask, Scheduler};
pub use shutdown::ShutdownCoordinator;
