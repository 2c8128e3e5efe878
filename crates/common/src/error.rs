//! Error types for UIBench

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using UIBench Error
pub type Result<T> = std::result::Result<T, Error>;

/// UIBench error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load {kind} from {}: {reason}", .path.display())]
    DataLoad {
        kind: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Test cases reference unknown scenes ({total} errors): {}", .errors.join("; "))]
    UnknownSceneRefs { errors: Vec<String>, total: usize },

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Agent \"{name}\" not found. Available: {available}")]
    UnknownAgent { name: String, available: String },

    #[error("Agent \"{name}\" failed to initialize: {reason}")]
    AgentInit { name: String, reason: String },

    #[error("No free port in range {min}-{max}")]
    PortUnavailable { min: u16, max: u16 },

    #[error("Port {port} is occupied and could not be reclaimed")]
    PortBusy { port: u16 },

    #[error("Project path does not exist: {}", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("No {manifest} found in: {}", .path.display())]
    ManifestMissing { manifest: String, path: PathBuf },

    #[error("Install failed in {}: {reason}", .path.display())]
    InstallFailed { path: PathBuf, reason: String },

    #[error("Failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Dev server did not become ready within {timeout_ms}ms: {url}")]
    ReadinessTimeout { url: String, timeout_ms: u64 },

    #[error("Dev server for scene {scene_id} exited before becoming ready: {status}")]
    ExitedEarly { scene_id: String, status: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Agent \"{agent}\" timed out for case \"{case_id}\" after {millis}ms")]
    Timeout {
        agent: String,
        case_id: String,
        millis: u64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse failure classes used to decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad scene/case/run definitions. Fatal before any task runs.
    Configuration,
    /// Port or dev server failures. Fatal to the owning scene only.
    Resource,
    /// An agent threw or timed out. Recorded as data, never propagated.
    TaskExecution,
    /// Unknown or duplicate agent. Fatal at startup.
    Registry,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::TaskExecution => write!(f, "task-execution"),
            ErrorCategory::Registry => write!(f, "registry"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_)
            | Error::Serialization(_)
            | Error::ConfigParse(_)
            | Error::InvalidConfig(_)
            | Error::DataLoad { .. }
            | Error::UnknownSceneRefs { .. } => ErrorCategory::Configuration,
            Error::NotFound { .. }
            | Error::AlreadyExists { .. }
            | Error::UnknownAgent { .. }
            | Error::AgentInit { .. } => ErrorCategory::Registry,
            Error::PortUnavailable { .. }
            | Error::PortBusy { .. }
            | Error::ProjectNotFound(_)
            | Error::ManifestMissing { .. }
            | Error::InstallFailed { .. }
            | Error::SpawnFailed { .. }
            | Error::ReadinessTimeout { .. }
            | Error::ExitedEarly { .. }
            | Error::InvalidStateTransition { .. }
            | Error::Internal(_) => ErrorCategory::Resource,
            Error::Timeout { .. } => ErrorCategory::TaskExecution,
        }
    }

    pub fn data_load(kind: &str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::DataLoad {
            kind: kind.to_string(),
            path: path.into(),
            reason: reason.into(),
        }
    }
}
