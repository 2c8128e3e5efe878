//! UIBench Common Library
//!
//! Shared types, errors, configuration, and data loading for the UIBench
//! agent benchmark.

pub mod config;
pub mod data;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{AgentConfig, PortRange, RunConfig};
pub use error::{Error, ErrorCategory, Result};
pub use types::*;

/// UIBench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generate a run id of the form `2025-12-29T21-30-45_a1b2c3`
pub fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    let suffix: [u8; 3] = rand::random();
    format!("{}_{}", now.format("%Y-%m-%dT%H-%M-%S"), hex::encode(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        let (stamp, suffix) = id.split_once('_').unwrap();
        assert_eq!(stamp.len(), 19);
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!stamp.contains(':'));
    }

    #[test]
    fn test_run_ids_differ() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
