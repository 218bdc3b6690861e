//! Unified error types for the dnpm workspace.
//!
//! Hard structural failures (unresolvable ids, cycles, unreachable store)
//! travel through [`DnpmError`]. Version conflicts are never errors: they
//! are reported as data inside the compatibility report.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DnpmError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A caller supplied a malformed or missing request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A content-store or registry call exceeded the configured bound.
    #[error("timed out after {}ms fetching {resource}", timeout.as_millis())]
    FetchTimeout {
        /// What was being fetched.
        resource: String,
        /// Timeout in force when the call was made.
        timeout: Duration,
    },

    /// A package transitively depends on itself.
    #[error("cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency {
        /// Package ids along the offending chain, first id repeated last.
        chain: Vec<String>,
    },

    /// An on-disk compose specification could not be parsed.
    #[error("malformed compose file {path}: {message}")]
    ComposeParse {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The content store or registry answered with an unusable response.
    #[error("content store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// The container runtime failed to act on a package.
    #[error("container runtime error for {package}: {message}")]
    Runtime {
        /// Package the runtime was acting on.
        package: String,
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DnpmError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DnpmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_dependency_renders_chain() {
        let err = DnpmError::CyclicDependency {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn fetch_timeout_renders_millis() {
        let err = DnpmError::FetchTimeout {
            resource: "/ipfs/Qm".into(),
            timeout: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1500ms"), "got: {err}");
    }
}
