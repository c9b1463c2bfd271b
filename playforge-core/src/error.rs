//! Build Error Taxonomy
//!
//! Every fatal pipeline condition maps to one variant. The upstream caller
//! only ever sees "build failed"; the detail is for operator logs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build queue is full ({queued} waiting), job rejected")]
    QueueFull { queued: usize },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Unknown template for game: {0}")]
    UnknownTemplate(String),

    #[error("Template directory is missing: {}", .0.display())]
    TemplateMissing(PathBuf),

    #[error(
        "Missing build dependencies in work dir for {template}: {}. \
         Runtime installation is disabled; warm the dependency cache before serving traffic",
        .missing.join(", ")
    )]
    DependenciesMissing { template: String, missing: Vec<String> },

    #[error("Dependency install failed for cache key {key}: {reason}")]
    DependencyInstall { key: String, reason: String },

    #[error("Resolution contract failed for {template} ({file}): {rule}")]
    ContractViolation {
        template: String,
        file: String,
        rule: String,
    },

    #[error("Resolution contract file is missing for {template}: {file}")]
    ContractFileMissing { template: String, file: String },

    #[error("Missing required assets for theme {theme}: {summary}")]
    ThemeAssetsMissing { theme: String, summary: String },

    #[error("Build of {template} timed out after {timeout_secs}s")]
    BuildTimeout { template: String, timeout_secs: u64 },

    #[error("Build of {template} failed (exit code {code:?}): {detail}")]
    BuildCommandFailed {
        template: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("Build output is missing: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Timeouts are reported apart from other failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BuildTimeout { .. })
    }

    /// Stable tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::InvalidOrder(_) => "invalid_order",
            Self::UnknownTemplate(_) | Self::TemplateMissing(_) => "template",
            Self::DependenciesMissing { .. } | Self::DependencyInstall { .. } => "dependency",
            Self::ContractViolation { .. }
            | Self::ContractFileMissing { .. }
            | Self::ThemeAssetsMissing { .. } => "contract",
            Self::BuildTimeout { .. } => "build_timeout",
            Self::BuildCommandFailed { .. } => "build_command",
            Self::OutputMissing(_) => "output_missing",
            Self::Io { .. } | Self::Serialization(_) => "io",
        }
    }
}

/// Attach a context string to an `io::Result`.
pub(crate) trait IoContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, BuildError>;
}

impl<T> IoContext<T> for Result<T, io::Error> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::io(context(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinct_from_command_failure() {
        let timeout = BuildError::BuildTimeout {
            template: "matching".into(),
            timeout_secs: 120,
        };
        let failed = BuildError::BuildCommandFailed {
            template: "matching".into(),
            code: Some(1),
            detail: "vite exited".into(),
        };
        assert!(timeout.is_timeout());
        assert!(!failed.is_timeout());
        assert_ne!(timeout.kind(), failed.kind());
    }

    #[test]
    fn dependency_error_mentions_disabled_install() {
        let err = BuildError::DependenciesMissing {
            template: "railroad".into(),
            missing: vec!["vite".into(), "bin:tsc".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("vite, bin:tsc"));
        assert!(msg.contains("Runtime installation is disabled"));
    }
}
