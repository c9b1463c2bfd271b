//! Post-Processing Steps
//!
//! Optional external commands run over a finished artifact (hardening,
//! minification). Each step has its own deadline and a failing step is
//! logged and skipped; the artifact already written stays in place.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::exec::run_shell;

/// Replaced by the quoted artifact path before the command runs.
pub const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessStep {
    pub name: String,
    pub command: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PostProcessStep {
    pub fn command_for(&self, artifact: &Path) -> String {
        let quoted = format!("\"{}\"", artifact.display());
        self.command.replace(FILE_PLACEHOLDER, &quoted)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PostProcessReport {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

/// Run every enabled step in order. Never fails.
pub async fn apply_post_processing(
    steps: &[PostProcessStep],
    artifact: &Path,
    cwd: &Path,
    deadline: Duration,
    max_output: usize,
) -> PostProcessReport {
    let mut report = PostProcessReport::default();
    for step in steps.iter().filter(|s| s.enabled) {
        let command = step.command_for(artifact);
        match run_shell(&command, cwd, deadline, max_output).await {
            Ok(_) => {
                info!(step = %step.name, file = %artifact.display(), "Post-processing step applied");
                report.applied.push(step.name.clone());
            }
            Err(e) => {
                error!(step = %step.name, file = %artifact.display(), error = %e, "Post-processing step failed");
                report.failed.push(step.name.clone());
            }
        }
    }
    report
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn step(name: &str, command: &str) -> PostProcessStep {
        PostProcessStep {
            name: name.into(),
            command: command.into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn failing_step_does_not_stop_later_steps() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("out.html");
        std::fs::write(&artifact, "<html></html>").unwrap();

        let steps = vec![
            step("broken", "exit 3"),
            step("slow", "sleep 5"),
            step("stamp", "echo '<!-- hardened -->' >> {file}"),
            PostProcessStep { enabled: false, ..step("off", "rm {file}") },
        ];
        let report = apply_post_processing(
            &steps,
            &artifact,
            dir.path(),
            Duration::from_millis(300),
            1024,
        )
        .await;

        assert_eq!(report.applied, vec!["stamp".to_string()]);
        assert_eq!(report.failed, vec!["broken".to_string(), "slow".to_string()]);
        let html = std::fs::read_to_string(&artifact).unwrap();
        assert!(html.ends_with("<!-- hardened -->\n"));
    }

    #[test]
    fn enabled_defaults_to_true() {
        let parsed: PostProcessStep =
            serde_json::from_str(r#"{"name":"min","command":"minify {file}"}"#).unwrap();
        assert!(parsed.enabled);
        assert_eq!(
            parsed.command_for(Path::new("/tmp/a.html")),
            "minify \"/tmp/a.html\""
        );
    }
}
