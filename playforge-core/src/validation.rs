//! Contract Validation - Rule/Policy Separation
//!
//! Rules inspect a staged working copy and produce structured violations.
//! Every violation is fatal; the first one becomes the build error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::BuildError;
use crate::templates::TemplateDescriptor;

const MISSING_ASSET_SAMPLE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PatternMismatch,
    FileMissing,
    AssetsMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractViolation {
    pub rule: String,
    pub kind: ViolationKind,
    /// File or theme the violation is about.
    pub subject: String,
    pub message: String,
}

impl ContractViolation {
    fn into_error(self, template: &str) -> BuildError {
        match self.kind {
            ViolationKind::PatternMismatch => BuildError::ContractViolation {
                template: template.to_string(),
                file: self.subject,
                rule: self.message,
            },
            ViolationKind::FileMissing => BuildError::ContractFileMissing {
                template: template.to_string(),
                file: self.subject,
            },
            ViolationKind::AssetsMissing => BuildError::ThemeAssetsMissing {
                theme: self.subject,
                summary: self.message,
            },
        }
    }
}

/// What a rule sees about the order being built.
#[derive(Debug, Clone, Copy)]
pub struct ContractContext<'a> {
    pub work_dir: &'a Path,
    pub theme_id: Option<&'a str>,
}

pub trait ContractRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, descriptor: &TemplateDescriptor, ctx: ContractContext<'_>) -> Vec<ContractViolation>;
}

// --- Concrete Rules ---

/// Fixed design dimensions and similar textual invariants.
pub struct ResolutionContractRule;

impl ContractRule for ResolutionContractRule {
    fn name(&self) -> &'static str { "resolution_contract" }

    fn check(&self, descriptor: &TemplateDescriptor, ctx: ContractContext<'_>) -> Vec<ContractViolation> {
        let mut violations = vec![];

        for check in &descriptor.resolution_checks {
            let display = check.relative_path.to_string_lossy().replace('\\', "/");
            let content = match fs::read_to_string(ctx.work_dir.join(&check.relative_path)) {
                Ok(content) => content,
                Err(_) => {
                    violations.push(ContractViolation {
                        rule: self.name().to_string(),
                        kind: ViolationKind::FileMissing,
                        subject: display,
                        message: "Resolution contract file is missing".to_string(),
                    });
                    continue;
                }
            };

            for pattern in &check.patterns {
                let message = match &pattern.regex {
                    Some(regex) if regex.is_match(&content) => continue,
                    Some(_) => pattern.description.clone(),
                    None => format!("{} (pattern {:?} does not compile)", pattern.description, pattern.source),
                };
                violations.push(ContractViolation {
                    rule: self.name().to_string(),
                    kind: ViolationKind::PatternMismatch,
                    subject: display.clone(),
                    message,
                });
            }
        }

        violations
    }
}

/// Every asset the selected theme needs must exist in the working copy.
pub struct ThemeAssetRule;

impl ContractRule for ThemeAssetRule {
    fn name(&self) -> &'static str { "theme_assets" }

    fn check(&self, descriptor: &TemplateDescriptor, ctx: ContractContext<'_>) -> Vec<ContractViolation> {
        let Some(theme_assets) = &descriptor.theme_assets else {
            return vec![];
        };
        let Some((theme, required)) = theme_assets.select(ctx.theme_id) else {
            return vec![];
        };

        let missing: Vec<&str> = required
            .iter()
            .map(String::as_str)
            .filter(|rel| {
                let normalized = rel.trim_start_matches("./").trim_start_matches('/');
                !ctx.work_dir.join(normalized).exists()
            })
            .collect();

        if missing.is_empty() {
            return vec![];
        }

        let mut summary = missing
            .iter()
            .take(MISSING_ASSET_SAMPLE)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        if missing.len() > MISSING_ASSET_SAMPLE {
            summary.push_str(&format!(" (+{} more)", missing.len() - MISSING_ASSET_SAMPLE));
        }

        vec![ContractViolation {
            rule: self.name().to_string(),
            kind: ViolationKind::AssetsMissing,
            subject: theme.to_string(),
            message: summary,
        }]
    }
}

/// Validator runs every rule; any violation blocks the build.
pub struct ContractValidator {
    rules: Vec<Box<dyn ContractRule>>,
}

impl ContractValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(ResolutionContractRule), Box::new(ThemeAssetRule)],
        }
    }

    pub fn violations(&self, descriptor: &TemplateDescriptor, ctx: ContractContext<'_>) -> Vec<ContractViolation> {
        self.rules
            .iter()
            .flat_map(|rule| rule.check(descriptor, ctx))
            .collect()
    }

    pub fn validate(&self, descriptor: &TemplateDescriptor, ctx: ContractContext<'_>) -> Result<(), BuildError> {
        match self.violations(descriptor, ctx).into_iter().next() {
            Some(violation) => Err(violation.into_error(&descriptor.template_dir_name)),
            None => Ok(()),
        }
    }

    /// [`validate`](Self::validate) on the blocking pool; rules read files synchronously.
    pub async fn validate_staged(
        self: &Arc<Self>,
        descriptor: &TemplateDescriptor,
        work_dir: &Path,
        theme_id: Option<&str>,
    ) -> Result<(), BuildError> {
        let validator = Arc::clone(self);
        let descriptor = descriptor.clone();
        let work_dir = work_dir.to_path_buf();
        let theme_id = theme_id.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            validator.validate(
                &descriptor,
                ContractContext {
                    work_dir: &work_dir,
                    theme_id: theme_id.as_deref(),
                },
            )
        })
        .await
        .map_err(|e| BuildError::io("contract validation", std::io::Error::other(e)))?
    }
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{resolution_check, TemplateRegistry};
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn ctx(dir: &TempDir) -> ContractContext<'_> {
        ContractContext { work_dir: dir.path(), theme_id: None }
    }

    #[test]
    fn matching_contract_passes_with_fixed_dimensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/config.js", "export default { width: 1080, height: 1920 };");
        let registry = TemplateRegistry::builtin();
        let d = registry.get("matching").unwrap();
        assert!(ContractValidator::new().validate(d, ctx(&dir)).is_ok());
    }

    #[test]
    fn pattern_mismatch_names_file_and_rule() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/config.js", "export default { width: 720, height: 1920 };");
        let registry = TemplateRegistry::builtin();
        let d = registry.get("matching").unwrap();

        let err = ContractValidator::new().validate(d, ctx(&dir)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("src/config.js"), "{msg}");
        assert!(msg.contains("Design width is 1080"), "{msg}");
        assert_eq!(err.kind(), "contract");
    }

    #[test]
    fn missing_contract_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let registry = TemplateRegistry::builtin();
        let d = registry.get("match3").unwrap();
        let err = ContractValidator::new().validate(d, ctx(&dir)).unwrap_err();
        assert!(matches!(err, BuildError::ContractFileMissing { .. }));
    }

    #[test]
    fn width_1080_does_not_match_10800() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.js", "width: 10800");
        let d = crate::templates::TemplateDescriptor::runtime("t", "t", None, "index.html")
            .with_check(resolution_check("a.js", &[(r"width:\s*1080\b", "width is 1080")]));
        assert!(ContractValidator::new().validate(&d, ctx(&dir)).is_err());
    }

    #[test]
    fn uncompilable_pattern_fails_the_contract() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.js", "width: 1080");
        let d = crate::templates::TemplateDescriptor::runtime("t", "t", None, "index.html")
            .with_check(resolution_check("a.js", &[(r"width:\s*(1080", "width is 1080")]));
        let err = ContractValidator::new().validate(&d, ctx(&dir)).unwrap_err();
        assert!(matches!(err, BuildError::ContractViolation { .. }));
        assert!(err.to_string().contains("does not compile"), "{err}");
    }

    #[tokio::test]
    async fn staged_validation_runs_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/config.js", "export default { width: 1080, height: 1280 };");
        let registry = TemplateRegistry::builtin();
        let d = registry.get("matching").unwrap();
        let validator = Arc::new(ContractValidator::new());

        let err = validator.validate_staged(d, dir.path(), None).await.unwrap_err();
        assert!(err.to_string().contains("Design height is 1920"), "{err}");

        write(dir.path(), "src/config.js", "export default { width: 1080, height: 1920 };");
        assert!(validator.validate_staged(d, dir.path(), None).await.is_ok());
    }

    #[test]
    fn theme_assets_sample_is_bounded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/Game.ts", "width: 1080, height: 1920");
        let registry = TemplateRegistry::builtin();
        let d = registry.get("railroad").unwrap();

        let err = ContractValidator::new()
            .validate(d, ContractContext { work_dir: dir.path(), theme_id: Some("cyber_city") })
            .unwrap_err();
        match err {
            BuildError::ThemeAssetsMissing { theme, summary } => {
                assert_eq!(theme, "cyber_city");
                assert!(summary.ends_with("(+5 more)"), "{summary}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
