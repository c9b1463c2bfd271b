//! Template Assembler
//!
//! Stages a private working copy of a template, injects per-order config,
//! enforces the resolution contract and runs the template's build command.
//! Each step is a hard precondition for the next.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::deps::{check_complete, find_missing, DependencyProvisioner, DEPS_DIR_NAME, MANIFEST_NAME};
use crate::error::{BuildError, IoContext};
use crate::exec::{run_shell, CommandError};
use crate::order::{BuildOrder, DEFAULT_CURRENCY, DEFAULT_LANGUAGE, DEFAULT_STARTING_BALANCE};
use crate::staging::{copy_tree, DirectoryStager};
use crate::templates::{ConfigInjectionMode, TemplateDescriptor};
use crate::validation::ContractValidator;
use crate::workspace::Workspace;

const STRUCTURED_DEFAULT_THEME: &str = "chicken_farm";
const DEFAULT_BET: u32 = 50;
const MIN_BET: u32 = 10;
const MAX_BET: u32 = 1000;

pub struct TemplateAssembler {
    templates_dir: PathBuf,
    provisioner: Arc<DependencyProvisioner>,
    stager: Arc<DirectoryStager>,
    validator: Arc<ContractValidator>,
    build_timeout: Duration,
    max_output: usize,
}

impl TemplateAssembler {
    pub fn new(
        templates_dir: PathBuf,
        provisioner: Arc<DependencyProvisioner>,
        stager: Arc<DirectoryStager>,
        build_timeout: Duration,
        max_output: usize,
    ) -> Self {
        Self {
            templates_dir,
            provisioner,
            stager,
            validator: Arc::new(ContractValidator::new()),
            build_timeout,
            max_output,
        }
    }

    pub fn template_dir(&self, descriptor: &TemplateDescriptor) -> PathBuf {
        self.templates_dir.join(&descriptor.template_dir_name)
    }

    /// Build `order` inside `workspace` and return the built page's path.
    pub async fn assemble(
        &self,
        descriptor: &TemplateDescriptor,
        order: &BuildOrder,
        workspace: &Workspace,
    ) -> Result<PathBuf, BuildError> {
        let template_dir = self.template_dir(descriptor);
        let work_dir = workspace.path();

        if !tokio::fs::try_exists(&template_dir).await.unwrap_or(false) {
            return Err(BuildError::TemplateMissing(template_dir));
        }

        let (src, dest) = (template_dir.clone(), work_dir.to_path_buf());
        blocking(move || {
            copy_tree(&src, &dest, |p| p.file_name().map_or(false, |n| n == DEPS_DIR_NAME))
        })
        .await
        .context(|| format!("copying template {}", descriptor.template_dir_name))?;

        self.stage_dependencies(descriptor, &template_dir, work_dir).await?;
        write_structured_config(descriptor, order, work_dir).await?;

        self.validator
            .validate_staged(descriptor, work_dir, order.config.theme_id.as_deref())
            .await?;

        if let Some(command) = &descriptor.build_command {
            info!(order_id = %order.id, template = %descriptor.template_dir_name, "Building template");
            self.run_build(descriptor, command, work_dir).await?;
        }

        let artifact = work_dir.join(&descriptor.output_artifact);
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Err(BuildError::OutputMissing(artifact));
        }
        Ok(artifact)
    }

    /// Link or copy dependencies into the work dir, then verify them there.
    async fn stage_dependencies(
        &self,
        descriptor: &TemplateDescriptor,
        template_dir: &Path,
        work_dir: &Path,
    ) -> Result<(), BuildError> {
        let template_manifest = template_dir.join(MANIFEST_NAME);
        if !tokio::fs::try_exists(&template_manifest).await.unwrap_or(false) {
            return Ok(());
        }

        let executables = &descriptor.required_executables;
        let local_deps = template_dir.join(DEPS_DIR_NAME);
        let shared = if check_complete(&local_deps, &template_manifest, executables).await {
            debug!(template = %descriptor.template_dir_name, "Reusing template-local dependencies");
            local_deps
        } else {
            self.provisioner
                .ensure(&descriptor.template_dir_name, template_dir, executables)
                .await?
        };

        let work_deps = work_dir.join(DEPS_DIR_NAME);
        let stager = self.stager.clone();
        let dest = work_deps.clone();
        let strategy = blocking(move || stager.stage(&shared, &dest))
            .await
            .context(|| format!("staging dependencies for {}", descriptor.template_dir_name))?;
        debug!(template = %descriptor.template_dir_name, strategy, "Dependencies staged");

        let missing = find_missing(&work_deps, &work_dir.join(MANIFEST_NAME), executables).await;
        if !missing.is_empty() {
            return Err(BuildError::DependenciesMissing {
                template: descriptor.template_dir_name.clone(),
                missing,
            });
        }
        Ok(())
    }

    async fn run_build(&self, descriptor: &TemplateDescriptor, command: &str, work_dir: &Path) -> Result<(), BuildError> {
        match run_shell(command, work_dir, self.build_timeout, self.max_output).await {
            Ok(_) => Ok(()),
            Err(CommandError::TimedOut { after, .. }) => Err(BuildError::BuildTimeout {
                template: descriptor.template_dir_name.clone(),
                timeout_secs: after.as_secs(),
            }),
            Err(CommandError::Failed { code, stderr_tail, .. }) => Err(BuildError::BuildCommandFailed {
                template: descriptor.template_dir_name.clone(),
                code,
                detail: stderr_tail,
            }),
            Err(other) => Err(BuildError::BuildCommandFailed {
                template: descriptor.template_dir_name.clone(),
                code: None,
                detail: other.to_string(),
            }),
        }
    }
}

/// Write the config file `structured` templates read during their build.
async fn write_structured_config(
    descriptor: &TemplateDescriptor,
    order: &BuildOrder,
    work_dir: &Path,
) -> Result<(), BuildError> {
    let ConfigInjectionMode::Structured { config_path } = &descriptor.config_injection else {
        return Ok(());
    };

    let config = &order.config;
    let user_config = json!({
        "language": config.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
        "currency": config.currency.as_deref().unwrap_or(DEFAULT_CURRENCY),
        "startingBalance": config.starting_balance.filter(|b| b.is_finite()).unwrap_or(DEFAULT_STARTING_BALANCE),
        "defaultBet": DEFAULT_BET,
        "minBet": MIN_BET,
        "maxBet": MAX_BET,
        "themeId": config.theme_id.as_deref().unwrap_or(STRUCTURED_DEFAULT_THEME),
        "isWatermarked": config.is_watermarked,
    });

    let path = work_dir.join(config_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(&path, serde_json::to_string_pretty(&user_config)?)
        .await
        .context(|| format!("writing {}", path.display()))
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::deps::test_support::{materialize, FakeInstaller};
    use crate::order::OrderConfig;
    use crate::templates::resolution_check;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        installer: Arc<FakeInstaller>,
        assembler: TemplateAssembler,
    }

    fn fixture(build_timeout: Duration) -> Fixture {
        let root = TempDir::new().unwrap();
        let installer = Arc::new(FakeInstaller::new(&["vite"]));
        let provisioner = Arc::new(DependencyProvisioner::new(
            root.path().join("temp/_deps_cache"),
            installer.clone(),
            Duration::from_secs(5),
        ));
        let stager = Arc::new(DirectoryStager::probe(root.path()));
        let assembler = TemplateAssembler::new(
            root.path().join("templates"),
            provisioner,
            stager,
            build_timeout,
            1024 * 1024,
        );
        Fixture { root, installer, assembler }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn vite_template(root: &Path, width: u32) -> TemplateDescriptor {
        let tpl = root.join("templates/matching");
        write(&tpl.join("package.json"), r#"{"devDependencies": {"vite": "^5"}}"#);
        write(&tpl.join("src/config.js"), &format!("export const design = {{ width: {width}, height: 1920 }};"));
        write(&tpl.join("src/index.html"), "<html><head></head><body>game</body></html>");
        TemplateDescriptor::runtime(
            "matching",
            "matching",
            Some("test -e node_modules/.bin/vite && mkdir -p dist && cp src/index.html dist/index.html"),
            "dist/index.html",
        )
        .with_executables(&["vite"])
        .with_check(resolution_check(
            "src/config.js",
            &[(r"width:\s*1080\b", "Design width is 1080"), (r"height:\s*1920\b", "Design height is 1920")],
        ))
    }

    fn order(id: &str) -> BuildOrder {
        BuildOrder::new(id, OrderConfig { game: Some("matching".into()), ..Default::default() })
    }

    #[tokio::test]
    async fn builds_with_provisioned_dependencies() {
        let f = fixture(Duration::from_secs(10));
        let d = vite_template(f.root.path(), 1080);
        let ws = Workspace::create(&f.root.path().join("temp"), "job1").await.unwrap();

        let artifact = f.assembler.assemble(&d, &order("job1"), &ws).await.unwrap();
        assert!(artifact.ends_with("dist/index.html"));
        assert!(fs::read_to_string(&artifact).unwrap().contains("game"));
        assert_eq!(f.installer.calls(), 1);
        ws.remove().await;
    }

    #[tokio::test]
    async fn contract_violation_stops_before_build() {
        let f = fixture(Duration::from_secs(10));
        let d = vite_template(f.root.path(), 720);
        let ws = Workspace::create(&f.root.path().join("temp"), "job2").await.unwrap();

        let err = f.assembler.assemble(&d, &order("job2"), &ws).await.unwrap_err();
        assert!(err.to_string().contains("Design width is 1080"), "{err}");
        assert!(!ws.path().join("dist").exists());
    }

    #[tokio::test]
    async fn template_local_dependencies_skip_the_cache() {
        let f = fixture(Duration::from_secs(10));
        let d = vite_template(f.root.path(), 1080);
        materialize(&f.root.path().join("templates/matching"), &["vite".to_string()]);
        let ws = Workspace::create(&f.root.path().join("temp"), "job3").await.unwrap();

        f.assembler.assemble(&d, &order("job3"), &ws).await.unwrap();
        assert_eq!(f.installer.calls(), 0);
    }

    #[tokio::test]
    async fn missing_output_is_fatal() {
        let f = fixture(Duration::from_secs(10));
        let tpl = f.root.path().join("templates/blank");
        write(&tpl.join("README"), "nothing here");
        let d = TemplateDescriptor::runtime("blank", "blank", Some("true"), "dist/index.html");
        let ws = Workspace::create(&f.root.path().join("temp"), "job4").await.unwrap();

        let err = f.assembler.assemble(&d, &order("job4"), &ws).await.unwrap_err();
        assert!(matches!(err, BuildError::OutputMissing(_)), "{err}");
    }

    #[tokio::test]
    async fn build_timeout_is_distinct() {
        let f = fixture(Duration::from_millis(300));
        let tpl = f.root.path().join("templates/slow");
        write(&tpl.join("index.html"), "<html></html>");
        let d = TemplateDescriptor::runtime("slow", "slow", Some("sleep 5"), "index.html");
        let ws = Workspace::create(&f.root.path().join("temp"), "job5").await.unwrap();

        let err = f.assembler.assemble(&d, &order("job5"), &ws).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[tokio::test]
    async fn structured_templates_receive_user_config() {
        let f = fixture(Duration::from_secs(10));
        let tpl = f.root.path().join("templates/rail");
        write(&tpl.join("index.html"), "<html></html>");
        let d = TemplateDescriptor::runtime("rail", "rail", None, "index.html").structured("src/UserConfig.json");
        let ws = Workspace::create(&f.root.path().join("temp"), "job6").await.unwrap();
        let o = BuildOrder::new(
            "job6",
            OrderConfig { currency: Some("€".into()), is_watermarked: true, ..Default::default() },
        );

        f.assembler.assemble(&d, &o, &ws).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.path().join("src/UserConfig.json")).unwrap()).unwrap();
        assert_eq!(written["currency"], "€");
        assert_eq!(written["themeId"], "chicken_farm");
        assert_eq!(written["isWatermarked"], true);
        assert_eq!(written["maxBet"], 1000);
    }

    #[tokio::test]
    async fn missing_template_directory_is_reported() {
        let f = fixture(Duration::from_secs(10));
        let d = TemplateDescriptor::runtime("ghost", "ghost", None, "index.html");
        let ws = Workspace::create(&f.root.path().join("temp"), "job7").await.unwrap();
        let err = f.assembler.assemble(&d, &order("job7"), &ws).await.unwrap_err();
        assert!(matches!(err, BuildError::TemplateMissing(_)));
    }
}
