//! Template System - Static Build Contracts
//!
//! Each supported game maps to one descriptor: where the template lives, how
//! it is built, what it must contain, and where its page lands.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{error, warn};

use crate::order::DEFAULT_GAME;

/// How per-order configuration reaches the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInjectionMode {
    /// A config file is written before the template's own build step.
    Structured { config_path: PathBuf },
    /// Nothing is written before the build; only the runtime bootstrap applies.
    RuntimeOnly,
}

/// One required textual invariant.
#[derive(Debug, Clone)]
pub struct ContractPattern {
    pub source: String,
    /// `None` when `source` does not compile; such a pattern never passes.
    pub regex: Option<Regex>,
    pub description: String,
}

/// Patterns one template file must satisfy before building.
#[derive(Debug, Clone)]
pub struct ResolutionCheck {
    pub relative_path: PathBuf,
    pub patterns: Vec<ContractPattern>,
}

/// Per-theme asset lists a template must ship.
#[derive(Debug, Clone, Default)]
pub struct ThemeAssets {
    pub default_theme: String,
    pub required: BTreeMap<String, Vec<String>>,
}

impl ThemeAssets {
    /// Unknown or absent themes fall back to the default theme.
    pub fn select(&self, theme_id: Option<&str>) -> Option<(&str, &[String])> {
        let theme = theme_id
            .filter(|t| self.required.contains_key(*t))
            .unwrap_or(self.default_theme.as_str());
        self.required
            .get_key_value(theme)
            .map(|(name, assets)| (name.as_str(), assets.as_slice()))
    }
}

#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub game_key: String,
    pub template_dir_name: String,
    pub build_command: Option<String>,
    pub required_executables: Vec<String>,
    pub output_artifact: PathBuf,
    pub config_injection: ConfigInjectionMode,
    pub library_game_id: Option<String>,
    pub resolution_checks: Vec<ResolutionCheck>,
    pub theme_assets: Option<ThemeAssets>,
}

impl TemplateDescriptor {
    /// A runtime-only descriptor with no contract checks.
    pub fn runtime(
        game_key: &str,
        template_dir_name: &str,
        build_command: Option<&str>,
        output_artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            game_key: game_key.to_string(),
            template_dir_name: template_dir_name.to_string(),
            build_command: build_command.map(str::to_string),
            required_executables: vec![],
            output_artifact: output_artifact.into(),
            config_injection: ConfigInjectionMode::RuntimeOnly,
            library_game_id: None,
            resolution_checks: vec![],
            theme_assets: None,
        }
    }

    pub fn with_executables(mut self, bins: &[&str]) -> Self {
        self.required_executables = bins.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_library_id(mut self, id: &str) -> Self {
        self.library_game_id = Some(id.to_string());
        self
    }

    pub fn with_check(mut self, check: ResolutionCheck) -> Self {
        self.resolution_checks.push(check);
        self
    }

    pub fn structured(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_injection = ConfigInjectionMode::Structured {
            config_path: config_path.into(),
        };
        self
    }

    pub fn with_theme_assets(mut self, assets: ThemeAssets) -> Self {
        self.theme_assets = Some(assets);
        self
    }
}

/// Build a check from `(regex, description)` pairs. A pattern that does not
/// compile is kept and fails every build of its template.
pub fn resolution_check(relative_path: &str, patterns: &[(&str, &str)]) -> ResolutionCheck {
    ResolutionCheck {
        relative_path: relative_path.split('/').collect(),
        patterns: patterns
            .iter()
            .map(|(pattern, description)| ContractPattern {
                source: pattern.to_string(),
                regex: Regex::new(pattern)
                    .map_err(|e| error!(pattern, error = %e, "Invalid resolution pattern"))
                    .ok(),
                description: description.to_string(),
            })
            .collect(),
    }
}

fn railroad_theme_assets() -> ThemeAssets {
    let chicken_farm = [
        "assets/ground_tile.webp",
        "assets/railroad.webp",
        "assets/platform.webp",
        "assets/idle.gif",
        "assets/death.gif",
        "assets/train.webp",
        "assets/coin_small.webp",
        "assets/scroll_body.webp",
        "assets/audio/main_theme.ogg",
        "assets/audio/move.ogg",
        "assets/audio/pn.ogg",
        "assets/audio/big_win.ogg",
    ];
    let cyber_city = [
        "assets/cyber/ground.webp",
        "assets/cyber/rail.webp",
        "assets/cyber/platform.webp",
        "assets/cyber/robot_idle.png",
        "assets/cyber/robot_jump.png",
        "assets/cyber/explosion.png",
        "assets/cyber/car.webp",
        "assets/cyber/chip.webp",
        "assets/cyber/holo_panel.webp",
        "assets/audio/cyber_theme.ogg",
        "assets/audio/laser_jump.ogg",
        "assets/audio/glitch.ogg",
        "assets/audio/cyber_win.ogg",
    ];

    let mut required = BTreeMap::new();
    required.insert(
        "chicken_farm".to_string(),
        chicken_farm.iter().map(|s| s.to_string()).collect(),
    );
    required.insert(
        "cyber_city".to_string(),
        cyber_city.iter().map(|s| s.to_string()).collect(),
    );
    ThemeAssets {
        default_theme: "chicken_farm".to_string(),
        required,
    }
}

fn builtin_descriptors() -> Vec<TemplateDescriptor> {
    vec![
        TemplateDescriptor::runtime("railroad", "railroad", Some("npm run build"), "dist/index.html")
            .with_executables(&["tsc", "vite"])
            .structured("src/UserConfig.json")
            .with_library_id("game_railroad")
            .with_check(resolution_check(
                "src/Game.ts",
                &[
                    (r"width:\s*1080\b", "Pixi width is 1080"),
                    (r"height:\s*1920\b", "Pixi height is 1920"),
                ],
            ))
            .with_theme_assets(railroad_theme_assets()),
        TemplateDescriptor::runtime(
            "olympus",
            "gate_of_olympus",
            Some("node build-release.js"),
            "release/index.html",
        )
        .with_library_id("game_olympus")
        .with_check(resolution_check(
            "dev/scripts/game.js",
            &[
                (r"const\s+DESIGN_WIDTH\s*=\s*1080\b", "DESIGN_WIDTH is 1080"),
                (r"const\s+DESIGN_HEIGHT\s*=\s*1920\b", "DESIGN_HEIGHT is 1920"),
            ],
        ))
        .with_check(resolution_check(
            "dev/styles/main.css",
            &[
                (r"--design-width:\s*1080\b", "CSS --design-width is 1080"),
                (r"--design-height:\s*1920\b", "CSS --design-height is 1920"),
            ],
        )),
        TemplateDescriptor::runtime("matching", "matching", Some("npm run build"), "dist/index.html")
            .with_executables(&["vite"])
            .with_library_id("game_drag")
            .with_check(resolution_check(
                "src/config.js",
                &[
                    (r"width:\s*1080\b", "Design width is 1080"),
                    (r"height:\s*1920\b", "Design height is 1920"),
                ],
            )),
        TemplateDescriptor::runtime("match3", "3_v_ryad", Some("npm run build"), "dist/index.html")
            .with_executables(&["vite"])
            .with_library_id("game_match3")
            .with_check(resolution_check(
                "src/main.js",
                &[
                    (r"const\s+DESIGN_W\s*=\s*1080\b", "DESIGN_W is 1080"),
                    (r"const\s+DESIGN_H\s*=\s*1920\b", "DESIGN_H is 1920"),
                ],
            )),
    ]
}

/// Template registry - game key to descriptor
pub struct TemplateRegistry {
    templates: HashMap<String, TemplateDescriptor>,
    fallback: String,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            fallback: DEFAULT_GAME.to_string(),
        }
    }

    /// The four shipped game templates.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    pub fn get(&self, game_key: &str) -> Option<&TemplateDescriptor> {
        self.templates.get(game_key)
    }

    /// Unknown game keys resolve to the fallback template.
    pub fn resolve(&self, game_key: &str) -> Option<&TemplateDescriptor> {
        self.templates.get(game_key).or_else(|| {
            let fallback = self.templates.get(&self.fallback);
            if fallback.is_some() {
                warn!(game = game_key, fallback = %self.fallback, "Unknown game, using fallback template");
            }
            fallback
        })
    }

    pub fn list(&self) -> Vec<&TemplateDescriptor> {
        let mut all: Vec<_> = self.templates.values().collect();
        all.sort_by(|a, b| a.game_key.cmp(&b.game_key));
        all
    }

    pub fn register(&mut self, descriptor: TemplateDescriptor) {
        self.templates.insert(descriptor.game_key.clone(), descriptor);
    }

    pub fn set_fallback(&mut self, game_key: &str) {
        self.fallback = game_key.to_string();
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_patterns_all_compile() {
        let registry = TemplateRegistry::builtin();
        let expected = [("railroad", 2), ("olympus", 4), ("matching", 2), ("match3", 2)];
        for (game, count) in expected {
            let d = registry.get(game).unwrap();
            let patterns: Vec<_> = d.resolution_checks.iter().flat_map(|c| &c.patterns).collect();
            assert_eq!(patterns.len(), count, "{game}");
            for p in patterns {
                assert!(p.regex.is_some(), "{game}: {}", p.source);
            }
        }
    }

    #[test]
    fn invalid_pattern_is_kept_not_dropped() {
        let check = resolution_check("a.js", &[(r"width:\s*(1080", "width is 1080"), (r"x", "has x")]);
        assert_eq!(check.patterns.len(), 2);
        assert!(check.patterns[0].regex.is_none());
        assert!(check.patterns[1].regex.is_some());
    }

    #[test]
    fn unknown_game_falls_back_to_railroad() {
        let registry = TemplateRegistry::builtin();
        let d = registry.resolve("plinko").unwrap();
        assert_eq!(d.template_dir_name, "railroad");
        assert!(matches!(d.config_injection, ConfigInjectionMode::Structured { .. }));
    }

    #[test]
    fn olympus_is_runtime_only_without_executables() {
        let registry = TemplateRegistry::builtin();
        let d = registry.get("olympus").unwrap();
        assert_eq!(d.config_injection, ConfigInjectionMode::RuntimeOnly);
        assert!(d.required_executables.is_empty());
        assert_eq!(d.output_artifact, PathBuf::from("release/index.html"));
    }

    #[test]
    fn theme_selection_falls_back_to_default() {
        let assets = railroad_theme_assets();
        let (theme, list) = assets.select(Some("unknown")).unwrap();
        assert_eq!(theme, "chicken_farm");
        assert_eq!(list.len(), 12);
        let (theme, _) = assets.select(Some("cyber_city")).unwrap();
        assert_eq!(theme, "cyber_city");
    }
}
