//! Orders and Runtime Configuration
//!
//! An order is consumed exactly once. The runtime config is the record the
//! produced page exposes to its client code.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

pub const DEFAULT_GAME: &str = "railroad";
pub const DEFAULT_THEME: &str = "default";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_CURRENCY: &str = "$";
pub const DEFAULT_STARTING_BALANCE: f64 = 1000.0;
pub const DEFAULT_GEO: &str = "en_usd";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOrder {
    pub id: String,
    pub config: OrderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfig {
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub theme_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub starting_balance: Option<f64>,
    #[serde(default)]
    pub is_watermarked: bool,
    #[serde(default)]
    pub geo_id: Option<String>,
    #[serde(default)]
    pub click_url: Option<String>,
    #[serde(default)]
    pub target_balance: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Preview,
    Final,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Final => "final",
        }
    }
}

impl BuildOrder {
    pub fn new(id: impl Into<String>, config: OrderConfig) -> Self {
        Self { id: id.into(), config }
    }

    /// Ids name working directories, so they must stay a single path segment.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.id.trim().is_empty() {
            return Err(BuildError::InvalidOrder("order id is empty".into()));
        }
        let safe = self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !safe {
            return Err(BuildError::InvalidOrder(format!(
                "order id {:?} is not a safe path segment",
                self.id
            )));
        }
        Ok(())
    }

    pub fn variant(&self) -> Variant {
        if self.config.is_watermarked {
            Variant::Preview
        } else {
            Variant::Final
        }
    }

    pub fn game_key(&self) -> &str {
        self.config.game.as_deref().unwrap_or(DEFAULT_GAME)
    }

    pub fn geo_id(&self) -> &str {
        self.config.geo_id.as_deref().unwrap_or(DEFAULT_GEO)
    }

    /// Non-blank click-through override, if any.
    pub fn click_url(&self) -> Option<&str> {
        self.config
            .click_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// `PREVIEW_<id>.html` for previews, sanitized presentation fields otherwise.
    pub fn output_filename(&self) -> String {
        if self.config.is_watermarked {
            return format!("PREVIEW_{}.html", self.id);
        }

        let game = sanitize(self.game_key(), |c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let theme = sanitize(
            self.config.theme_id.as_deref().unwrap_or(DEFAULT_THEME),
            |c| c.is_ascii_alphanumeric() || c == '_' || c == '-',
        );
        let language = sanitize(
            &self
                .config
                .language
                .as_deref()
                .unwrap_or(DEFAULT_LANGUAGE)
                .to_uppercase(),
            |c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-',
        );
        let currency = sanitize(
            self.config.currency.as_deref().unwrap_or(DEFAULT_CURRENCY),
            |c| c.is_ascii_alphanumeric(),
        );
        format!("{game}_{theme}_{language}_{currency}.html")
    }
}

fn sanitize(value: &str, keep: impl Fn(char) -> bool) -> String {
    value.chars().filter(|c| keep(*c)).collect()
}

/// The configuration object exposed by every produced page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub game: String,
    pub theme_id: String,
    pub language: String,
    pub currency: String,
    pub starting_balance: f64,
    pub is_watermarked: bool,
    pub preview_max_interactions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_sig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_salt: Option<String>,
}

impl RuntimeConfig {
    pub fn from_order(order: &BuildOrder, preview_max_interactions: u32) -> Self {
        let config = &order.config;
        Self {
            game: order.game_key().to_string(),
            theme_id: config.theme_id.clone().unwrap_or_else(|| DEFAULT_THEME.to_string()),
            language: config.language.clone().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            currency: config.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            starting_balance: config
                .starting_balance
                .filter(|b| b.is_finite())
                .unwrap_or(DEFAULT_STARTING_BALANCE),
            is_watermarked: config.is_watermarked,
            preview_max_interactions,
            click_url: order.click_url().map(str::to_string),
            target_balance: config.target_balance.filter(|b| b.is_finite()),
            guard_sig: None,
            guard_ver: None,
            guard_salt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, config: OrderConfig) -> BuildOrder {
        BuildOrder::new(id, config)
    }

    #[test]
    fn preview_filename_uses_order_id() {
        let o = order("abc123", OrderConfig { is_watermarked: true, ..Default::default() });
        assert_eq!(o.output_filename(), "PREVIEW_abc123.html");
    }

    #[test]
    fn final_filename_is_sanitized() {
        let o = order(
            "x",
            OrderConfig {
                game: Some("olympus".into()),
                theme_id: Some("gate of/olympus".into()),
                language: Some("pt".into()),
                currency: Some("R$".into()),
                ..Default::default()
            },
        );
        assert_eq!(o.output_filename(), "olympus_gateofolympus_PT_R.html");
    }

    #[test]
    fn unsafe_ids_are_rejected() {
        for id in ["", "../etc", "a/b", "a b", "..", ".", "...", ".hidden", "a.b", "a\\b"] {
            let o = order(id, OrderConfig::default());
            assert!(o.validate().is_err(), "{id:?} should be rejected");
        }
        assert!(order("ord_42-ab", OrderConfig::default()).validate().is_ok());
    }

    #[test]
    fn runtime_config_applies_defaults() {
        let o = order(
            "1",
            OrderConfig {
                click_url: Some("   ".into()),
                target_balance: Some(f64::NAN),
                ..Default::default()
            },
        );
        let rc = RuntimeConfig::from_order(&o, 4);
        assert_eq!(rc.game, "railroad");
        assert_eq!(rc.theme_id, "default");
        assert_eq!(rc.currency, "$");
        assert_eq!(rc.starting_balance, 1000.0);
        assert_eq!(rc.click_url, None);
        assert_eq!(rc.target_balance, None);

        let json = serde_json::to_string(&rc).unwrap();
        assert!(!json.contains("clickUrl"));
        assert!(!json.contains("guardSig"));
        assert!(json.contains(r#""previewMaxInteractions":4"#));
    }
}
