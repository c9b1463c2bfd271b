//! Hashing System - SHA-256 Guard Signatures
//!
//! The guard signature binds a preview's enforced limits to its configuration
//! and a per-build salt. The client bootstrap recomputes the same digest.

use sha2::{Digest, Sha256};

use crate::order::RuntimeConfig;

/// Contract tag folded into every guard payload.
pub const GUARD_CONTRACT_TAG: &str = "guard_v2";
/// Value of `guardVer` on signed previews.
pub const GUARD_VERSION: &str = "v2";

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `f64` rendered exactly as JavaScript's `String(number)` renders it.
///
/// Shortest round-trip digits, with exponent notation below `1e-6` and from
/// `1e21` up.
pub fn js_number_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value < 0.0 {
        return format!("-{}", js_number_string(-value));
    }

    // `{:e}` yields the shortest round-trip mantissa, e.g. `1.2345e3`.
    let sci = format!("{value:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let k = digits.len() as i32;
    let n = exp.parse::<i32>().unwrap_or(0) + 1;

    if k <= n && n <= 21 {
        format!("{digits}{}", "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{int}.{frac}")
    } else if -6 < n && n <= 0 {
        format!("0.{}{digits}", "0".repeat(-n as usize))
    } else {
        let e = n - 1;
        let sign = if e < 0 { '-' } else { '+' };
        let (lead, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{lead}e{sign}{}", e.abs())
        } else {
            format!("{lead}.{rest}e{sign}{}", e.abs())
        }
    }
}

/// Canonical pipe-joined string of the signed fields.
///
/// Every field is rendered the way the client's `String(v)` renders it, so
/// both sides hash identical bytes.
pub fn guard_payload(config: &RuntimeConfig) -> String {
    [
        config.game.clone(),
        config.theme_id.clone(),
        config.language.clone(),
        config.currency.clone(),
        js_number_string(config.starting_balance),
        config.preview_max_interactions.to_string(),
        config.is_watermarked.to_string(),
        config.click_url.clone().unwrap_or_default(),
        GUARD_CONTRACT_TAG.to_string(),
    ]
    .join("|")
}

pub fn guard_signature(config: &RuntimeConfig, salt: &str) -> String {
    sha256_hex(format!("{}|{}", guard_payload(config), salt).as_bytes())
}

/// Fresh 12-hex-digit salt.
pub fn new_guard_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Recompute the signature from the embedded fields and compare.
pub fn verify_guard(config: &RuntimeConfig) -> bool {
    match (&config.guard_sig, &config.guard_salt, &config.guard_ver) {
        (Some(sig), Some(salt), Some(ver)) if ver == GUARD_VERSION => {
            guard_signature(config, salt) == *sig
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview_config() -> RuntimeConfig {
        RuntimeConfig {
            game: "matching".into(),
            theme_id: "money_drag".into(),
            language: "en".into(),
            currency: "$".into(),
            starting_balance: 1000.0,
            is_watermarked: true,
            preview_max_interactions: 4,
            click_url: None,
            target_balance: None,
            guard_sig: None,
            guard_ver: None,
            guard_salt: None,
        }
    }

    #[test]
    fn payload_field_order_is_fixed() {
        assert_eq!(
            guard_payload(&preview_config()),
            "matching|money_drag|en|$|1000|4|true||guard_v2"
        );
    }

    #[test]
    fn numbers_render_like_javascript() {
        let cases = [
            (1000.0, "1000"),
            (0.5, "0.5"),
            (1234.75, "1234.75"),
            (-2.5, "-2.5"),
            (-0.0, "0"),
            (0.000001, "0.000001"),
            (0.0000015, "0.0000015"),
            (1e-7, "1e-7"),
            (1.5e-7, "1.5e-7"),
            (123456789012345680000.0, "123456789012345680000"),
            (1e21, "1e+21"),
            (1.25e22, "1.25e+22"),
            (0.1 + 0.2, "0.30000000000000004"),
            (f64::INFINITY, "Infinity"),
        ];
        for (value, expected) in cases {
            assert_eq!(js_number_string(value), expected, "{value:?}");
        }
    }

    #[test]
    fn exponent_range_balances_sign_like_the_client() {
        let mut cfg = preview_config();
        cfg.starting_balance = 1e-7;
        assert_eq!(guard_payload(&cfg), "matching|money_drag|en|$|1e-7|4|true||guard_v2");
        cfg.starting_balance = 2e21;
        assert_eq!(guard_payload(&cfg), "matching|money_drag|en|$|2e+21|4|true||guard_v2");
    }

    #[test]
    fn signature_depends_on_salt() {
        let cfg = preview_config();
        assert_ne!(guard_signature(&cfg, "aaaa"), guard_signature(&cfg, "bbbb"));
        assert_eq!(guard_signature(&cfg, "aaaa"), guard_signature(&cfg, "aaaa"));
        assert_eq!(guard_signature(&cfg, "aaaa").len(), 64);
    }

    #[test]
    fn salt_is_twelve_hex_digits() {
        let salt = new_guard_salt();
        assert_eq!(salt.len(), 12);
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(salt, new_guard_salt());
    }

    #[test]
    fn verify_rejects_raised_interaction_cap() {
        let mut cfg = preview_config();
        let salt = new_guard_salt();
        cfg.guard_sig = Some(guard_signature(&cfg, &salt));
        cfg.guard_salt = Some(salt);
        cfg.guard_ver = Some(GUARD_VERSION.into());
        assert!(verify_guard(&cfg));

        cfg.preview_max_interactions = 400;
        assert!(!verify_guard(&cfg));
    }

    #[test]
    fn hash_deterministic() {
        assert_eq!(sha256_hex(b"test data"), sha256_hex(b"test data"));
    }
}
