//! # Feature settings
//!
//! The site's feature-flag blob: a fixed set of named booleans persisted as a
//! single JSON document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::error::PipelineError;
use crate::repositories::SettingsRepository;

/// Storage key of the feature-flag blob.
pub const FEATURE_SETTINGS_KEY: &str = "feature_flags";

/// Known flags and their defaults.
pub const FEATURE_DEFAULTS: [(&str, bool); 20] = [
    ("retro_effects", true),
    ("advanced_tracking", false),
    ("ai_chatbot", false),
    ("lazy_load_images", true),
    ("minify_css_js", true),
    ("scroll_animations", false),
    ("glitch_animations", false),
    ("quick_buy", false),
    ("cart_animations", false),
    ("checkout_optimization", false),
    ("abandoned_cart_recovery", false),
    ("conversion_tracking", true),
    ("webp_conversion", false),
    ("critical_css", false),
    ("heatmap_tracking", false),
    ("ai_recommendations", false),
    ("ai_content_optimization", false),
    ("custom_cursor", false),
    ("custom_css", true),
    ("error_notifications", false),
];

/// Feature flags by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSettings {
    flags: BTreeMap<String, bool>,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            flags: FEATURE_DEFAULTS
                .iter()
                .map(|(name, enabled)| (name.to_string(), *enabled))
                .collect(),
        }
    }
}

/// Loose truthiness for submitted flag values.
fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(text) => !(text.is_empty() || text == "0"),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

impl FeatureSettings {
    /// Keep only known flags; absent flags become `false`.
    pub fn from_submission(submitted: &JsonValue) -> Self {
        let submitted = submitted.as_object();
        Self {
            flags: FEATURE_DEFAULTS
                .iter()
                .map(|(name, _)| {
                    let enabled = submitted
                        .and_then(|map| map.get(*name))
                        .is_some_and(truthy);
                    (name.to_string(), enabled)
                })
                .collect(),
        }
    }

    /// Overlay a stored blob on the defaults, ignoring unknown keys.
    fn from_stored(stored: &JsonValue) -> Self {
        let mut settings = Self::default();
        if let Some(map) = stored.as_object() {
            for (name, value) in map {
                if let Some(flag) = settings.flags.get_mut(name) {
                    *flag = truthy(value);
                }
            }
        }
        settings
    }

    pub fn active_count(&self) -> usize {
        self.flags.values().filter(|enabled| **enabled).count()
    }

    pub fn total_count(&self) -> usize {
        self.flags.len()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(&self.flags).unwrap_or(JsonValue::Null)
    }
}

/// Active/total summary shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeatureCounts {
    pub active: usize,
    pub total: usize,
}

impl From<&FeatureSettings> for FeatureCounts {
    fn from(settings: &FeatureSettings) -> Self {
        Self {
            active: settings.active_count(),
            total: settings.total_count(),
        }
    }
}

/// Current flags, falling back to defaults when nothing was saved yet.
pub async fn load(repo: &SettingsRepository) -> Result<FeatureSettings, PipelineError> {
    Ok(repo
        .get(FEATURE_SETTINGS_KEY)
        .await?
        .map(|stored| FeatureSettings::from_stored(&stored))
        .unwrap_or_default())
}

/// Normalize and persist a submitted flag map.
pub async fn save(
    repo: &SettingsRepository,
    submitted: &JsonValue,
) -> Result<FeatureSettings, PipelineError> {
    let settings = FeatureSettings::from_submission(submitted);
    repo.save(FEATURE_SETTINGS_KEY, settings.to_json()).await?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enabled(settings: &FeatureSettings, name: &str) -> bool {
        settings.to_json()[name] == json!(true)
    }

    #[test]
    fn defaults_have_five_active_of_twenty() {
        let settings = FeatureSettings::default();
        assert_eq!(settings.total_count(), 20);
        assert_eq!(settings.active_count(), 5);
        assert!(enabled(&settings, "custom_css"));
        assert!(!enabled(&settings, "ai_chatbot"));
    }

    #[test]
    fn submission_keeps_known_keys_and_zeroes_missing() {
        let settings = FeatureSettings::from_submission(&json!({
            "ai_chatbot": "1",
            "quick_buy": true,
            "heatmap_tracking": 0,
            "not_a_flag": true,
        }));

        assert!(enabled(&settings, "ai_chatbot"));
        assert!(enabled(&settings, "quick_buy"));
        assert!(!enabled(&settings, "heatmap_tracking"));
        assert!(!enabled(&settings, "retro_effects"));
        assert!(settings.to_json().get("not_a_flag").is_none());
        assert_eq!(settings.total_count(), 20);
        assert_eq!(settings.active_count(), 2);
    }

    #[test]
    fn truthiness_follows_loose_casting() {
        assert!(truthy(&json!("on")));
        assert!(truthy(&json!(2)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!("0")));
        assert!(!truthy(&json!(null)));
    }

    #[test]
    fn stored_blob_overlays_defaults() {
        let settings = FeatureSettings::from_stored(&json!({"retro_effects": false, "bogus": true}));
        assert!(!enabled(&settings, "retro_effects"));
        assert!(enabled(&settings, "custom_css"));
        assert_eq!(settings.total_count(), 20);
    }

    #[test]
    fn counts_summary() {
        let counts = FeatureCounts::from(&FeatureSettings::default());
        assert_eq!(counts, FeatureCounts { active: 5, total: 20 });
    }
}
