//! Expansion configuration.
//!
//! An optional YAML file per expansion; every key has a default and CLI flags
//! override whatever the file says.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::manual_queue::{QueueParams, Rounding};

pub const DEFAULT_EXPANSION: &str = "I";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeckSettings {
    /// Target deck size; 0 takes the whole valid pool.
    pub limit: usize,
    /// Cards allowed per album key; 0 disables the cap.
    pub max_per_album: usize,
    pub year_confidence_min: f64,
    pub manual_year_alpha: f64,
    pub manual_year_rounding: Rounding,
    pub manual_year_min_k: usize,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            limit: 300,
            max_per_album: 3,
            year_confidence_min: 0.8,
            manual_year_alpha: 0.67,
            manual_year_rounding: Rounding::Round,
            manual_year_min_k: 2,
        }
    }
}

impl DeckSettings {
    pub fn queue_params(&self) -> QueueParams {
        QueueParams {
            year_confidence_min: self.year_confidence_min,
            alpha: self.manual_year_alpha,
            rounding: self.manual_year_rounding,
            min_k: self.manual_year_min_k,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub expansion: String,
    pub deck: DeckSettings,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            expansion: DEFAULT_EXPANSION.to_string(),
            deck: DeckSettings::default(),
        }
    }
}

/// CLI values that win over the file when present.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub expansion: Option<String>,
    pub limit: Option<usize>,
    pub max_per_album: Option<usize>,
    pub year_confidence_min: Option<f64>,
    pub manual_year_alpha: Option<f64>,
    pub manual_year_rounding: Option<Rounding>,
    pub manual_year_min_k: Option<usize>,
}

impl ExpansionConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: ExpansionConfig =
            serde_yaml::from_str(text).context("Failed to parse expansion config")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Defaults when no path is given.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(expansion) = overrides.expansion {
            self.expansion = expansion;
        }
        let deck = &mut self.deck;
        if let Some(v) = overrides.limit {
            deck.limit = v;
        }
        if let Some(v) = overrides.max_per_album {
            deck.max_per_album = v;
        }
        if let Some(v) = overrides.year_confidence_min {
            deck.year_confidence_min = v;
        }
        if let Some(v) = overrides.manual_year_alpha {
            deck.manual_year_alpha = v;
        }
        if let Some(v) = overrides.manual_year_rounding {
            deck.manual_year_rounding = v;
        }
        if let Some(v) = overrides.manual_year_min_k {
            deck.manual_year_min_k = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ExpansionConfig::from_yaml(
            "expansion: II\ndeck:\n  limit: 120\n  manual_year_rounding: ceil\n",
        )
        .unwrap();
        assert_eq!(config.expansion, "II");
        assert_eq!(config.deck.limit, 120);
        assert_eq!(config.deck.manual_year_rounding, Rounding::Ceil);
        assert_eq!(config.deck.max_per_album, 3);
        assert_eq!(config.deck.year_confidence_min, 0.8);
    }

    #[test]
    fn test_empty_mapping_is_default() {
        let config = ExpansionConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ExpansionConfig::default());
    }

    #[test]
    fn test_bad_rounding_is_rejected() {
        assert!(ExpansionConfig::from_yaml("deck:\n  manual_year_rounding: nearest\n").is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = ExpansionConfig::from_yaml("deck:\n  limit: 120\n").unwrap();
        config.apply(ConfigOverrides {
            limit: Some(50),
            max_per_album: Some(0),
            ..Default::default()
        });
        assert_eq!(config.deck.limit, 50);
        assert_eq!(config.deck.max_per_album, 0);
        assert_eq!(config.expansion, "I");
    }
}
