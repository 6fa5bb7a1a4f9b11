use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Pipeline configuration, loaded from TOML. Every field has a default,
/// so a missing file or empty table is valid.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub grouping: GroupingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupingConfig {
    /// Maximum posts per block for chunked (non-threaded) streams.
    /// WhatsApp streams ignore this: one contact's history is one block.
    #[serde(default = "default_max_posts_per_block")]
    pub max_posts_per_block: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_posts_per_block: default_max_posts_per_block(),
        }
    }
}

fn default_max_posts_per_block() -> usize {
    40
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: PipelineConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.grouping.max_posts_per_block == 0 {
        anyhow::bail!("grouping.max_posts_per_block must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let config = PipelineConfig::default();
        assert_eq!(config.grouping.max_posts_per_block, 40);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: PipelineConfig =
            toml::from_str("[grouping]\nmax_posts_per_block = 25\n").unwrap();
        assert_eq!(config.grouping.max_posts_per_block, 25);
    }

    #[test]
    fn empty_toml_is_valid() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.grouping.max_posts_per_block, 40);
    }
}
