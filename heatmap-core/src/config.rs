//! Configuration file support
//!
//! Loads heatmap configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.heatmaprc.json` next to the input document
//! 3. `heatmap.config.json` next to the input document
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::color::Palette;
use crate::heatmap::{ColumnSpec, HeatmapConfig, HeatmapMode, InvalidValuePolicy};
use crate::html::TableSelector;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: &[&str] = &[".heatmaprc.json", "heatmap.config.json"];

/// Heatmap configuration as written in a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Where the column plan comes from (default: annotated)
    #[serde(default)]
    pub mode: Option<HeatmapMode>,

    /// Explicit columns (required for every mode except annotated)
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,

    /// Handling of non-numeric cell values (default: skip)
    #[serde(default)]
    pub invalid_values: Option<InvalidValuePolicy>,

    /// Endpoint colors and interpolation space
    #[serde(default)]
    pub palette: Option<PaletteConfig>,

    /// Which table of the document to render
    #[serde(default)]
    pub table: Option<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaletteConfig {
    /// Color for positive values (default: #84cc16)
    pub positive: Option<String>,
    /// Color for zero and negative values (default: #fb7185)
    pub negative: Option<String>,
    /// `color-mix()` interpolation space (default: srgb)
    pub color_space: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub id: Option<String>,
    pub index: Option<usize>,
}

/// Settings layered over a resolved config, typically from CLI flags
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<HeatmapMode>,
    /// Replaces the configured columns when non-empty
    pub columns: Vec<ColumnSpec>,
    pub invalid_values: Option<InvalidValuePolicy>,
    pub table: Option<TableSelector>,
}

/// Resolved configuration ready for use
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub heatmap: HeatmapConfig,
    pub table: TableSelector,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl ConfigFile {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref table) = self.table {
            if table.id.is_some() && table.index.is_some() {
                anyhow::bail!("table.id and table.index are mutually exclusive");
            }
            if let Some(ref id) = table.id {
                if id.trim().is_empty() {
                    anyhow::bail!("table.id must not be empty");
                }
            }
        }

        self.heatmap_config().validate()
    }

    /// Resolve config into the renderer and selector settings
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let table = match &self.table {
            Some(TableConfig { id: Some(id), .. }) => TableSelector::Id(id.clone()),
            Some(TableConfig { index: Some(index), .. }) => TableSelector::Index(*index),
            _ => TableSelector::default(),
        };

        Ok(ResolvedConfig {
            heatmap: self.heatmap_config(),
            table,
            config_path: None,
        })
    }

    fn heatmap_config(&self) -> HeatmapConfig {
        let defaults = Palette::default();
        let palette = match &self.palette {
            Some(p) => Palette {
                positive: p.positive.clone().unwrap_or(defaults.positive),
                negative: p.negative.clone().unwrap_or(defaults.negative),
                color_space: p.color_space.clone().unwrap_or(defaults.color_space),
            },
            None => defaults,
        };

        HeatmapConfig {
            mode: self.mode.unwrap_or_default(),
            columns: self.columns.clone(),
            invalid_values: self.invalid_values.unwrap_or_default(),
            palette,
        }
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        ConfigFile::default().resolve()
    }

    /// Layer overrides on top of this config and re-validate
    ///
    /// - An explicit annotated mode drops configured columns unless new ones are given
    /// - Columns given without a mode turn annotated mode into fixed_index
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(mode) = overrides.mode {
            self.heatmap.mode = mode;
            if overrides.columns.is_empty() && mode == HeatmapMode::Annotated {
                self.heatmap.columns.clear();
            }
        }
        if !overrides.columns.is_empty() {
            self.heatmap.columns = overrides.columns.clone();
            if overrides.mode.is_none() && self.heatmap.mode == HeatmapMode::Annotated {
                self.heatmap.mode = HeatmapMode::FixedIndex;
            }
        }
        if let Some(policy) = overrides.invalid_values {
            self.heatmap.invalid_values = policy;
        }
        if let Some(table) = &overrides.table {
            self.table = table.clone();
        }

        self.heatmap.validate().context("invalid heatmap options")
    }
}

/// Discover and load a config file from a directory
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(dir: &Path) -> Result<Option<(ConfigFile, PathBuf)>> {
    for name in CONFIG_FILE_NAMES {
        let path = dir.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config for a document directory
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `dir`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(dir: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (ConfigFile::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{NEGATIVE_COLOR, POSITIVE_COLOR};
    use crate::heatmap::ColumnRef;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let resolved = ResolvedConfig::defaults().expect("default config should resolve");
        assert_eq!(resolved.heatmap, HeatmapConfig::default());
        assert_eq!(resolved.table, TableSelector::Index(0));
        assert!(resolved.config_path.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "mode": "fixed_index",
            "columns": [
                {"column": 3},
                {"column": "Total", "max": 120.5, "neighbor": 5}
            ],
            "invalid_values": "zero_intensity",
            "palette": {"positive": "green", "color_space": "oklab"},
            "table": {"id": "summary"}
        }"#;
        let config: ConfigFile = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();

        assert_eq!(resolved.heatmap.mode, HeatmapMode::FixedIndex);
        assert_eq!(resolved.heatmap.columns.len(), 2);
        assert_eq!(resolved.heatmap.columns[0].column, ColumnRef::Index(3));
        assert_eq!(
            resolved.heatmap.columns[1].column,
            ColumnRef::Label("Total".to_string())
        );
        assert_eq!(resolved.heatmap.columns[1].max, Some(120.5));
        assert_eq!(resolved.heatmap.columns[1].neighbor, Some(5));
        assert_eq!(resolved.heatmap.invalid_values, InvalidValuePolicy::ZeroIntensity);
        assert_eq!(resolved.heatmap.palette.positive, "green");
        assert_eq!(resolved.heatmap.palette.negative, NEGATIVE_COLOR);
        assert_eq!(resolved.heatmap.palette.color_space, "oklab");
        assert_eq!(resolved.table, TableSelector::Id("summary".to_string()));
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<ConfigFile, _> = serde_json::from_str(r#"{"unknown_field": true}"#);
        assert!(result.is_err());

        let result: Result<ConfigFile, _> =
            serde_json::from_str(r#"{"columns": [{"column": 1, "maximum": 2}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_unknown_mode() {
        let result: Result<ConfigFile, _> = serde_json::from_str(r#"{"mode": "rainbow"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_logical_errors() {
        let cases = [
            r#"{"mode": "scale", "columns": [{"column": 1}]}"#,
            r#"{"mode": "scale", "columns": [{"column": 1, "max": 0}]}"#,
            r#"{"mode": "diff"}"#,
            r#"{"columns": [{"column": 1}]}"#,
            r#"{"mode": "diff", "columns": [{"column": 2, "neighbor": 4}]}"#,
            r#"{"palette": {"negative": "red;"}}"#,
            r#"{"table": {"id": "a", "index": 1}}"#,
            r#"{"table": {"id": " "}}"#,
        ];
        for json in cases {
            let config: ConfigFile = serde_json::from_str(json).unwrap();
            assert!(config.validate().is_err(), "should reject {}", json);
        }
    }

    #[test]
    fn test_table_index() {
        let config: ConfigFile = serde_json::from_str(r#"{"table": {"index": 2}}"#).unwrap();
        assert_eq!(config.resolve().unwrap().table, TableSelector::Index(2));
    }

    #[test]
    fn test_discover_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".heatmaprc.json"),
            r#"{"invalid_values": "zero_intensity"}"#,
        )
        .unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.invalid_values, Some(InvalidValuePolicy::ZeroIntensity));
        assert!(path.ends_with(".heatmaprc.json"));
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();

        // Both files present - .heatmaprc.json should win
        fs::write(
            dir.path().join(".heatmaprc.json"),
            r#"{"palette": {"positive": "teal"}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("heatmap.config.json"),
            r#"{"palette": {"positive": "olive"}}"#,
        )
        .unwrap();

        let resolved = load_and_resolve(dir.path(), None).unwrap();
        assert_eq!(
            resolved.heatmap.palette.positive, "teal",
            ".heatmaprc.json should take priority"
        );
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());

        let resolved = load_and_resolve(dir.path(), None).unwrap();
        assert!(resolved.config_path.is_none());
        assert_eq!(resolved.heatmap.palette.positive, POSITIVE_COLOR);
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(
            &config_path,
            r#"{"mode": "diff", "columns": [{"column": 4}]}"#,
        )
        .unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.heatmap.mode, HeatmapMode::Diff);
        assert_eq!(resolved.config_path, Some(config_path));
    }

    #[test]
    fn test_override_columns_switch_annotated_to_fixed_index() {
        let mut resolved = ResolvedConfig::defaults().unwrap();
        resolved
            .apply_overrides(&Overrides {
                columns: vec!["3@4".parse().unwrap()],
                ..Overrides::default()
            })
            .unwrap();

        assert_eq!(resolved.heatmap.mode, HeatmapMode::FixedIndex);
        assert_eq!(resolved.heatmap.columns[0].neighbor, Some(4));
    }

    #[test]
    fn test_override_columns_keep_explicit_mode() {
        let config: ConfigFile =
            serde_json::from_str(r#"{"mode": "diff", "columns": [{"column": 1}]}"#).unwrap();
        let mut resolved = config.resolve().unwrap();
        resolved
            .apply_overrides(&Overrides {
                columns: vec!["5".parse().unwrap()],
                invalid_values: Some(InvalidValuePolicy::ZeroIntensity),
                table: Some(TableSelector::Id("summary".to_string())),
                ..Overrides::default()
            })
            .unwrap();

        assert_eq!(resolved.heatmap.mode, HeatmapMode::Diff);
        assert_eq!(resolved.heatmap.columns, vec![ColumnSpec::new(ColumnRef::Index(5))]);
        assert_eq!(resolved.heatmap.invalid_values, InvalidValuePolicy::ZeroIntensity);
        assert_eq!(resolved.table, TableSelector::Id("summary".to_string()));
    }

    #[test]
    fn test_override_annotated_mode_drops_configured_columns() {
        let config: ConfigFile =
            serde_json::from_str(r#"{"mode": "scale", "columns": [{"column": 1, "max": 10}]}"#).unwrap();
        let mut resolved = config.resolve().unwrap();
        resolved
            .apply_overrides(&Overrides {
                mode: Some(HeatmapMode::Annotated),
                ..Overrides::default()
            })
            .unwrap();

        assert_eq!(resolved.heatmap.mode, HeatmapMode::Annotated);
        assert!(resolved.heatmap.columns.is_empty());
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut resolved = ResolvedConfig::defaults().unwrap();
        let result = resolved.apply_overrides(&Overrides {
            mode: Some(HeatmapMode::Scale),
            columns: vec!["Count".parse().unwrap()],
            ..Overrides::default()
        });
        assert!(result.is_err());

        let mut resolved = ResolvedConfig::defaults().unwrap();
        let result = resolved.apply_overrides(&Overrides {
            mode: Some(HeatmapMode::Diff),
            ..Overrides::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("heatmap.config.json");
        fs::write(&config_path, r#"{"mode": "scale", "columns": [{"column": 1}]}"#).unwrap();

        let err = load_and_resolve(dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("heatmap.config.json"));
    }
}
