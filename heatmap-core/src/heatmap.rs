//! Heatmap renderer
//!
//! Builds a column plan from header annotations or explicit configuration,
//! then walks every body row applying heatmap colors to planned cells.
//!
//! Global invariants enforced:
//! - Rows are processed independently and in order
//! - Within a row, diff rules run before scale rules (later writes win)
//! - A cell without a raw value is never touched
//! - Neighbor access is bounds-checked; column 0 has no left neighbor
//! - The only mutation is `Cell::background`

use crate::color::Palette;
use crate::table::{HeaderCell, Row, Table};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Where the column plan comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapMode {
    /// Header `diff` / `scale_max` annotations
    #[default]
    Annotated,
    /// Every configured column is a diff column
    Diff,
    /// Every configured column is a scale column with an explicit max
    Scale,
    /// Every configured column is colored in place, optionally with one extra neighbor
    FixedIndex,
}

impl HeatmapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeatmapMode::Annotated => "annotated",
            HeatmapMode::Diff => "diff",
            HeatmapMode::Scale => "scale",
            HeatmapMode::FixedIndex => "fixed_index",
        }
    }
}

/// What to do with raw values that are not numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidValuePolicy {
    /// Leave the cell (and its neighbor) unstyled
    #[default]
    Skip,
    /// Style the cell with a 0% color
    ZeroIntensity,
}

/// A column addressed by zero-based index or by exact header label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Label(String),
}

impl ColumnRef {
    fn resolve(&self, headers: &[HeaderCell]) -> Result<usize> {
        match self {
            ColumnRef::Index(i) => Ok(*i),
            ColumnRef::Label(label) => headers
                .iter()
                .position(|h| h.label == *label)
                .ok_or_else(|| anyhow::anyhow!("no header labelled {:?}", label)),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "{}", i),
            ColumnRef::Label(label) => write!(f, "{:?}", label),
        }
    }
}

impl FromStr for ColumnRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("column reference must not be empty");
        }
        Ok(match s.parse::<usize>() {
            Ok(i) => ColumnRef::Index(i),
            Err(_) => ColumnRef::Label(s.to_string()),
        })
    }
}

/// One configured column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub column: ColumnRef,
    /// Normalization maximum (required in scale mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Extra index colored alongside (fixed_index mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbor: Option<usize>,
}

impl ColumnSpec {
    pub fn new(column: ColumnRef) -> Self {
        Self {
            column,
            max: None,
            neighbor: None,
        }
    }
}

impl FromStr for ColumnSpec {
    type Err = anyhow::Error;

    /// Parse `<index|label>[=max][@neighbor]`
    ///
    /// A suffix that does not parse as a number stays part of the label, so
    /// labels such as `C(scale=50)` still work.
    fn from_str(s: &str) -> Result<Self> {
        let mut rest = s.trim();

        let mut neighbor = None;
        if let Some((head, tail)) = rest.rsplit_once('@') {
            if let Ok(n) = tail.trim().parse::<usize>() {
                neighbor = Some(n);
                rest = head;
            }
        }

        let mut max = None;
        if let Some((head, tail)) = rest.rsplit_once('=') {
            if let Ok(m) = tail.trim().parse::<f64>() {
                max = Some(m);
                rest = head;
            }
        }

        let column = rest
            .parse::<ColumnRef>()
            .with_context(|| format!("invalid column spec: {:?}", s))?;

        Ok(Self {
            column,
            max,
            neighbor,
        })
    }
}

/// Renderer configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatmapConfig {
    pub mode: HeatmapMode,
    pub columns: Vec<ColumnSpec>,
    pub invalid_values: InvalidValuePolicy,
    pub palette: Palette,
}

impl HeatmapConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        self.palette.validate()?;

        match self.mode {
            HeatmapMode::Annotated => {
                if !self.columns.is_empty() {
                    anyhow::bail!("columns must be empty in annotated mode (got {})", self.columns.len());
                }
            }
            mode => {
                if self.columns.is_empty() {
                    anyhow::bail!("{} mode requires at least one column", mode.as_str());
                }
            }
        }

        for spec in &self.columns {
            if let Some(max) = spec.max {
                validate_max(max).with_context(|| format!("column {}", spec.column))?;
            }
            if self.mode == HeatmapMode::Scale && spec.max.is_none() {
                anyhow::bail!("column {} needs a max in scale mode", spec.column);
            }
            if spec.neighbor.is_some() && self.mode != HeatmapMode::FixedIndex {
                anyhow::bail!(
                    "column {}: neighbor is only valid in fixed_index mode (mode is {})",
                    spec.column,
                    self.mode.as_str()
                );
            }
        }

        Ok(())
    }
}

fn validate_max(max: f64) -> Result<()> {
    if !max.is_finite() || max == 0.0 {
        anyhow::bail!("max must be finite and non-zero (got {})", max);
    }
    Ok(())
}

/// A resolved per-column coloring rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnRule {
    Diff {
        index: usize,
    },
    Scale {
        index: usize,
        max: f64,
    },
    Fixed {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        neighbor: Option<usize>,
    },
}

impl ColumnRule {
    pub fn index(&self) -> usize {
        match self {
            ColumnRule::Diff { index }
            | ColumnRule::Scale { index, .. }
            | ColumnRule::Fixed { index, .. } => *index,
        }
    }

    /// Extra cell that receives the same color
    pub fn neighbor(&self) -> Option<usize> {
        match self {
            ColumnRule::Diff { index } => index.checked_sub(1),
            ColumnRule::Scale { .. } => None,
            ColumnRule::Fixed { neighbor, .. } => *neighbor,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnRule::Diff { .. } => "diff",
            ColumnRule::Scale { .. } => "scale",
            ColumnRule::Fixed { .. } => "fixed",
        }
    }

    fn normalize(&self, raw: f64) -> f64 {
        match self {
            ColumnRule::Diff { .. } => raw,
            ColumnRule::Scale { max, .. } => raw / max,
            ColumnRule::Fixed { max, .. } => max.map_or(raw, |m| raw / m),
        }
    }
}

/// Counts gathered while rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeatmapSummary {
    pub rows: usize,
    /// Planned cells that received a color
    pub styled: usize,
    /// Neighbor cells that received a copy of a color
    pub neighbors: usize,
    /// Planned cells without a raw value
    pub missing: usize,
    /// Planned cells whose raw value is not a number
    pub invalid: usize,
    /// Planned or neighbor cells that do not exist in their row
    pub out_of_range: usize,
}

/// Build the column plan for a header row
///
/// Annotated mode yields all diff rules (header order) followed by all scale
/// rules (header order). Scale markers with an unusable max are ignored.
pub fn plan_columns(headers: &[HeaderCell], config: &HeatmapConfig) -> Result<Vec<ColumnRule>> {
    let mut rules = Vec::new();

    match config.mode {
        HeatmapMode::Annotated => {
            for (index, header) in headers.iter().enumerate() {
                if header.diff {
                    rules.push(ColumnRule::Diff { index });
                }
            }
            for (index, header) in headers.iter().enumerate() {
                if let Some(max) = header.scale_max {
                    if let Err(e) = validate_max(max) {
                        warn!(column = index, label = %header.label, "ignoring scale marker: {}", e);
                        continue;
                    }
                    rules.push(ColumnRule::Scale { index, max });
                }
            }
        }
        mode => {
            for spec in &config.columns {
                let index = spec.column.resolve(headers)?;
                let rule = match mode {
                    HeatmapMode::Diff => ColumnRule::Diff { index },
                    HeatmapMode::Scale => {
                        let max = spec
                            .max
                            .ok_or_else(|| anyhow::anyhow!("column {} needs a max in scale mode", spec.column))?;
                        validate_max(max).with_context(|| format!("column {}", spec.column))?;
                        ColumnRule::Scale { index, max }
                    }
                    _ => ColumnRule::Fixed {
                        index,
                        max: spec.max,
                        neighbor: spec.neighbor,
                    },
                };
                rules.push(rule);
            }
        }
    }

    for rule in &rules {
        debug!(kind = rule.kind(), column = rule.index(), neighbor = ?rule.neighbor(), "planned column");
    }

    Ok(rules)
}

/// Apply the heatmap to a table in place
pub fn apply_heatmap(table: &mut Table, config: &HeatmapConfig) -> Result<HeatmapSummary> {
    let rules = plan_columns(&table.headers, config)?;
    Ok(apply_rules(table, &rules, config))
}

/// Apply an already-built plan to every body row
pub fn apply_rules(table: &mut Table, rules: &[ColumnRule], config: &HeatmapConfig) -> HeatmapSummary {
    let mut summary = HeatmapSummary {
        rows: table.rows.len(),
        ..HeatmapSummary::default()
    };

    for (row_index, row) in table.rows.iter_mut().enumerate() {
        for rule in rules {
            apply_rule(row, row_index, rule, config, &mut summary);
        }
    }

    summary
}

fn apply_rule(
    row: &mut Row,
    row_index: usize,
    rule: &ColumnRule,
    config: &HeatmapConfig,
    summary: &mut HeatmapSummary,
) {
    let index = rule.index();

    let Some(cell) = row.cells.get(index) else {
        summary.out_of_range += 1;
        return;
    };
    let Some(raw) = cell.value.as_deref() else {
        summary.missing += 1;
        return;
    };

    let value = match parse_value(raw) {
        Some(v) => rule.normalize(v),
        None => {
            summary.invalid += 1;
            debug!(row = row_index, column = index, raw, "non-numeric cell value");
            match config.invalid_values {
                InvalidValuePolicy::Skip => return,
                InvalidValuePolicy::ZeroIntensity => 0.0,
            }
        }
    };

    let color = config.palette.color(value).to_string();

    if let Some(neighbor) = rule.neighbor() {
        match row.cells.get_mut(neighbor) {
            Some(cell) => {
                cell.background = Some(color.clone());
                summary.neighbors += 1;
            }
            None => summary.out_of_range += 1,
        }
    }

    if let Some(cell) = row.cells.get_mut(index) {
        cell.background = Some(color);
        summary.styled += 1;
    }
}

/// Parse a raw cell value; NaN is not a usable number
fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}
