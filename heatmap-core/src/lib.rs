//! Heatmap core library - signed heatmap shading for HTML table cells

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Rendering is strictly per-row; rows never influence each other
// - No global mutable state
// - No randomness, clocks, threads, or async
// - The only table mutation is a cell's background
// - Identical input yields byte-for-byte identical output

pub mod color;
pub mod config;
pub mod heatmap;
pub mod html;
pub mod table;

pub use color::{heatmap_color, HeatmapColor, Palette};
pub use config::ResolvedConfig;
pub use heatmap::{
    apply_heatmap, plan_columns, ColumnRef, ColumnRule, ColumnSpec, HeatmapConfig, HeatmapMode,
    HeatmapSummary, InvalidValuePolicy,
};
pub use html::{apply_heatmap_html, TableDocument, TableSelector};
pub use table::{Cell, HeaderCell, Row, Table};

use anyhow::{Context, Result};
use std::path::Path;

/// Apply the heatmap to an HTML file, returning the rewritten document
pub fn apply_to_file(
    path: &Path,
    selector: &TableSelector,
    config: &HeatmapConfig,
) -> Result<(String, HeatmapSummary)> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    apply_heatmap_html(&source, selector, config)
        .with_context(|| format!("Failed to apply heatmap to: {}", path.display()))
}
