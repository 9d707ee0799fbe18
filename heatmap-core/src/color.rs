//! Heatmap color computation
//!
//! Maps a normalized value to a CSS `color-mix()` expression that blends a
//! sign-selected endpoint color with full transparency.
//!
//! Global invariants enforced:
//! - Input is clamped to [-1, 1] before any other step
//! - Endpoint strength is monotonic in |value| and never exceeds 100%
//! - Output is always a well-formed `color-mix()` expression

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint for strictly positive values (lime)
pub const POSITIVE_COLOR: &str = "#84cc16";

/// Endpoint for zero and negative values (rose)
pub const NEGATIVE_COLOR: &str = "#fb7185";

/// Interpolation space passed to `color-mix()`
pub const DEFAULT_COLOR_SPACE: &str = "srgb";

/// Endpoint colors and interpolation space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub positive: String,
    pub negative: String,
    pub color_space: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            positive: POSITIVE_COLOR.to_string(),
            negative: NEGATIVE_COLOR.to_string(),
            color_space: DEFAULT_COLOR_SPACE.to_string(),
        }
    }
}

impl Palette {
    /// Reject tokens that would break out of an inline `style` declaration
    pub fn validate(&self) -> Result<()> {
        for (name, token) in [
            ("positive", &self.positive),
            ("negative", &self.negative),
            ("color_space", &self.color_space),
        ] {
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("palette.{} must not be empty", name);
            }
            if token.contains([';', '"', '<', '>']) {
                anyhow::bail!("palette.{} contains a forbidden character (got {:?})", name, token);
            }
        }
        Ok(())
    }

    /// Compute the heatmap color for a normalized value
    ///
    /// NaN is treated as zero intensity so the expression stays well-formed.
    pub fn color(&self, value: f64) -> HeatmapColor {
        let clamped = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
        let endpoint = if clamped > 0.0 { &self.positive } else { &self.negative };

        HeatmapColor {
            endpoint: endpoint.trim().to_string(),
            percentage: clamped.abs() * 100.0,
            color_space: self.color_space.trim().to_string(),
        }
    }
}

/// A derived heatmap color, rendered through `Display`
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapColor {
    pub endpoint: String,
    /// Endpoint strength in [0, 100]
    pub percentage: f64,
    pub color_space: String,
}

impl fmt::Display for HeatmapColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "color-mix(in {}, {} {}%, transparent)",
            self.color_space,
            self.endpoint,
            format_percentage(self.percentage)
        )
    }
}

/// Heatmap color with the default palette
pub fn heatmap_color(value: f64) -> HeatmapColor {
    Palette::default().color(value)
}

/// Round to two decimals so float noise (0.4 * 100 = 40.00000000000001) stays out of the CSS
fn format_percentage(percentage: f64) -> String {
    let rounded = (percentage * 100.0).round() / 100.0;
    format!("{}", rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_tracks_magnitude() {
        for v in [-1.0, -0.75, -0.5, -0.25, 0.0, 0.25, 0.5, 0.75, 1.0] {
            let color = heatmap_color(v);
            assert!((color.percentage - v.abs() * 100.0).abs() < 1e-9, "v = {}", v);
        }
    }

    #[test]
    fn test_hue_is_positive_only_above_zero() {
        assert_eq!(heatmap_color(0.01).endpoint, POSITIVE_COLOR);
        assert_eq!(heatmap_color(0.0).endpoint, NEGATIVE_COLOR);
        assert_eq!(heatmap_color(-0.01).endpoint, NEGATIVE_COLOR);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(
            heatmap_color(1.0).to_string(),
            "color-mix(in srgb, #84cc16 100%, transparent)"
        );
        assert_eq!(
            heatmap_color(-1.0).to_string(),
            "color-mix(in srgb, #fb7185 100%, transparent)"
        );
        assert_eq!(
            heatmap_color(0.0).to_string(),
            "color-mix(in srgb, #fb7185 0%, transparent)"
        );
    }

    #[test]
    fn test_clamping() {
        assert_eq!(heatmap_color(2.0), heatmap_color(1.0));
        assert_eq!(heatmap_color(-5.0), heatmap_color(-1.0));
        assert_eq!(heatmap_color(f64::INFINITY), heatmap_color(1.0));
        assert_eq!(heatmap_color(f64::NEG_INFINITY), heatmap_color(-1.0));
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(
            heatmap_color(-0.4).to_string(),
            "color-mix(in srgb, #fb7185 40%, transparent)"
        );
        assert_eq!(
            heatmap_color(0.123456).to_string(),
            "color-mix(in srgb, #84cc16 12.35%, transparent)"
        );
    }

    #[test]
    fn test_nan_is_zero_intensity() {
        assert_eq!(heatmap_color(f64::NAN), heatmap_color(0.0));
    }

    #[test]
    fn test_custom_palette() {
        let palette = Palette {
            positive: "green".to_string(),
            negative: "red".to_string(),
            color_space: "oklch".to_string(),
        };
        palette.validate().unwrap();
        assert_eq!(
            palette.color(0.5).to_string(),
            "color-mix(in oklch, green 50%, transparent)"
        );
    }

    #[test]
    fn test_palette_rejects_style_breakout() {
        let palette = Palette {
            positive: "red; display: none".to_string(),
            ..Palette::default()
        };
        assert!(palette.validate().is_err());

        let palette = Palette {
            color_space: "  ".to_string(),
            ..Palette::default()
        };
        assert!(palette.validate().is_err());
    }
}
