//! Heatmap CLI - applies heatmap shading to HTML tables

// Global invariants enforced:
// - The input document is never modified in place unless --output names it
// - Identical input yields byte-for-byte identical output

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use heatmap_core::config::{self, Overrides, ResolvedConfig};
use heatmap_core::{
    apply_heatmap_html, apply_to_file, heatmap_color, plan_columns, ColumnRule, ColumnSpec,
    HeatmapMode, HeatmapSummary, InvalidValuePolicy, TableDocument, TableSelector,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "heatmap")]
#[command(about = "Apply signed heatmap shading to HTML table cells")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Color the selected table and write the document
    Apply {
        /// HTML document to read ("-" for stdin)
        input: PathBuf,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a summary of the run to stderr
        #[arg(long)]
        summary: Option<OutputFormat>,

        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Print the resolved column plan without rewriting anything
    Plan {
        /// HTML document to read ("-" for stdin)
        input: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Print the color expression for a single value
    Color {
        /// Raw value
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// Normalize by this maximum before coloring
        #[arg(long, allow_negative_numbers = true)]
        max: Option<f64>,
    },
}

/// Flags shared by commands that read a document (all override the config file)
#[derive(Args)]
struct SelectionArgs {
    /// Path to config file (default: auto-discover next to the input)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the column plan comes from
    #[arg(long)]
    mode: Option<ModeArg>,

    /// Column as <index|label>[=max][@neighbor]; repeatable
    #[arg(long = "column", value_parser = parse_column_spec)]
    columns: Vec<ColumnSpec>,

    /// Select the table by id attribute
    #[arg(long, conflicts_with = "table_index")]
    table_id: Option<String>,

    /// Select the nth table in the document (zero-based)
    #[arg(long)]
    table_index: Option<usize>,

    /// Handling of non-numeric cell values
    #[arg(long)]
    invalid_values: Option<InvalidArg>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Annotated,
    Diff,
    Scale,
    FixedIndex,
}

impl From<ModeArg> for HeatmapMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Annotated => HeatmapMode::Annotated,
            ModeArg::Diff => HeatmapMode::Diff,
            ModeArg::Scale => HeatmapMode::Scale,
            ModeArg::FixedIndex => HeatmapMode::FixedIndex,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum InvalidArg {
    Skip,
    ZeroIntensity,
}

impl From<InvalidArg> for InvalidValuePolicy {
    fn from(policy: InvalidArg) -> Self {
        match policy {
            InvalidArg::Skip => InvalidValuePolicy::Skip,
            InvalidArg::ZeroIntensity => InvalidValuePolicy::ZeroIntensity,
        }
    }
}

fn parse_column_spec(s: &str) -> Result<ColumnSpec, String> {
    s.parse::<ColumnSpec>().map_err(|e| format!("{:#}", e))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            input,
            output,
            summary,
            selection,
        } => {
            let resolved = resolve_config(&input, &selection)?;

            let (html, stats) = if is_stdin(&input) {
                let source = read_stdin()?;
                apply_heatmap_html(&source, &resolved.table, &resolved.heatmap)?
            } else {
                apply_to_file(&input, &resolved.table, &resolved.heatmap)?
            };

            match &output {
                Some(path) => {
                    std::fs::write(path, &html)
                        .with_context(|| format!("failed to write output: {}", path.display()))?;
                    info!(path = %path.display(), "heatmap written");
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(html.as_bytes())?;
                    stdout.flush()?;
                }
            }

            info!(
                rows = stats.rows,
                styled = stats.styled,
                neighbors = stats.neighbors,
                missing = stats.missing,
                invalid = stats.invalid,
                out_of_range = stats.out_of_range,
                "heatmap applied"
            );

            if let Some(format) = summary {
                eprint!("{}", render_summary(&stats, format)?);
            }
        }
        Commands::Plan {
            input,
            format,
            selection,
        } => {
            let resolved = resolve_config(&input, &selection)?;

            let source = if is_stdin(&input) {
                read_stdin()?
            } else {
                std::fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read file: {}", input.display()))?
            };
            let document = TableDocument::parse(&source, &resolved.table)?;
            let rules = plan_columns(&document.table().headers, &resolved.heatmap)?;

            match format {
                OutputFormat::Text => print!("{}", render_plan_text(&rules, document.table())),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rules)?),
            }
        }
        Commands::Color { value, max } => {
            let normalized = match max {
                Some(m) if !m.is_finite() || m == 0.0 => {
                    anyhow::bail!("--max must be finite and non-zero (got {})", m);
                }
                Some(m) => value / m,
                None => value,
            };
            println!("{}", heatmap_color(normalized));
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn is_stdin(input: &Path) -> bool {
    input.as_os_str() == "-"
}

fn read_stdin() -> anyhow::Result<String> {
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .context("failed to read stdin")?;
    Ok(source)
}

/// Load the config file for the input and apply CLI overrides
fn resolve_config(input: &Path, selection: &SelectionArgs) -> anyhow::Result<ResolvedConfig> {
    let dir = if is_stdin(input) {
        std::env::current_dir()?
    } else {
        if !input.exists() {
            anyhow::bail!("Path does not exist: {}", input.display());
        }
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or(std::env::current_dir()?)
    };

    let mut resolved = config::load_and_resolve(&dir, selection.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(config_path) = &resolved.config_path {
        info!(path = %config_path.display(), "using config");
    }

    // CLI flags override config file values
    let table = match (&selection.table_id, selection.table_index) {
        (Some(id), _) => Some(TableSelector::Id(id.clone())),
        (None, Some(index)) => Some(TableSelector::Index(index)),
        (None, None) => None,
    };
    resolved.apply_overrides(&Overrides {
        mode: selection.mode.map(Into::into),
        columns: selection.columns.clone(),
        invalid_values: selection.invalid_values.map(Into::into),
        table,
    })?;

    Ok(resolved)
}

fn render_plan_text(rules: &[ColumnRule], table: &heatmap_core::Table) -> String {
    let mut output = format!("{:<8} {:<8} {:<10} {:<10} {}\n", "KIND", "COLUMN", "MAX", "NEIGHBOR", "LABEL");

    for rule in rules {
        let max = match rule {
            ColumnRule::Scale { max, .. } => format!("{}", max),
            ColumnRule::Fixed { max: Some(max), .. } => format!("{}", max),
            _ => "-".to_string(),
        };
        let neighbor = rule
            .neighbor()
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        let label = table
            .headers
            .get(rule.index())
            .map_or("", |h| h.label.as_str());

        output.push_str(&format!(
            "{:<8} {:<8} {:<10} {:<10} {}\n",
            rule.kind(),
            rule.index(),
            max,
            neighbor,
            label
        ));
    }

    output
}

fn render_summary(stats: &HeatmapSummary, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Text => format!(
            "rows: {}\nstyled: {}\nneighbors: {}\nmissing: {}\ninvalid: {}\nout of range: {}\n",
            stats.rows, stats.styled, stats.neighbors, stats.missing, stats.invalid, stats.out_of_range
        ),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(stats)?),
    })
}
