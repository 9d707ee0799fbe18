//! HTML adapter
//!
//! Extracts one table from an HTML document into the typed model and writes
//! the document back with updated cell `style` attributes.
//!
//! Global invariants enforced:
//! - Only start tags of cells whose background changed are rewritten
//! - Every other byte of the document is copied through unchanged
//! - Nested tables are opaque to the selected table
//!
//! The input must be markup of the kind template engines emit: balanced
//! table tags and quoted or bare attribute values.

use crate::heatmap::{self, HeatmapConfig, HeatmapSummary};
use crate::table::{Cell, HeaderCell, Row, Table};
use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fmt;
use tracing::{debug, warn};

const DIFF_ATTR: &[u8] = b"data-diff";
const SCALE_ATTR: &[u8] = b"data-colorize";
const VALUE_ATTR: &[u8] = b"data-value";
const STYLE_ATTR: &[u8] = b"style";
const ID_ATTR: &[u8] = b"id";
const BACKGROUND_PROPERTY: &str = "background-color";

/// Which `<table>` of the document to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelector {
    /// Nth `<table>` in document order, zero-based
    Index(usize),
    /// Table whose `id` attribute matches exactly
    Id(String),
}

impl Default for TableSelector {
    fn default() -> Self {
        TableSelector::Index(0)
    }
}

impl fmt::Display for TableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSelector::Index(i) => write!(f, "table #{}", i),
            TableSelector::Id(id) => write!(f, "table with id {:?}", id),
        }
    }
}

impl TableSelector {
    fn matches(&self, position: usize, tag: &BytesStart) -> Result<bool> {
        match self {
            TableSelector::Index(i) => Ok(*i == position),
            TableSelector::Id(id) => Ok(attribute(tag, ID_ATTR)?.as_deref() == Some(id.as_str())),
        }
    }
}

/// Location of a body cell's start tag in the source document
#[derive(Debug, Clone)]
struct CellTag {
    start: usize,
    end: usize,
    empty: bool,
    tag: BytesStart<'static>,
    /// Background found in the source `style` attribute
    initial: Option<String>,
}

/// An HTML document with one table lifted into the model
#[derive(Debug, Clone)]
pub struct TableDocument {
    source: String,
    table: Table,
    tags: Vec<Vec<CellTag>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Directly inside `<table>`
    Bare,
    Head,
    Body,
    Other,
}

#[derive(Default)]
struct PendingRow {
    cells: Vec<Cell>,
    tags: Vec<CellTag>,
}

impl TableDocument {
    /// Parse a document and extract the selected table
    pub fn parse(source: &str, selector: &TableSelector) -> Result<Self> {
        // Reader positions do not count a leading byte order mark
        let body = source.strip_prefix('\u{feff}').unwrap_or(source);
        let offset = source.len() - body.len();

        let mut reader = Reader::from_str(body);
        reader.check_end_names(false);

        let mut table = Table::default();
        let mut tags = Vec::new();

        let mut tables_seen = 0usize;
        // 0 = outside the selected table, 1 = directly inside, >1 = nested table
        let mut depth = 0usize;
        let mut found = false;
        let mut section = Section::Bare;
        let mut tbodies_seen = 0usize;
        let mut row: Option<PendingRow> = None;
        let mut label: Option<String> = None;

        loop {
            let event = reader
                .read_event()
                .with_context(|| format!("malformed markup near byte {}", reader.buffer_position()))?;
            let end = reader.buffer_position();
            let opening = matches!(event, Event::Start(_));

            match event {
                Event::Eof => break,
                Event::Start(e) | Event::Empty(e) if depth > 1 || !is_table_tag(&e) => {
                    if depth > 1 && opening && e.name().as_ref().eq_ignore_ascii_case(b"table") {
                        depth += 1;
                    }
                }
                Event::Start(e) => {
                    let name = e.name().as_ref().to_ascii_lowercase();
                    match name.as_slice() {
                        b"table" => {
                            if depth == 1 {
                                depth += 1;
                            } else if !found {
                                if selector.matches(tables_seen, &e)? {
                                    depth = 1;
                                    found = true;
                                }
                                tables_seen += 1;
                            }
                        }
                        _ if depth != 1 => {}
                        b"thead" => section = Section::Head,
                        b"tbody" => {
                            section = if tbodies_seen == 0 { Section::Body } else { Section::Other };
                            tbodies_seen += 1;
                        }
                        b"tfoot" => section = Section::Other,
                        b"tr" => {
                            finish_row(&mut row, &mut table, &mut tags);
                            if section == Section::Body || (section == Section::Bare && tbodies_seen == 0) {
                                row = Some(PendingRow::default());
                            }
                        }
                        b"th" | b"td" => {
                            if section == Section::Head && name == b"th" {
                                finish_header(&mut label, &mut table);
                                table.headers.push(header_cell(&e)?);
                                label = Some(String::new());
                            } else if let Some(pending) = row.as_mut() {
                                push_cell(pending, e, body, end, false)?;
                            }
                        }
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if depth != 1 {
                        continue;
                    }
                    let name = e.name().as_ref().to_ascii_lowercase();
                    if name == b"th" && section == Section::Head {
                        finish_header(&mut label, &mut table);
                        table.headers.push(header_cell(&e)?);
                    } else if name == b"th" || name == b"td" {
                        if let Some(pending) = row.as_mut() {
                            push_cell(pending, e, body, end, true)?;
                        }
                    }
                }
                Event::Text(text) => {
                    if depth == 1 {
                        if let Some(label) = label.as_mut() {
                            match text.unescape() {
                                Ok(t) => label.push_str(&t),
                                Err(_) => label.push_str(&String::from_utf8_lossy(&text)),
                            }
                        }
                    }
                }
                Event::End(e) => {
                    let name = e.name().as_ref().to_ascii_lowercase();
                    match name.as_slice() {
                        b"table" if depth > 1 => depth -= 1,
                        b"table" if depth == 1 => {
                            finish_header(&mut label, &mut table);
                            finish_row(&mut row, &mut table, &mut tags);
                            depth = 0;
                        }
                        _ if depth != 1 => {}
                        b"thead" | b"tbody" | b"tfoot" => {
                            finish_header(&mut label, &mut table);
                            finish_row(&mut row, &mut table, &mut tags);
                            section = Section::Bare;
                        }
                        b"tr" => finish_row(&mut row, &mut table, &mut tags),
                        b"th" | b"td" => finish_header(&mut label, &mut table),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if !found {
            anyhow::bail!("no {} found in document", selector);
        }
        // Unterminated table: keep what was collected
        finish_header(&mut label, &mut table);
        finish_row(&mut row, &mut table, &mut tags);

        for tag in tags.iter_mut().flatten() {
            tag.start += offset;
            tag.end += offset;
        }

        debug!(
            headers = table.headers.len(),
            rows = table.rows.len(),
            "extracted {}",
            selector
        );

        Ok(Self {
            source: source.to_string(),
            table,
            tags,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    /// Render the document with every changed cell background written back
    pub fn render(&self) -> Result<String> {
        let mut output = String::with_capacity(self.source.len() + self.source.len() / 4);
        let mut cursor = 0usize;

        for (row, tags) in self.table.rows.iter().zip(&self.tags) {
            for (cell, tag) in row.cells.iter().zip(tags) {
                if cell.background == tag.initial {
                    continue;
                }
                output.push_str(&self.source[cursor..tag.start]);
                output.push_str(&restyle(tag, cell.background.as_deref())?);
                cursor = tag.end;
            }
        }
        output.push_str(&self.source[cursor..]);

        Ok(output)
    }
}

/// Parse, apply the heatmap, and render in one step
pub fn apply_heatmap_html(
    source: &str,
    selector: &TableSelector,
    config: &HeatmapConfig,
) -> Result<(String, HeatmapSummary)> {
    let mut document = TableDocument::parse(source, selector)?;
    let summary = heatmap::apply_heatmap(document.table_mut(), config)?;
    let html = document.render()?;
    Ok((html, summary))
}

fn is_table_tag(tag: &BytesStart) -> bool {
    const TABLE_TAGS: &[&[u8]] = &[b"table", b"thead", b"tbody", b"tfoot", b"tr", b"th", b"td"];
    let name = tag.name();
    TABLE_TAGS.iter().any(|t| name.as_ref().eq_ignore_ascii_case(t))
}

fn finish_header(label: &mut Option<String>, table: &mut Table) {
    if let Some(text) = label.take() {
        if let Some(header) = table.headers.last_mut() {
            header.label = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }
}

fn finish_row(row: &mut Option<PendingRow>, table: &mut Table, tags: &mut Vec<Vec<CellTag>>) {
    if let Some(pending) = row.take() {
        table.rows.push(Row { cells: pending.cells });
        tags.push(pending.tags);
    }
}

fn header_cell(tag: &BytesStart) -> Result<HeaderCell> {
    // Empty marker values do not count, matching dataset truthiness
    let diff = attribute(tag, DIFF_ATTR)?.is_some_and(|v| !v.is_empty());

    let scale_max = match attribute(tag, SCALE_ATTR)?.filter(|v| !v.is_empty()) {
        Some(raw) => match leading_number(&raw) {
            Some(max) => Some(max),
            None => {
                warn!(value = %raw, "ignoring non-numeric data-colorize marker");
                None
            }
        },
        None => None,
    };

    Ok(HeaderCell {
        label: String::new(),
        diff,
        scale_max,
    })
}

/// Longest decimal literal at the start of `raw`, so `"50px"` reads as 50
fn leading_number(raw: &str) -> Option<f64> {
    let text = raw.trim_start();
    let bytes = text.as_bytes();
    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let whole = digits(end);
    end += whole;
    let mut fraction = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction = digits(end + 1);
        if whole > 0 || fraction > 0 {
            end += 1 + fraction;
        }
    }
    if whole == 0 && fraction == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent = digits(end + 1 + sign);
        if exponent > 0 {
            end += 1 + sign + exponent;
        }
    }

    text[..end].parse().ok()
}

fn push_cell(pending: &mut PendingRow, tag: BytesStart, source: &str, end: usize, empty: bool) -> Result<()> {
    // Raw tag bytes exclude `<` and `>` (and `/` for self-closing tags)
    let len = tag.len() + if empty { 3 } else { 2 };
    let start = end
        .checked_sub(len)
        .filter(|&s| source.as_bytes().get(s) == Some(&b'<'))
        .ok_or_else(|| anyhow::anyhow!("could not locate cell tag ending at byte {}", end))?;

    let style = attribute(&tag, STYLE_ATTR)?;
    let initial = style.as_deref().and_then(style_background);

    pending.cells.push(Cell {
        value: attribute(&tag, VALUE_ATTR)?,
        background: initial.clone(),
    });
    pending.tags.push(CellTag {
        start,
        end,
        empty,
        tag: tag.into_owned(),
        initial,
    });

    Ok(())
}

/// Look up an attribute by case-insensitive name, unescaping when possible
fn attribute(tag: &BytesStart, name: &[u8]) -> Result<Option<String>> {
    // Duplicates are tolerated; the first occurrence wins
    let mut attributes = tag.html_attributes();
    attributes.with_checks(false);
    for attr in attributes {
        let attr = attr.context("malformed attribute")?;
        if attr.key.as_ref().eq_ignore_ascii_case(name) {
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Rebuild a cell start tag with a new background declaration
fn restyle(cell: &CellTag, background: Option<&str>) -> Result<String> {
    let name = String::from_utf8_lossy(cell.tag.name().as_ref()).into_owned();
    let mut tag = BytesStart::new(name);
    let mut styled = false;

    let mut attributes = cell.tag.html_attributes();
    attributes.with_checks(false);
    for attr in attributes {
        let attr = attr.context("malformed attribute")?;
        if attr.key.as_ref().eq_ignore_ascii_case(STYLE_ATTR) && !styled {
            let current = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            let style = set_background(&current, background);
            if !style.is_empty() {
                tag.push_attribute(("style", style.as_str()));
            }
            styled = true;
        } else {
            // Raw values are kept as written; only a stray quote needs escaping
            let value = String::from_utf8_lossy(&attr.value).replace('"', "&quot;");
            tag.push_attribute((attr.key.as_ref(), value.as_bytes()));
        }
    }
    if !styled {
        if let Some(color) = background {
            let style = set_background("", Some(color));
            tag.push_attribute(("style", style.as_str()));
        }
    }

    let mut writer = Writer::new(Vec::new());
    let event = if cell.empty { Event::Empty(tag) } else { Event::Start(tag) };
    writer.write_event(event)?;

    String::from_utf8(writer.into_inner()).context("rewritten tag is not valid UTF-8")
}

/// Background declared in an inline style, if any
fn style_background(style: &str) -> Option<String> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .filter(|(property, _)| property.trim().eq_ignore_ascii_case(BACKGROUND_PROPERTY))
        .map(|(_, value)| value.trim().to_string())
        .last()
}

/// Replace (or remove) the background declaration, keeping the others in order
fn set_background(style: &str, background: Option<&str>) -> String {
    let mut declarations: Vec<String> = style
        .split(';')
        .map(str::trim)
        .filter(|decl| !decl.is_empty())
        .filter(|decl| {
            decl.split_once(':')
                .map_or(true, |(property, _)| !property.trim().eq_ignore_ascii_case(BACKGROUND_PROPERTY))
        })
        .map(str::to_string)
        .collect();

    if let Some(color) = background {
        declarations.push(format!("{}: {}", BACKGROUND_PROPERTY, color));
    }

    declarations.join("; ")
}
