//! Typed table model
//!
//! Ordered rows of ordered cells. The renderer only ever writes
//! `Cell::background`; everything else is owned by whoever built the table.

/// A header cell and its column annotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderCell {
    pub label: String,
    /// Column holds a signed delta; colors itself and its left neighbor
    pub diff: bool,
    /// Column values are normalized by this maximum
    pub scale_max: Option<f64>,
}

impl HeaderCell {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn diff(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            diff: true,
            scale_max: None,
        }
    }

    pub fn scale(label: impl Into<String>, max: f64) -> Self {
        Self {
            label: label.into(),
            diff: false,
            scale_max: Some(max),
        }
    }
}

/// A body cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    /// Raw numeric text; `None` means the renderer leaves the cell alone
    pub value: Option<String>,
    /// Inline background color
    pub background: Option<String>,
}

impl Cell {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            background: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    /// Build a row from optional raw values, one per column
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        Self {
            cells: values
                .into_iter()
                .map(|v| Cell {
                    value: v.map(str::to_string),
                    background: None,
                })
                .collect(),
        }
    }

    /// Background of the cell at `index`, if both exist
    pub fn background(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|c| c.background.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<HeaderCell>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(headers: Vec<HeaderCell>, rows: Vec<Row>) -> Self {
        Self { headers, rows }
    }

    /// Index of the first header whose label matches exactly
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.label == label)
    }
}
