//! Grid value domain and shape-sensitive equality.
//!
//! A [`Grid`] is a non-empty rectangular matrix of cells in `0..=9`. Grids are
//! validated once on construction and never mutated afterwards.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Largest cell value a grid may hold.
pub const MAX_CELL: u8 = 9;

/// Rows of integers as returned by candidate code, before any validation.
///
/// Candidate output is compared against a [`Grid`] without being forced into
/// the grid domain, so out-of-range or ragged output simply fails to match.
pub type RawRows = Vec<Vec<i64>>;

/// Rectangular matrix of integers in `0..=9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRows", into = "RawRows")]
pub struct Grid {
    rows: Vec<Vec<u8>>,
}

/// Height and width of a grid-like value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

impl Grid {
    /// Validate and build a grid from raw integer rows.
    pub fn from_rows(rows: RawRows) -> Result<Self> {
        let Some(first) = rows.first() else {
            bail!("grid must have at least one row");
        };
        let width = first.len();
        if width == 0 {
            bail!("grid rows must not be empty");
        }
        let mut cells = Vec::with_capacity(rows.len());
        for (r, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                bail!(
                    "grid is not rectangular: row {r} has {} cells, expected {width}",
                    row.len()
                );
            }
            let mut out = Vec::with_capacity(width);
            for (c, value) in row.into_iter().enumerate() {
                if !(0..=i64::from(MAX_CELL)).contains(&value) {
                    bail!("cell ({r}, {c}) is {value}, expected 0..={MAX_CELL}");
                }
                out.push(value as u8);
            }
            cells.push(out);
        }
        Ok(Self { rows: cells })
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn shape(&self) -> Shape {
        Shape {
            height: self.rows.len(),
            width: self.rows[0].len(),
        }
    }

    /// Elementwise, shape-sensitive comparison against candidate output.
    pub fn matches(&self, actual: &[Vec<i64>]) -> bool {
        self.rows.len() == actual.len()
            && self.rows.iter().zip(actual).all(|(expected, got)| {
                expected.len() == got.len()
                    && expected
                        .iter()
                        .zip(got)
                        .all(|(e, g)| i64::from(*e) == *g)
            })
    }

    /// Describe how `actual` differs from this grid, or `None` when it matches.
    pub fn describe_difference(&self, actual: &[Vec<i64>]) -> Option<String> {
        if self.matches(actual) {
            return None;
        }
        let expected = self.shape();
        let Some(actual_shape) = raw_shape(actual) else {
            return Some(format!(
                "expected a {expected} grid, got ragged rows of lengths {:?}",
                actual.iter().map(Vec::len).collect::<Vec<_>>()
            ));
        };
        if actual_shape != expected {
            return Some(format!(
                "expected a {expected} grid, got {actual_shape}"
            ));
        }
        let differing = self
            .rows
            .iter()
            .zip(actual)
            .flat_map(|(e, g)| e.iter().zip(g))
            .filter(|(e, g)| i64::from(**e) != **g)
            .count();
        Some(format!(
            "{differing} of {} cells differ from the expected {expected} grid",
            expected.height * expected.width
        ))
    }
}

impl TryFrom<RawRows> for Grid {
    type Error = anyhow::Error;

    fn try_from(rows: RawRows) -> Result<Self> {
        Self::from_rows(rows)
    }
}

impl From<Grid> for RawRows {
    fn from(grid: Grid) -> Self {
        grid.rows
            .into_iter()
            .map(|row| row.into_iter().map(i64::from).collect())
            .collect()
    }
}

/// Shape of raw rows, or `None` when the rows are ragged.
///
/// An empty row list has shape `0x0`.
pub fn raw_shape(rows: &[Vec<i64>]) -> Option<Shape> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != width) {
        return None;
    }
    Some(Shape {
        height: rows.len(),
        width,
    })
}
