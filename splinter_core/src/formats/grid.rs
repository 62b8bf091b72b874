//! Tabular model for comma separated seeds.

use crate::formats::FormatError;
use crate::formats::lines::{replace_nulls, split_lines};
use crate::mutator::{self, Mutation, Operation, StructuralModel};
use rand::Rng;
use rand_core::RngCore;

/// Rows appended by `insert_multiple_rows`.
const BULK_ROWS: usize = 4096;

fn is_delimiter(b: u8) -> bool {
    matches!(b, b',' | b'\n' | b'\r')
}

/// Random non-zero byte that is neither a cell nor a row delimiter.
fn filler_byte(rng: &mut dyn RngCore) -> u8 {
    loop {
        let b = rng.random_range(1..=0xFFu8);
        if !is_delimiter(b) {
            return b;
        }
    }
}

/// Rewrites delimiter bytes inside a cell so the edit cannot change the
/// grid's shape.
fn scrub_cell(cell: &mut [u8]) {
    for b in cell.iter_mut() {
        *b = match *b {
            b',' => b';',
            b'\n' | b'\r' => b' ',
            other => other,
        };
    }
}

/// Header line plus data rows of byte cells.
///
/// The header's column count is the row width used for validation. Only
/// `insert_multiple_rows` deliberately produces rows that break it once
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    header: Vec<u8>,
    rows: Vec<Vec<Vec<u8>>>,
    columns: usize,
}

impl Grid {
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<Vec<u8>>] {
        &self.rows
    }

    /// Column count defined by the header row.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Picks a uniformly random cell as `(row, col)`. `None` when there are
    /// no data rows.
    fn random_cell(&self, rng: &mut dyn RngCore) -> Option<(usize, usize)> {
        if self.rows.is_empty() {
            return None;
        }
        let row = rng.random_range(0..self.rows.len());
        let col = rng.random_range(0..self.rows[row].len());
        Some((row, col))
    }

    fn edit_random_cell(
        &self,
        rng: &mut dyn RngCore,
        edit: impl FnOnce(&[u8], &mut dyn RngCore) -> Vec<u8>,
    ) -> Self {
        let mut grid = self.clone();
        if let Some((row, col)) = self.random_cell(rng) {
            let mut cell = edit(&grid.rows[row][col], rng);
            scrub_cell(&mut cell);
            grid.rows[row][col] = cell;
        }
        grid
    }
}

fn insert_multiple_rows(grid: &Grid, _seed: &[u8], rng: &mut dyn RngCore) -> Mutation<Grid> {
    let rows = (0..BULK_ROWS)
        .map(|_| {
            (0..grid.columns)
                .map(|_| rng.next_u32().to_le_bytes().to_vec())
                .collect()
        })
        .collect();
    Mutation::Model(Grid {
        header: grid.header.clone(),
        rows,
        columns: grid.columns,
    })
}

type Op = Operation<Grid>;

impl StructuralModel for Grid {
    fn parse(seed: &[u8]) -> Result<Self, FormatError> {
        let mut lines = split_lines(seed).into_iter();
        let header = lines.next().ok_or(FormatError::Empty)?;
        let columns = header.split(|b| *b == b',').count();
        let rows = lines
            .map(|line| line.split(|b| *b == b',').map(<[u8]>::to_vec).collect())
            .collect();
        Ok(Self {
            header,
            rows,
            columns,
        })
    }

    fn serialize(&self, rng: &mut dyn RngCore) -> Vec<u8> {
        let body = self
            .rows
            .iter()
            .map(|row| row.join(&b','))
            .collect::<Vec<_>>()
            .join(&b'\n');

        let mut out = Vec::with_capacity(self.header.len() + body.len() + 2);
        out.extend_from_slice(&self.header);
        out.push(b'\n');
        out.extend_from_slice(&body);
        replace_nulls(&mut out, filler_byte(rng));
        if out.last() != Some(&b'\n') {
            out.push(b'\n');
        }
        out
    }

    fn operations() -> Vec<Operation<Self>> {
        vec![
            Op::new("replace_random_byte", |g, _, rng| {
                Mutation::Model(g.edit_random_cell(rng, mutator::replace_random_byte))
            }),
            Op::new("insert_random_bytes", |g, _, rng| {
                Mutation::Model(g.edit_random_cell(rng, |cell, rng| {
                    mutator::insert_random_bytes(cell, None, None, rng)
                }))
            }),
            Op::new("delete_random_byte", |g, _, rng| {
                Mutation::Model(g.edit_random_cell(rng, mutator::delete_random_byte))
            }),
            Op::new("insert_multiple_rows", insert_multiple_rows),
        ]
    }
}
