//! Line-oriented model for unstructured text seeds.

use crate::formats::FormatError;
use crate::mutator::{Mutation, Operation, StructuralModel};
use rand::Rng;
use rand_core::RngCore;

/// Repetition count for the padding style operations.
const PADDING_LEN: usize = 5000;

/// Splits on `\n`, dropping a trailing `\r` from each line. A final newline
/// does not produce an empty trailing line.
pub fn split_lines(input: &[u8]) -> Vec<Vec<u8>> {
    if input.is_empty() {
        return Vec::new();
    }
    let body = input.strip_suffix(b"\n").unwrap_or(input);
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect()
}

/// Replaces every NUL byte with `filler`.
pub(crate) fn replace_nulls(bytes: &mut [u8], filler: u8) {
    for b in bytes.iter_mut().filter(|b| **b == 0) {
        *b = filler;
    }
}

/// Ordered byte lines. The first line is the header, which the
/// `*_keep_header` operations leave untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineList {
    lines: Vec<Vec<u8>>,
}

impl LineList {
    pub fn new(lines: Vec<Vec<u8>>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.lines.first().map(Vec::as_slice)
    }

    /// Applies `edit` to every line, or to every line after the header.
    fn map_lines(&self, keep_header: bool, edit: impl Fn(&[u8]) -> Vec<u8>) -> Self {
        let lines = self
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if keep_header && i == 0 {
                    line.clone()
                } else {
                    edit(line)
                }
            })
            .collect();
        Self { lines }
    }

    fn append(&self, keep_header: bool, unit: &[u8], times: usize) -> Self {
        let suffix = unit.repeat(times);
        self.map_lines(keep_header, |line| [line, suffix.as_slice()].concat())
    }

    fn overwrite(&self, keep_header: bool, value: &[u8]) -> Self {
        self.map_lines(keep_header, |_| value.to_vec())
    }
}

/// Tokens that tend to upset line parsers: control characters, punctuation
/// and a few boundary numbers.
fn bad_tokens() -> Vec<Vec<u8>> {
    let mut tokens: Vec<Vec<u8>> = (0u8..128)
        .filter(|c| *c < 48 || *c > 122)
        .map(|c| vec![c])
        .collect();
    for token in ["a", "%s", "-99999999", "99999999"] {
        tokens.push(token.as_bytes().to_vec());
    }
    tokens
}

fn ascii_table() -> Vec<u8> {
    (0u8..128).collect()
}

fn random_char(model: &LineList, _seed: &[u8], rng: &mut dyn RngCore) -> Mutation<LineList> {
    let mut lines = model.lines.clone();
    if !lines.is_empty() {
        let row = rng.random_range(0..lines.len());
        if !lines[row].is_empty() {
            let col = rng.random_range(0..lines[row].len());
            let tokens = bad_tokens();
            let token = &tokens[rng.random_range(0..tokens.len())];
            let line = &lines[row];
            lines[row] = [&line[..col], token.as_slice(), &line[col + 1..]].concat();
        }
    }
    Mutation::Model(LineList { lines })
}

type Op = Operation<LineList>;

impl StructuralModel for LineList {
    fn parse(seed: &[u8]) -> Result<Self, FormatError> {
        Ok(Self::new(split_lines(seed)))
    }

    fn serialize(&self, rng: &mut dyn RngCore) -> Vec<u8> {
        let mut out = self.lines.join(&b'\n');
        replace_nulls(&mut out, rng.random_range(1..=0xFFu8));
        out
    }

    fn operations() -> Vec<Operation<Self>> {
        vec![
            Op::new("append_padding", |m, _, _| {
                Mutation::Model(m.append(false, b"A", PADDING_LEN))
            }),
            Op::new("append_padding_keep_header", |m, _, _| {
                Mutation::Model(m.append(true, b"B", PADDING_LEN))
            }),
            Op::new("append_zeros", |m, _, _| {
                Mutation::Model(m.append(false, b"0", PADDING_LEN))
            }),
            Op::new("append_zeros_keep_header", |m, _, _| {
                Mutation::Model(m.append(true, b"0", PADDING_LEN))
            }),
            Op::new("append_newlines", |m, _, _| {
                Mutation::Model(m.append(false, b"\n", PADDING_LEN))
            }),
            Op::new("append_newlines_keep_header", |m, _, _| {
                Mutation::Model(m.append(true, b"\n", PADDING_LEN))
            }),
            Op::new("append_format_strings", |m, _, _| {
                Mutation::Model(m.append(false, b"%s", PADDING_LEN))
            }),
            Op::new("append_format_strings_keep_header", |m, _, _| {
                Mutation::Model(m.append(true, b"%s", PADDING_LEN))
            }),
            Op::new("append_ascii", |m, _, _| {
                Mutation::Model(m.append(false, &ascii_table(), 1))
            }),
            Op::new("append_ascii_keep_header", |m, _, _| {
                Mutation::Model(m.append(true, &ascii_table(), 1))
            }),
            Op::new("large_neg_num", |m, _, _| {
                Mutation::Model(m.overwrite(false, b"-99999999"))
            }),
            Op::new("large_neg_num_keep_header", |m, _, _| {
                Mutation::Model(m.overwrite(true, b"-99999999"))
            }),
            Op::new("large_num", |m, _, _| {
                Mutation::Model(m.overwrite(false, b"99999999"))
            }),
            Op::new("large_num_keep_header", |m, _, _| {
                Mutation::Model(m.overwrite(true, b"99999999"))
            }),
            Op::new("zero", |m, _, _| Mutation::Model(m.overwrite(false, b"0"))),
            Op::new("zero_keep_header", |m, _, _| {
                Mutation::Model(m.overwrite(true, b"0"))
            }),
            Op::new("null", |m, _, _| Mutation::Model(m.overwrite(false, b"\0"))),
            Op::new("append_eot", |m, _, _| {
                Mutation::Model(m.append(false, b"\x04", 1))
            }),
            Op::new("random_char", random_char),
        ]
    }
}
