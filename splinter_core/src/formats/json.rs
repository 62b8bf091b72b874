use crate::formats::FormatError;
use crate::mutator::{Mutation, Operation, StructuralModel};
use rand::Rng;
use rand::distr::Alphanumeric;
use rand_core::RngCore;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};

/// Probability to recurse into a field or array element.
const FIELD_RECURSE_PROBABILITY: f64 = 0.5;
/// Probability for a leaf value to be altered once visited.
const VALUE_MUTATION_PROBABILITY: f64 = 0.5;
/// Maximum recursion depth for `perturb_values`.
const MAX_MUTATION_DEPTH: usize = 10;
/// Number of top-level entries in the oversized objects.
const OVERSIZED_OBJECT_LEN: usize = 10;
/// Maximum length of the random strings inside the oversized objects.
const MAX_RANDOM_STRING_LEN: usize = 50;

/// A parsed JSON seed.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    value: JsonValue,
}

impl JsonDocument {
    pub fn value(&self) -> &JsonValue {
        &self.value
    }
}

#[derive(Clone, Copy)]
enum FillKind {
    Int,
    Str,
}

fn random_alnum(rng: &mut dyn RngCore, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Builds an object with `entries` keys and returns a random key in
/// `0..obj_len` paired with the object's text repeated `entries` times.
fn oversized_entry(
    entries: usize,
    obj_len: usize,
    kind: FillKind,
    rng: &mut dyn RngCore,
) -> (String, String) {
    let mut inner = JsonMap::new();
    for i in 0..entries {
        let value = match kind {
            FillKind::Int => JsonValue::from(i),
            FillKind::Str => {
                let len = rng.random_range(0..=MAX_RANDOM_STRING_LEN);
                JsonValue::String(random_alnum(rng, len))
            }
        };
        inner.insert(i.to_string(), value);
    }
    let key = rng.random_range(0..obj_len).to_string();
    let text = JsonValue::Object(inner).to_string().repeat(entries);
    (key, text)
}

/// Serializes an oversized object, then un-escapes the embedded quotes so the
/// string values break out of their delimiters.
fn oversized_object(kind: FillKind, rng: &mut dyn RngCore) -> Vec<u8> {
    let mut outer = JsonMap::new();
    for i in 0..OVERSIZED_OBJECT_LEN {
        let (key, text) = oversized_entry(i, OVERSIZED_OBJECT_LEN, kind, rng);
        outer.insert(key, JsonValue::String(text));
    }
    JsonValue::Object(outer)
        .to_string()
        .replace("\\\"", "\"")
        .into_bytes()
}

fn json_obj_bits(
    doc: &JsonDocument,
    _seed: &[u8],
    rng: &mut dyn RngCore,
) -> Mutation<JsonDocument> {
    let mut bytes = doc.value.to_string().into_bytes();
    for b in bytes.iter_mut() {
        if rng.random_range(0..=10u8) == 0 {
            *b ^= rng.random_range(0..=200u8);
        }
    }
    Mutation::Raw(bytes)
}

fn flip_case(c: char) -> char {
    if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c.to_ascii_lowercase()
    }
}

/// Rewrites one character of `text`. Letters may have their case flipped,
/// anything else becomes a random printable ASCII character.
fn perturb_text(text: &str, rng: &mut dyn RngCore) -> String {
    let target = rng.random_range(0..text.chars().count());
    text.chars()
        .enumerate()
        .map(|(i, c)| {
            if i != target {
                c
            } else if c.is_ascii_alphabetic() && rng.random_bool(0.5) {
                flip_case(c)
            } else {
                char::from(rng.random_range(b' '..=b'~'))
            }
        })
        .collect()
}

/// Shifts a number by a small delta without changing its integer or float
/// kind.
fn perturb_number(n: &JsonNumber, rng: &mut dyn RngCore) -> JsonNumber {
    if let Some(v) = n.as_i64() {
        JsonNumber::from(v.saturating_add(rng.random_range(-5..=5)))
    } else if let Some(v) = n.as_u64() {
        JsonNumber::from(v.saturating_add(rng.random_range(0..=5)))
    } else {
        let shifted = n.as_f64().unwrap_or_default() + rng.random_range(-1.0..1.0);
        JsonNumber::from_f64(shifted).unwrap_or_else(|| JsonNumber::from(0))
    }
}

fn perturb_leaf(leaf: &mut JsonValue, rng: &mut dyn RngCore) {
    match leaf {
        JsonValue::String(s) if !s.is_empty() => *s = perturb_text(s, rng),
        JsonValue::Number(n) => *n = perturb_number(n, rng),
        JsonValue::Bool(b) => *b = !*b,
        _ => {}
    }
}

/// Walks a JSON value, visiting each child of a container with
/// `FIELD_RECURSE_PROBABILITY` and editing each visited leaf with
/// `VALUE_MUTATION_PROBABILITY`. Null is left alone.
fn perturb_value(value: &mut JsonValue, rng: &mut dyn RngCore, depth: usize) {
    if depth >= MAX_MUTATION_DEPTH {
        return;
    }

    let children: Vec<&mut JsonValue> = match value {
        JsonValue::Object(map) => map.values_mut().collect(),
        JsonValue::Array(items) => items.iter_mut().collect(),
        leaf => {
            if rng.random_bool(VALUE_MUTATION_PROBABILITY) {
                perturb_leaf(leaf, rng);
            }
            return;
        }
    };

    for child in children {
        if rng.random_bool(FIELD_RECURSE_PROBABILITY) {
            perturb_value(child, rng, depth + 1);
        }
    }
}

type Op = Operation<JsonDocument>;

impl StructuralModel for JsonDocument {
    fn parse(seed: &[u8]) -> Result<Self, FormatError> {
        serde_json::from_slice(seed)
            .map(|value| Self { value })
            .map_err(|e| FormatError::Json(e.to_string()))
    }

    fn serialize(&self, _rng: &mut dyn RngCore) -> Vec<u8> {
        self.value.to_string().into_bytes()
    }

    fn operations() -> Vec<Operation<Self>> {
        vec![
            Op::new("json_obj_int", |_, _, rng| {
                Mutation::Raw(oversized_object(FillKind::Int, rng))
            }),
            Op::new("json_obj_str", |_, _, rng| {
                Mutation::Raw(oversized_object(FillKind::Str, rng))
            }),
            Op::new("json_obj_bits", json_obj_bits),
            Op::new("perturb_values", |doc, _, rng| {
                let mut value = doc.value.clone();
                perturb_value(&mut value, rng, 0);
                Mutation::Model(JsonDocument { value })
            }),
        ]
    }
}
