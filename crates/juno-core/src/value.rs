//! Value helpers: deep equality, stable stringification, stable hashing.
//!
//! # Invariants
//!
//! 1. [`deep_equal`] compares numbers numerically, so `1` and `1.0` are
//!    equal; every other comparison is structural.
//! 2. [`stable_stringify`] sorts object keys, so two deep-equal objects
//!    always stringify identically regardless of insertion order.
//! 3. [`stable_hash`] is seeded with fixed keys and is identical across
//!    runs and processes.

use std::fmt::Write as _;
use std::hash::{BuildHasher, Hasher};

use serde_json::Value;

/// Structural equality with numeric comparison of numbers.
#[must_use]
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Serialize with sorted object keys.
#[must_use]
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Deterministic 64-bit hash of a string.
#[must_use]
pub fn stable_hash(input: &str) -> u64 {
    let state = ahash::RandomState::with_seeds(
        0x6a75_6e6f_0000_0001,
        0x6a75_6e6f_0000_0002,
        0x6a75_6e6f_0000_0003,
        0x6a75_6e6f_0000_0004,
    );
    let mut hasher = state.build_hasher();
    hasher.write(input.as_bytes());
    hasher.finish()
}

/// Render a value the way text content shows it: strings verbatim, `null`
/// as empty, everything else as JSON.
#[must_use]
pub fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
