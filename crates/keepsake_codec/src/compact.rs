//! Lossless structural compaction of JSON trees.
//!
//! Progress data is dominated by arrays of records with the same verbose
//! keys (`achievementId`, `unlockedAt`, ...). Every key of every object
//! that sits directly inside an array is replaced by a short code from a
//! per-payload dictionary; the dictionary travels with the payload.
//!
//! Because *all* keys of array elements are coded, a coded object can never
//! contain a literal key that collides with a code.

use crate::error::{CodecError, CodecResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;

/// Removes every object field whose value is `null`, recursively.
///
/// `null` elements of arrays are kept so indices stay stable.
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for child in map.values_mut() {
                strip_nulls(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_nulls(item);
            }
        }
        _ => {}
    }
}

/// Replaces the keys of array-element objects with short codes.
///
/// Returns the dictionary: the key at index `i` is coded as `i` in base 36.
/// The most frequent keys get the shortest codes.
pub fn shorten_keys(value: &mut Value) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    count_element_keys(value, &mut counts);
    if counts.is_empty() {
        return Vec::new();
    }

    let mut dictionary: Vec<(String, usize)> = counts.into_iter().collect();
    dictionary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let dictionary: Vec<String> = dictionary.into_iter().map(|(key, _)| key).collect();

    {
        let codes: HashMap<&str, String> = dictionary
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), to_base36(i)))
            .collect();
        let lookup = |key: &str| {
            Ok::<_, Infallible>(codes.get(key).cloned().unwrap_or_else(|| key.to_string()))
        };
        match rename_element_keys(value, &lookup) {
            Ok(()) => {}
            Err(never) => match never {},
        };
    }

    dictionary
}

/// Reverses [`shorten_keys`] with the dictionary it returned.
///
/// # Errors
///
/// Returns [`CodecError::UnknownShortCode`] if a code is not in the
/// dictionary.
pub fn expand_keys(value: &mut Value, dictionary: &[String]) -> CodecResult<()> {
    rename_element_keys(value, &|code: &str| {
        from_base36(code)
            .and_then(|i| dictionary.get(i))
            .cloned()
            .ok_or_else(|| CodecError::UnknownShortCode(code.to_string()))
    })
}

fn count_element_keys(value: &Value, counts: &mut HashMap<String, usize>) {
    match value {
        Value::Object(map) => {
            for child in map.values() {
                count_element_keys(child, counts);
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        *counts.entry(key.clone()).or_default() += 1;
                    }
                }
                count_element_keys(item, counts);
            }
        }
        _ => {}
    }
}

fn rename_element_keys<E>(
    value: &mut Value,
    rename: &dyn Fn(&str) -> Result<String, E>,
) -> Result<(), E> {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                rename_element_keys(child, rename)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Object(map) = item {
                    let old = std::mem::take(map);
                    let mut renamed = Map::with_capacity(old.len());
                    for (key, child) in old {
                        renamed.insert(rename(&key)?, child);
                    }
                    *map = renamed;
                }
                rename_element_keys(item, rename)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn to_base36(mut n: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[n % 36]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(code: &str) -> Option<usize> {
    // Reject forms `to_base36` never produces, like "00".
    if code.is_empty() || (code.len() > 1 && code.starts_with('0')) {
        return None;
    }
    if code.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    usize::from_str_radix(code, 36).ok()
}
