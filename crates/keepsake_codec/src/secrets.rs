//! Isolation of sensitive fields.
//!
//! Sensitive fields are located by key name anywhere in the tree, moved
//! out into a map keyed by JSON Pointer (RFC 6901), and sealed separately
//! from the bulk payload.

use crate::error::{CodecError, CodecResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key names treated as sensitive when no list is configured.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "credentials",
    "session_token",
    "auth_token",
    "password",
    "refresh_token",
];

/// Removes every field whose key is in `sensitive` and returns them by
/// JSON Pointer.
///
/// The values of extracted fields are not searched further.
pub fn extract_secrets<S: AsRef<str>>(
    value: &mut Value,
    sensitive: &[S],
) -> BTreeMap<String, Value> {
    let mut found = BTreeMap::new();
    let mut path = String::new();
    extract_into(value, sensitive, &mut path, &mut found);
    found
}

fn extract_into<S: AsRef<str>>(
    value: &mut Value,
    sensitive: &[S],
    path: &mut String,
    found: &mut BTreeMap<String, Value>,
) {
    let base_len = path.len();
    match value {
        Value::Object(map) => {
            let hits: Vec<String> = map
                .keys()
                .filter(|k| sensitive.iter().any(|s| s.as_ref() == k.as_str()))
                .cloned()
                .collect();
            for key in hits {
                if let Some(secret) = map.remove(&key) {
                    found.insert(format!("{path}/{}", escape(&key)), secret);
                }
            }
            for (key, child) in map.iter_mut() {
                path.push('/');
                path.push_str(&escape(key));
                extract_into(child, sensitive, path, found);
                path.truncate(base_len);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter_mut().enumerate() {
                path.push('/');
                path.push_str(&i.to_string());
                extract_into(child, sensitive, path, found);
                path.truncate(base_len);
            }
        }
        _ => {}
    }
}

/// Puts extracted secrets back at their pointers.
///
/// # Errors
///
/// Returns [`CodecError::DanglingSecret`] if a pointer's parent is missing
/// or is not an object.
pub fn restore_secrets(value: &mut Value, secrets: BTreeMap<String, Value>) -> CodecResult<()> {
    for (pointer, secret) in secrets {
        let dangling = || CodecError::DanglingSecret {
            pointer: pointer.clone(),
        };
        let split = pointer.rfind('/').ok_or_else(dangling)?;
        let (parent, key) = (&pointer[..split], unescape(&pointer[split + 1..]));

        match value.pointer_mut(parent) {
            Some(Value::Object(map)) => {
                map.insert(key, secret);
            }
            _ => return Err(dangling()),
        }
    }
    Ok(())
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_at_any_depth() {
        let mut value = json!({
            "credentials": {"user": "ada", "password": "pw"},
            "profile": {"name": "ada", "session_token": "tok"},
            "devices": [{"id": 1, "auth_token": "a1"}, {"id": 2}]
        });
        let secrets = extract_secrets(&mut value, DEFAULT_SENSITIVE_KEYS);

        assert_eq!(secrets.len(), 3);
        assert_eq!(secrets["/credentials"], json!({"user": "ada", "password": "pw"}));
        assert_eq!(secrets["/profile/session_token"], json!("tok"));
        assert_eq!(secrets["/devices/0/auth_token"], json!("a1"));
        assert_eq!(
            value,
            json!({"profile": {"name": "ada"}, "devices": [{"id": 1}, {"id": 2}]})
        );
    }

    #[test]
    fn restore_puts_everything_back() {
        let original = json!({
            "credentials": "c",
            "a/b": {"~x": {"password": "p"}},
            "list": [{"refresh_token": "r"}]
        });
        let mut value = original.clone();
        let secrets = extract_secrets(&mut value, DEFAULT_SENSITIVE_KEYS);
        restore_secrets(&mut value, secrets).unwrap();
        assert_eq!(value, original);
    }

    #[test]
    fn custom_key_list() {
        let mut value = json!({"pin": 1234, "password": "kept"});
        let secrets = extract_secrets(&mut value, &["pin"]);
        assert_eq!(secrets.len(), 1);
        assert_eq!(value, json!({"password": "kept"}));
    }

    #[test]
    fn dangling_pointer_rejected() {
        let mut value = json!({"profile": {}});
        let mut secrets = BTreeMap::new();
        secrets.insert("/missing/session_token".to_string(), json!("x"));

        let result = restore_secrets(&mut value, secrets);
        assert!(matches!(result, Err(CodecError::DanglingSecret { .. })));
    }

    #[test]
    fn pointer_without_slash_rejected() {
        let mut value = json!({});
        let mut secrets = BTreeMap::new();
        secrets.insert("nope".to_string(), json!(1));
        assert!(restore_secrets(&mut value, secrets).is_err());
    }
}
