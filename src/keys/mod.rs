//! Deterministic fingerprinting helpers for building stable cache keys.
//!
//! Structurally equal inputs always produce identical output, regardless of
//! map insertion order.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CacheResult;

/// Serializes `value` as canonical JSON: object keys sorted, no whitespace,
/// non-ASCII characters emitted as-is.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`](crate::CacheError::Serialization)
/// if `value` cannot be represented as JSON (e.g. a map with non-string keys).
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use nscache::keys::canonical_json;
///
/// let mut a = HashMap::new();
/// a.insert("b", 2);
/// a.insert("a", 1);
/// assert_eq!(canonical_json(&a).unwrap(), r#"{"a":1,"b":2}"#);
/// ```
pub fn canonical_json<T>(value: &T) -> CacheResult<String>
where
    T: Serialize + ?Sized,
{
    // `serde_json::Map` is a BTreeMap, so going through `Value` sorts every
    // nested object.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Builds a canonical `k=v&k2=v2` query string.
///
/// Keys are sorted, pairs with a `None` value are dropped, and both keys and
/// values are percent-encoded. If a key repeats, the last value wins.
///
/// # Examples
///
/// ```
/// use nscache::keys::canonical_query_string;
///
/// let qs = canonical_query_string([("q", Some("rust lang")), ("page", Some("2")), ("sort", None)]);
/// assert_eq!(qs, "page=2&q=rust%20lang");
/// ```
pub fn canonical_query_string<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: Into<String>,
    V: ToString,
{
    let sorted: BTreeMap<String, Option<String>> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.map(|v| v.to_string())))
        .collect();

    sorted
        .iter()
        .filter_map(|(k, v)| {
            v.as_ref()
                .map(|v| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the SHA-256 digest of `bytes` as 64 lowercase hex characters.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Returns the SHA-256 digest of the UTF-8 encoding of `text`.
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Hashes the canonical JSON form of `value`, giving a fixed-length key for
/// arbitrarily large structured inputs (request bodies, prompt parameters).
pub fn fingerprint<T>(value: &T) -> CacheResult<String>
where
    T: Serialize + ?Sized,
{
    Ok(hash_text(&canonical_json(value)?))
}
