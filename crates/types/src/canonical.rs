//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Canonical JSON serialization.
//!
//! Every hash and signature in the protocol — `metadataHash`, `keyHash`, the
//! signed `ephPub` blob — is computed over the same canonical form: object
//! keys sorted lexicographically, compact separators, numbers in their
//! shortest representation, strings as UTF-8. Verification diverges across
//! peers the moment two canonicalizations disagree, so this module is the
//! only place canonical bytes are produced.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("value cannot be canonicalized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serialize `value` to its canonical JSON string.
///
/// The value is first lifted into a `serde_json::Value`; the `Value` object
/// map is ordered (BTree-backed), so serializing it yields keys in sorted
/// order regardless of the field order of the source type. Compact output,
/// no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let normalized = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&normalized)?)
}

/// Canonical JSON as raw UTF-8 bytes, the form hashes and signatures consume.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    canonical_json(value).map(String::into_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted() {
        let value = json!({"zebra": 1, "alpha": 2, "mike": {"y": true, "x": false}});
        let canonical = canonical_json(&value).unwrap();
        assert_eq!(
            canonical,
            r#"{"alpha":2,"mike":{"x":false,"y":true},"zebra":1}"#
        );
    }

    #[test]
    fn test_struct_field_order_irrelevant() {
        #[derive(Serialize)]
        struct Unordered {
            y: &'static str,
            x: &'static str,
        }

        let canonical = canonical_json(&Unordered { y: "two", x: "one" }).unwrap();
        assert_eq!(canonical, r#"{"x":"one","y":"two"}"#);
    }

    #[test]
    fn test_numbers_shortest_form() {
        let value = json!({"n": 100000, "neg": -7});
        assert_eq!(canonical_json(&value).unwrap(), r#"{"n":100000,"neg":-7}"#);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let value = json!({"b": [1, 2, 3], "a": "text"});
        let first = canonical_json_bytes(&value).unwrap();
        let second = canonical_json_bytes(&value).unwrap();
        assert_eq!(first, second);
    }
}
