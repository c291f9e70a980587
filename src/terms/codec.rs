//! A term node's value is a JSON object of replica name to term, e.g.
//!
//! ```text
//! {"core_node1": 3, "core_node2": 2, "core_node2_recovering": 1}
//! ```
//!
//! The version is not part of the payload. It is the store's own per-write counter.

use crate::terms::ShardTerms;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Serialize the mapping (not the version) of `terms`. Keys are sorted so equal mappings encode
/// to equal bytes.
pub fn encode_terms(terms: &ShardTerms) -> Result<Bytes, serde_json::Error> {
    let sorted: BTreeMap<&String, &i64> = terms.values().iter().collect();
    serde_json::to_vec(&sorted).map(Bytes::from)
}

/// An empty payload is an empty mapping; a freshly created node may have no data yet.
pub fn decode_terms(data: &[u8]) -> Result<HashMap<String, i64>, serde_json::Error> {
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(HashMap::new());
    }
    serde_json::from_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_sorted_and_excludes_version() {
        let mut values = HashMap::new();
        values.insert("core_node2".to_string(), 2);
        values.insert("core_node1".to_string(), 3);
        let encoded = encode_terms(&ShardTerms::new(values.clone(), 42)).unwrap();

        assert_eq!(&encoded[..], br#"{"core_node1":3,"core_node2":2}"#);
        assert_eq!(decode_terms(&encoded).unwrap(), values);
    }

    #[test]
    fn empty_payload_is_empty_mapping() {
        assert!(decode_terms(b"").unwrap().is_empty());
        assert!(decode_terms(b"{}").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_integer_terms() {
        decode_terms(br#"{"core_node1":"three"}"#).expect_err("Expected decode failure");
        decode_terms(br#"[1, 2]"#).expect_err("Expected decode failure");
    }
}
