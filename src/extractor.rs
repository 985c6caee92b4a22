//! Event extraction — from raw payload bytes to matched subscription ids
//!
//! Decodes one binary message according to the configured wire format,
//! builds a typed matching-tree event from the fields the schema
//! declares, and searches the tree. Per-field decoding problems
//! degrade to "undefined" for that field only; the event is still
//! searched. A payload whose root is not a map fails extraction as a
//! whole and produces no matches.

use crate::config::{AttributeKind, WireFormat};
use crate::reader::ValueReader;
use crate::schema::AttributeSchema;
use a_tree::ATree;
use thiserror::Error;

/// Why a payload produced no matches
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("payload root is not a map")]
    NotMap,

    #[error("failed to build event: {0}")]
    Event(String),

    #[error("tree search failed: {0}")]
    Search(String),
}

/// Decode `payload` per `format` and return the matching subscription ids
pub fn match_payload(
    tree: &ATree<u64>,
    schema: &AttributeSchema,
    format: WireFormat,
    payload: &[u8],
) -> Result<Vec<u64>, ExtractError> {
    match format {
        WireFormat::Msgpack => {
            let value = rmpv::decode::read_value(&mut &payload[..])
                .map_err(|e| ExtractError::Decode(e.to_string()))?;
            match_value(tree, schema, &value)
        }
        WireFormat::Cbor => {
            let value: ciborium::Value = ciborium::from_reader(payload)
                .map_err(|e| ExtractError::Decode(e.to_string()))?;
            match_value(tree, schema, &value)
        }
        WireFormat::Flexbuffers => {
            let root = flexbuffers::Reader::get_root(payload)
                .map_err(|e| ExtractError::Decode(format!("{:?}", e)))?;
            match_value(tree, schema, &root)
        }
        WireFormat::Json => {
            let value: serde_json::Value = serde_json::from_slice(payload)
                .map_err(|e| ExtractError::Decode(e.to_string()))?;
            match_value(tree, schema, &value)
        }
    }
}

/// Populate an event from a decoded map and search the tree
fn match_value<R: ValueReader>(
    tree: &ATree<u64>,
    schema: &AttributeSchema,
    root: &R,
) -> Result<Vec<u64>, ExtractError> {
    if !root.is_map() {
        return Err(ExtractError::NotMap);
    }

    let mut builder = tree.make_event();

    for key in root.map_keys() {
        let Some(kind) = schema.lookup(&key) else {
            continue;
        };
        let Some(value) = root.member(&key) else {
            continue;
        };

        // A setter is only called when the value has a usable shape;
        // everything else leaves the field undefined.
        let outcome = match kind {
            AttributeKind::Boolean => match value.as_bool() {
                Some(b) => builder.with_boolean(&key, b),
                None => Ok(()),
            },
            AttributeKind::Integer => match value.as_i64() {
                Some(n) => builder.with_integer(&key, n),
                None => Ok(()),
            },
            AttributeKind::Float => {
                if let Some(f) = value.as_f64() {
                    builder.with_float(&key, f)
                } else if let Some(n) = value.as_i64() {
                    // integers widen to float
                    builder.with_float(&key, n as f64)
                } else {
                    Ok(())
                }
            }
            AttributeKind::String => match value.as_str() {
                Some(s) => builder.with_string(&key, &s),
                None => Ok(()),
            },
            AttributeKind::StringList => {
                if value.is_array() {
                    let items: Vec<String> = (0..value.array_len())
                        .filter_map(|i| value.element(i).and_then(|e| e.as_str()))
                        .collect();
                    let refs: Vec<&str> = items.iter().map(String::as_str).collect();
                    builder.with_string_list(&key, &refs)
                } else {
                    Ok(())
                }
            }
            AttributeKind::IntegerList => {
                if value.is_array() {
                    let items: Vec<i64> = (0..value.array_len())
                        .filter_map(|i| value.element(i).and_then(|e| e.as_i64()))
                        .collect();
                    builder.with_integer_list(&key, &items)
                } else {
                    Ok(())
                }
            }
        };

        if let Err(e) = outcome {
            tracing::debug!(field = %key, error = %e, "failed to set event field");
        }
    }

    let event = builder
        .build()
        .map_err(|e| ExtractError::Event(e.to_string()))?;

    let report = tree
        .search(&event)
        .map_err(|e| ExtractError::Search(e.to_string()))?;

    Ok(report.matches().iter().map(|id| **id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeDef;
    use crate::schema::tree_definitions;

    fn sample_defs() -> Vec<AttributeDef> {
        vec![
            AttributeDef::new("temperature", AttributeKind::Float),
            AttributeDef::new("location", AttributeKind::String),
            AttributeDef::new("severity", AttributeKind::Integer),
            AttributeDef::new("active", AttributeKind::Boolean),
            AttributeDef::new("tags", AttributeKind::StringList),
            AttributeDef::new("codes", AttributeKind::IntegerList),
        ]
    }

    fn sample_tree(expressions: &[(u64, &str)]) -> (ATree<u64>, AttributeSchema) {
        let defs = sample_defs();
        let mut tree = ATree::new(&tree_definitions(&defs)).unwrap();
        for (id, expr) in expressions {
            tree.insert(id, expr).unwrap();
        }
        (tree, AttributeSchema::new(&defs))
    }

    fn msgpack(value: &rmpv::Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    fn msgpack_reading() -> Vec<u8> {
        msgpack(&rmpv::Value::Map(vec![
            (
                rmpv::Value::String("temperature".into()),
                rmpv::Value::F64(31.5),
            ),
            (
                rmpv::Value::String("location".into()),
                rmpv::Value::String("warehouse".into()),
            ),
        ]))
    }

    #[test]
    fn test_msgpack_float_comparison() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let matches =
            match_payload(&tree, &schema, WireFormat::Msgpack, &msgpack_reading()).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_msgpack_no_match_below_threshold() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let payload = msgpack(&rmpv::Value::Map(vec![(
            rmpv::Value::String("temperature".into()),
            rmpv::Value::F64(12.0),
        )]));
        let matches = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_integer_widens_to_float() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let payload = msgpack(&rmpv::Value::Map(vec![(
            rmpv::Value::String("temperature".into()),
            rmpv::Value::Integer(31.into()),
        )]));
        let matches = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_missing_field_is_undefined() {
        // Messages lacking `severity` must not satisfy `severity = 5`
        let (tree, schema) = sample_tree(&[(1, "severity = 5"), (2, "temperature > 30.0")]);

        let matches =
            match_payload(&tree, &schema, WireFormat::Msgpack, &msgpack_reading()).unwrap();
        assert_eq!(matches, vec![2]);
    }

    #[test]
    fn test_wrong_typed_field_is_undefined() {
        let (tree, schema) = sample_tree(&[(1, r#"location = "warehouse""#)]);

        // location carries an integer — the field degrades to undefined
        let payload = msgpack(&rmpv::Value::Map(vec![(
            rmpv::Value::String("location".into()),
            rmpv::Value::Integer(7.into()),
        )]));
        let matches = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let payload = msgpack(&rmpv::Value::Map(vec![
            (
                rmpv::Value::String("temperature".into()),
                rmpv::Value::F64(31.5),
            ),
            (
                rmpv::Value::String("firmware_rev".into()),
                rmpv::Value::String("2.4.1".into()),
            ),
        ]));
        let matches = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_non_map_root_fails() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let payload = msgpack(&rmpv::Value::Array(vec![rmpv::Value::F64(31.5)]));
        let err = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap_err();
        assert!(matches!(err, ExtractError::NotMap));
    }

    #[test]
    fn test_garbage_payload_fails_decode() {
        let (tree, schema) = sample_tree(&[(1, "temperature > 30.0")]);

        let err = match_payload(&tree, &schema, WireFormat::Json, b"{not json").unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
    }

    #[test]
    fn test_string_list_membership() {
        let (tree, schema) = sample_tree(&[(1, r#"tags one of ["urgent", "critical"]"#)]);

        let payload = msgpack(&rmpv::Value::Map(vec![(
            rmpv::Value::String("tags".into()),
            rmpv::Value::Array(vec![
                rmpv::Value::String("routine".into()),
                rmpv::Value::String("urgent".into()),
                // non-string elements are skipped, not fatal
                rmpv::Value::Integer(9.into()),
            ]),
        )]));
        let matches = match_payload(&tree, &schema, WireFormat::Msgpack, &payload).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_cbor_integer_list() {
        let (tree, schema) = sample_tree(&[(1, "codes one of [4, 8]")]);

        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Text("codes".to_string()),
            ciborium::Value::Array(vec![
                ciborium::Value::Integer(3.into()),
                ciborium::Value::Integer(8.into()),
            ]),
        )]);
        let mut payload = Vec::new();
        ciborium::into_writer(&value, &mut payload).unwrap();

        let matches = match_payload(&tree, &schema, WireFormat::Cbor, &payload).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_json_boolean_and_string() {
        let (tree, schema) =
            sample_tree(&[(1, r#"active and location = "warehouse""#)]);

        let payload = serde_json::to_vec(&serde_json::json!({
            "active": true,
            "location": "warehouse",
        }))
        .unwrap();
        let matches = match_payload(&tree, &schema, WireFormat::Json, &payload).unwrap();
        assert_eq!(matches, vec![1]);

        let payload = serde_json::to_vec(&serde_json::json!({
            "active": false,
            "location": "warehouse",
        }))
        .unwrap();
        let matches = match_payload(&tree, &schema, WireFormat::Json, &payload).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_flexbuffers_roundtrip() {
        let (tree, schema) = sample_tree(&[(1, "severity >= 4")]);

        let mut builder = flexbuffers::Builder::default();
        let mut map = builder.start_map();
        map.push("severity", 5i64);
        map.end_map();

        let matches =
            match_payload(&tree, &schema, WireFormat::Flexbuffers, builder.view()).unwrap();
        assert_eq!(matches, vec![1]);
    }

    #[test]
    fn test_multiple_subscriptions_fan_out() {
        let (tree, schema) = sample_tree(&[
            (1, "temperature > 30.0"),
            (2, r#"location = "warehouse""#),
            (3, "severity = 9"),
        ]);

        let mut matches =
            match_payload(&tree, &schema, WireFormat::Msgpack, &msgpack_reading()).unwrap();
        matches.sort_unstable();
        assert_eq!(matches, vec![1, 2]);
    }
}
