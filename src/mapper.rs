//! Translates protocol updates into the flag store's descriptor form.
//!
//! Flag evaluations arrive pre-computed by the server; mapping is mostly a
//! reshaping exercise. Kind-specific processors are looked up in a dispatch
//! table so new object kinds can be added without touching the engine.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::protocol::{Payload, Update};

/// Object kind carrying server-evaluated flags.
pub const KIND_FLAG_EVAL: &str = "flagEval";

/// Versioned item as the flag store holds it. A deleted item is a tombstone:
/// `flag` keeps `deleted: true` and the version but no evaluation fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    pub version: u64,
    pub flag: Value,
}

/// Transformer applied to updates of one kind before storage.
pub type KindProcessor = fn(Update) -> Update;

/// Dispatch table from object kind to processor. Updates whose kind has no
/// entry are dropped by the mapping layer.
pub fn kind_processors() -> HashMap<&'static str, KindProcessor> {
    let mut processors: HashMap<&'static str, KindProcessor> = HashMap::new();
    processors.insert(KIND_FLAG_EVAL, process_flag_eval);
    processors
}

/// Identity passthrough: the server has already evaluated the flag.
pub fn process_flag_eval(update: Update) -> Update {
    update
}

/// Converts one `flagEval` update into a descriptor. The envelope version
/// overrides both the descriptor version and any `version` field inside the
/// flag object.
pub fn flag_eval_update_to_item_descriptor(update: &Update) -> ItemDescriptor {
    if update.deleted {
        return ItemDescriptor {
            version: update.version,
            flag: json!({"version": update.version, "deleted": true}),
        };
    }

    let mut fields = match &update.object {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    fields.insert("version".to_string(), json!(update.version));

    ItemDescriptor {
        version: update.version,
        flag: Value::Object(fields),
    }
}

/// Builds the key -> descriptor map for a payload. Non-`flagEval` kinds are
/// ignored; the last update per key wins.
pub fn flag_eval_payload_to_item_descriptors(payload: &Payload) -> HashMap<String, ItemDescriptor> {
    let mut descriptors = HashMap::new();
    for update in &payload.updates {
        if update.kind != KIND_FLAG_EVAL {
            continue;
        }
        descriptors.insert(
            update.key.clone(),
            flag_eval_update_to_item_descriptor(update),
        );
    }
    descriptors
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadType;

    fn put_update(key: &str, version: u64, object: Value) -> Update {
        Update {
            kind: KIND_FLAG_EVAL.to_string(),
            key: key.to_string(),
            version,
            object: Some(object),
            deleted: false,
        }
    }

    #[test]
    fn test_put_spreads_evaluation_fields() {
        let update = put_update("flagA", 3, json!({"value": true, "trackEvents": false}));
        let descriptor = flag_eval_update_to_item_descriptor(&update);
        assert_eq!(descriptor.version, 3);
        assert_eq!(descriptor.flag["value"], json!(true));
        assert_eq!(descriptor.flag["trackEvents"], json!(false));
        assert_eq!(descriptor.flag["version"], json!(3));
    }

    #[test]
    fn test_envelope_version_overrides_object_version() {
        let update = put_update("flagA", 9, json!({"value": 1, "version": 2}));
        let descriptor = flag_eval_update_to_item_descriptor(&update);
        assert_eq!(descriptor.version, 9);
        assert_eq!(descriptor.flag["version"], json!(9));
    }

    #[test]
    fn test_delete_produces_tombstone() {
        let update = Update {
            kind: KIND_FLAG_EVAL.to_string(),
            key: "flagA".to_string(),
            version: 4,
            object: None,
            deleted: true,
        };
        let descriptor = flag_eval_update_to_item_descriptor(&update);
        assert_eq!(descriptor.flag["deleted"], json!(true));
        assert_eq!(descriptor.flag["version"], json!(4));
        assert!(descriptor.flag.get("value").is_none());
    }

    #[test]
    fn test_payload_mapping_filters_kinds_and_dedupes() {
        let payload = Payload {
            id: "p1".to_string(),
            version: 1,
            state: Some("s1".to_string()),
            payload_type: PayloadType::Full,
            updates: vec![
                put_update("flagA", 1, json!({"value": 1})),
                Update {
                    kind: "segment".to_string(),
                    key: "segA".to_string(),
                    version: 1,
                    object: Some(json!({})),
                    deleted: false,
                },
                put_update("flagA", 2, json!({"value": 2})),
            ],
        };
        let descriptors = flag_eval_payload_to_item_descriptors(&payload);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors["flagA"].version, 2);
        assert_eq!(descriptors["flagA"].flag["value"], json!(2));
    }

    #[test]
    fn test_dispatch_table_has_flag_eval() {
        let processors = kind_processors();
        let processor = processors[KIND_FLAG_EVAL];
        let update = put_update("flagA", 1, json!({"value": true}));
        assert_eq!(processor(update.clone()), update);
        assert!(!processors.contains_key("segment"));
    }
}
