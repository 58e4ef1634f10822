//! JSON value ⇄ DynamoDB attribute conversion
//!
//! Items cross this crate's boundary as JSON-shaped attribute maps; the
//! wire uses `AttributeValue`. Binary and set attribute types have no JSON
//! shape here and are skipped when reading.

use aws_sdk_dynamodb::types::AttributeValue;
use corral_store::Item;
use serde_json::Value;
use std::collections::HashMap;

/// Convert a JSON value to its DynamoDB attribute representation
pub fn value_to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(list) => AttributeValue::L(list.iter().map(value_to_attr).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_attr(v)))
                .collect(),
        ),
    }
}

/// Convert a DynamoDB attribute to a JSON value.
///
/// Returns `None` for attribute types without a JSON shape (binary, sets).
pub fn attr_to_value(attr: &AttributeValue) -> Option<Value> {
    match attr {
        AttributeValue::S(s) => Some(Value::String(s.clone())),
        AttributeValue::N(n) => {
            // Prefer integer representation, fall back to float.
            if let Ok(i) = n.parse::<i64>() {
                Some(Value::from(i))
            } else if let Ok(f) = n.parse::<f64>() {
                serde_json::Number::from_f64(f).map(Value::Number)
            } else {
                None
            }
        }
        AttributeValue::Bool(b) => Some(Value::Bool(*b)),
        AttributeValue::Null(_) => Some(Value::Null),
        AttributeValue::L(list) => {
            Some(Value::Array(list.iter().filter_map(attr_to_value).collect()))
        }
        AttributeValue::M(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| attr_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        _ => None,
    }
}

/// Convert an item to its wire attribute map
pub fn item_to_attrs(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(k, v)| (k.clone(), value_to_attr(v)))
        .collect()
}

/// Convert a wire attribute map back to an item
pub fn attrs_to_item(attrs: &HashMap<String, AttributeValue>) -> Item {
    attrs
        .iter()
        .filter_map(|(k, v)| attr_to_value(v).map(|v| (k.clone(), v)))
        .collect()
}
