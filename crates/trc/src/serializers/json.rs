/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use serde_json::{Map, Number};

use crate::{Key, Value};

pub fn keys_to_json(keys: &[(Key, Value)]) -> serde_json::Value {
    let mut map = Map::with_capacity(keys.len());
    for (key, value) in keys {
        if !matches!(value, Value::None) {
            map.insert(key.name().to_string(), value_to_json(value));
        }
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Static(value) => serde_json::Value::String(value.to_string()),
        Value::String(value) => serde_json::Value::String(value.to_string()),
        Value::UInt(value) => serde_json::Value::Number(Number::from(*value)),
        Value::Int(value) => serde_json::Value::Number(Number::from(*value)),
        Value::Bool(value) => serde_json::Value::Bool(*value),
        Value::Event(event) => {
            let mut map = Map::with_capacity(2);
            map.insert(
                "event".to_string(),
                serde_json::Value::String(event.inner.name().to_string()),
            );
            map.insert("keys".to_string(), keys_to_json(&event.keys));
            serde_json::Value::Object(map)
        }
        Value::Array(values) => {
            serde_json::Value::Array(values.iter().map(value_to_json).collect())
        }
        Value::None => serde_json::Value::Null,
    }
}
