//! Structural merge for partial table updates.
//!
//! Objects merge key by key, everything else (arrays, scalars, null)
//! replaces the existing value outright. Seat and pot lists always arrive
//! complete, so arrays are never merged element-wise.

use serde_json::{Map, Value};

pub fn deep_merge(target: &mut Value, patch: Value) {
	match patch {
		Value::Object(incoming) => {
			if !target.is_object() {
				*target = Value::Object(Map::new());
			}
			if let Value::Object(existing) = target {
				merge_objects(existing, incoming);
			}
		}
		other => *target = other,
	}
}

fn merge_objects(existing: &mut Map<String, Value>, incoming: Map<String, Value>) {
	for (key, value) in incoming {
		let nested = value.is_object() && existing.get(&key).is_some_and(Value::is_object);
		match existing.get_mut(&key) {
			Some(slot) if nested => deep_merge(slot, value),
			_ => {
				existing.insert(key, value);
			}
		}
	}
}
