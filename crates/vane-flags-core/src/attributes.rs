// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subject attributes and dot-path lookup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// The document describing the subject being evaluated.
///
/// Attributes are read-only during evaluation. Lookups never fail; a path
/// that does not resolve yields `None`, which conditions treat as undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Value);

impl Default for Attributes {
	fn default() -> Self {
		Self(Value::Object(Map::new()))
	}
}

impl Attributes {
	pub fn new(root: Value) -> Self {
		Self(root)
	}

	pub fn from_json(json: &str) -> Result<Self> {
		Ok(Self(serde_json::from_str(json)?))
	}

	/// Sets a top-level attribute. A non-object root is replaced by an object.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		if !self.0.is_object() {
			self.0 = Value::Object(Map::new());
		}
		if let Value::Object(map) = &mut self.0 {
			map.insert(key.into(), value.into());
		}
		self
	}

	pub fn as_value(&self) -> &Value {
		&self.0
	}

	/// Resolves a dot-separated path such as `company.plan`.
	pub fn get(&self, path: &str) -> Option<&Value> {
		lookup_path(&self.0, path)
	}

	/// The string form of an attribute used for hashing, or `None` when the
	/// attribute is missing, not a scalar, or empty.
	pub fn hash_value(&self, attribute: &str) -> Option<String> {
		self.get(attribute).and_then(scalar_string).filter(|s| !s.is_empty())
	}
}

impl From<Value> for Attributes {
	fn from(root: Value) -> Self {
		Self(root)
	}
}

/// Walks `path` one object key at a time. Arrays are not indexed by segment.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
	path.split('.').try_fold(root, |current, segment| match current {
		Value::Object(map) => map.get(segment),
		_ => None,
	})
}

/// String form of a scalar JSON value.
pub fn scalar_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(b.to_string()),
		Value::Null | Value::Array(_) | Value::Object(_) => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn nested_lookup() {
		let attrs = Attributes::new(json!({"company": {"plan": "pro", "seats": 12}}));
		assert_eq!(attrs.get("company.plan"), Some(&json!("pro")));
		assert_eq!(attrs.get("company.seats"), Some(&json!(12)));
		assert_eq!(attrs.get("company.missing"), None);
		assert_eq!(attrs.get("company.plan.deeper"), None);
	}

	#[test]
	fn arrays_are_not_traversed() {
		let attrs = Attributes::new(json!({"tags": [{"name": "a"}]}));
		assert_eq!(attrs.get("tags.0.name"), None);
		assert_eq!(attrs.get("tags.0"), None);
	}

	#[test]
	fn explicit_null_is_present() {
		let attrs = Attributes::new(json!({"email": null}));
		assert_eq!(attrs.get("email"), Some(&Value::Null));
	}

	#[test]
	fn hash_value_stringifies_scalars() {
		let attrs = Attributes::default()
			.with("id", "u1")
			.with("num", 123)
			.with("flag", true)
			.with("empty", "")
			.with("list", json!([1, 2]));
		assert_eq!(attrs.hash_value("id").as_deref(), Some("u1"));
		assert_eq!(attrs.hash_value("num").as_deref(), Some("123"));
		assert_eq!(attrs.hash_value("flag").as_deref(), Some("true"));
		assert_eq!(attrs.hash_value("empty"), None);
		assert_eq!(attrs.hash_value("list"), None);
		assert_eq!(attrs.hash_value("missing"), None);
	}

	#[test]
	fn with_replaces_non_object_root() {
		let attrs = Attributes::new(json!("scalar")).with("id", "1");
		assert_eq!(attrs.as_value(), &json!({"id": "1"}));
	}
}
