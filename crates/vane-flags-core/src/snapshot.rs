// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable definition snapshots.
//!
//! A [`FeatureSnapshot`] is built once per definitions refresh. Conditions are
//! compiled while parsing, so evaluation never re-inspects raw JSON.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::warn;

use crate::condition::SavedGroups;
use crate::error::{FlagsError, Result};
use crate::experiment::DEFAULT_HASH_ATTRIBUTE;
use crate::feature::{Feature, RuleAction};

/// Every feature definition plus the saved groups their conditions reference.
#[derive(Debug, Clone, Default)]
pub struct FeatureSnapshot {
	features: HashMap<String, Feature>,
	saved_groups: SavedGroups,
}

impl FeatureSnapshot {
	pub fn new(features: HashMap<String, Feature>) -> Self {
		let mut snapshot = Self::default();
		for (key, feature) in features {
			snapshot = snapshot.with_feature(key, feature);
		}
		snapshot
	}

	/// Parses a definitions payload of the form
	/// `{"features": {...}, "savedGroups": {...}}`.
	pub fn from_json(json: &str) -> Result<Self> {
		let value: Value = serde_json::from_str(json)?;
		Self::from_value(value)
	}

	/// Like [`FeatureSnapshot::from_json`]. A feature that fails to parse is
	/// skipped with a warning rather than failing the whole payload.
	pub fn from_value(value: Value) -> Result<Self> {
		let Value::Object(mut root) = value else {
			return Err(FlagsError::InvalidPayload("payload is not an object".to_string()));
		};

		let mut snapshot = Self::default();
		match root.remove("features") {
			Some(Value::Object(features)) => {
				for (key, raw) in features {
					match serde_json::from_value::<Feature>(raw) {
						Ok(feature) => snapshot = snapshot.with_feature(key, feature),
						Err(e) => warn!(feature_key = %key, error = %e, "skipping malformed feature"),
					}
				}
			}
			None | Some(Value::Null) => {}
			Some(_) => {
				return Err(FlagsError::InvalidPayload("features is not an object".to_string()));
			}
		}

		if let Some(groups) = root.remove("savedGroups") {
			match serde_json::from_value::<SavedGroups>(groups) {
				Ok(groups) => snapshot.saved_groups = groups,
				Err(e) => warn!(error = %e, "ignoring malformed saved groups"),
			}
		}

		Ok(snapshot)
	}

	pub fn with_feature(mut self, key: impl Into<String>, mut feature: Feature) -> Self {
		let key = key.into();
		feature.bind_key(&key);
		self.features.insert(key, feature);
		self
	}

	pub fn with_saved_groups(mut self, saved_groups: SavedGroups) -> Self {
		self.saved_groups = saved_groups;
		self
	}

	pub fn feature(&self, key: &str) -> Option<&Feature> {
		self.features.get(key)
	}

	pub fn features(&self) -> &HashMap<String, Feature> {
		&self.features
	}

	pub fn saved_groups(&self) -> &SavedGroups {
		&self.saved_groups
	}

	pub fn len(&self) -> usize {
		self.features.len()
	}

	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}

	/// Attributes that sticky documents may be keyed by: every experiment
	/// rule's hash attribute and fallback attribute, sorted.
	pub fn sticky_identifier_attributes(&self) -> Vec<String> {
		let mut attributes = BTreeSet::new();
		for feature in self.features.values() {
			for rule in &feature.rules {
				let RuleAction::Experiment { experiment, .. } = &rule.action else {
					continue;
				};
				attributes.insert(
					experiment
						.hash_attribute
						.clone()
						.unwrap_or_else(|| DEFAULT_HASH_ATTRIBUTE.to_string()),
				);
				if let Some(fallback) = &experiment.fallback_attribute {
					attributes.insert(fallback.clone());
				}
			}
		}
		attributes.into_iter().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_features_and_saved_groups() {
		let snapshot = FeatureSnapshot::from_value(json!({
			"features": {
				"checkout": {"defaultValue": false, "rules": [{"force": true}]},
				"banner": {"defaultValue": "blue"},
			},
			"savedGroups": {"beta": ["u1", "u2"]},
		}))
		.unwrap();
		assert_eq!(snapshot.len(), 2);
		assert_eq!(snapshot.feature("banner").unwrap().default_value, json!("blue"));
		assert_eq!(snapshot.saved_groups().get("beta").map(Vec::len), Some(2));
	}

	#[test]
	fn missing_features_is_empty() {
		let snapshot = FeatureSnapshot::from_json("{}").unwrap();
		assert!(snapshot.is_empty());
	}

	#[test]
	fn rejects_non_object_payloads() {
		assert!(matches!(
			FeatureSnapshot::from_value(json!([1, 2])),
			Err(FlagsError::InvalidPayload(_))
		));
		assert!(matches!(
			FeatureSnapshot::from_value(json!({"features": 3})),
			Err(FlagsError::InvalidPayload(_))
		));
		assert!(matches!(FeatureSnapshot::from_json("{"), Err(FlagsError::Serialization(_))));
	}

	#[test]
	fn malformed_feature_is_skipped() {
		let snapshot = FeatureSnapshot::from_value(json!({
			"features": {
				"good": {"defaultValue": 1},
				"bad": {"rules": "not a list"},
			},
		}))
		.unwrap();
		assert!(snapshot.feature("good").is_some());
		assert!(snapshot.feature("bad").is_none());
	}

	#[test]
	fn experiment_rules_take_the_feature_key() {
		let snapshot = FeatureSnapshot::from_value(json!({
			"features": {"pricing": {"rules": [{"variations": [1, 2]}]}},
		}))
		.unwrap();
		let RuleAction::Experiment { experiment, .. } = &snapshot.feature("pricing").unwrap().rules[0].action else {
			panic!("expected experiment rule");
		};
		assert_eq!(experiment.key, "pricing");
	}

	#[test]
	fn collects_sticky_identifier_attributes() {
		let snapshot = FeatureSnapshot::from_value(json!({
			"features": {
				"a": {"rules": [{"variations": [0, 1]}]},
				"b": {"rules": [{"variations": [0, 1], "hashAttribute": "company", "fallbackAttribute": "deviceId"}]},
				"c": {"rules": [{"force": 1, "hashAttribute": "ignored"}]},
			},
		}))
		.unwrap();
		assert_eq!(snapshot.sticky_identifier_attributes(), vec!["company", "deviceId", "id"]);
	}
}
