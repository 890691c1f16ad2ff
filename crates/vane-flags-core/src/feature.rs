// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature definitions and resolution results.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::attributes::Attributes;
use crate::condition::Condition;
use crate::experiment::{Experiment, ExperimentResult, Filter, VariationMeta, DEFAULT_HASH_ATTRIBUTE};
use crate::hash::{hash, HashVersion};
use crate::range::{BucketRange, Namespace};
use crate::value::is_truthy;

/// A remotely configured flag: a default value and ordered targeting rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Feature {
	pub default_value: Value,
	pub rules: Vec<FeatureRule>,
}

impl Feature {
	pub fn new(default_value: impl Into<Value>) -> Self {
		Self {
			default_value: default_value.into(),
			rules: Vec::new(),
		}
	}

	pub fn with_rule(mut self, rule: FeatureRule) -> Self {
		self.rules.push(rule);
		self
	}

	/// Experiment rules without an explicit key use the feature key.
	pub(crate) fn bind_key(&mut self, feature_key: &str) {
		for rule in &mut self.rules {
			if let RuleAction::Experiment { experiment, .. } = &mut rule.action {
				if experiment.key.is_empty() {
					Arc::make_mut(experiment).key = feature_key.to_string();
				}
			}
		}
	}
}

/// One ordered entry of a feature.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RuleDefinition")]
pub struct FeatureRule {
	pub id: Option<String>,
	/// Targeting of force rules. Experiment rules keep theirs on the
	/// experiment.
	pub condition: Option<Condition>,
	pub parent_conditions: Vec<ParentCondition>,
	pub filters: Vec<Filter>,
	pub action: RuleAction,
}

/// What a rule does once its targeting passes.
#[derive(Debug, Clone, Default)]
pub enum RuleAction {
	/// Serve `value` to subjects inside the rollout.
	Force { value: Value, rollout: Rollout },
	/// Serve the assigned variation; `fallback` is served to subjects the
	/// experiment excludes.
	Experiment {
		experiment: Arc<Experiment>,
		fallback: Option<Value>,
	},
	/// Neither forces nor experiments. Skipped.
	#[default]
	Noop,
}

impl FeatureRule {
	pub fn force(value: impl Into<Value>) -> Self {
		Self {
			action: RuleAction::Force {
				value: value.into(),
				rollout: Rollout::default(),
			},
			..Default::default()
		}
	}

	pub fn experiment(experiment: Experiment) -> Self {
		Self {
			action: RuleAction::Experiment {
				experiment: Arc::new(experiment),
				fallback: None,
			},
			..Default::default()
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	/// Targeting for the rule. On an experiment rule the condition belongs to
	/// the experiment, so a subject with a sticky assignment bypasses it.
	pub fn with_condition(mut self, condition: Condition) -> Self {
		match &mut self.action {
			RuleAction::Experiment { experiment, .. } => Arc::make_mut(experiment).condition = Some(condition),
			_ => self.condition = Some(condition),
		}
		self
	}

	pub fn with_parent_condition(mut self, parent: ParentCondition) -> Self {
		self.parent_conditions.push(parent);
		self
	}

	pub fn with_filter(mut self, filter: Filter) -> Self {
		self.filters.push(filter);
		self
	}

	/// Sets the exclusion fallback of an experiment rule. No effect on other rules.
	pub fn with_fallback(mut self, value: impl Into<Value>) -> Self {
		if let RuleAction::Experiment { fallback, .. } = &mut self.action {
			*fallback = Some(value.into());
		}
		self
	}

	/// Sets the rollout of a force rule. No effect on other rules.
	pub fn with_rollout(mut self, new_rollout: Rollout) -> Self {
		if let RuleAction::Force { rollout, .. } = &mut self.action {
			*rollout = new_rollout;
		}
		self
	}
}

/// Partial rollout of a forced value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollout {
	pub range: Option<BucketRange>,
	pub coverage: Option<f64>,
	pub hash_attribute: Option<String>,
	pub fallback_attribute: Option<String>,
	pub seed: Option<String>,
	pub hash_version: Option<u32>,
}

impl Rollout {
	pub fn is_partial(&self) -> bool {
		self.range.is_some() || self.coverage.is_some()
	}

	/// Whether the subject falls inside the rollout. The seed defaults to the
	/// feature key. `use_fallback` enables the fallback attribute.
	pub fn includes(&self, attributes: &Attributes, feature_key: &str, use_fallback: bool) -> bool {
		if !self.is_partial() {
			return true;
		}
		if self.range.is_none() && self.coverage == Some(0.0) {
			return false;
		}

		let primary = self.hash_attribute.as_deref().unwrap_or(DEFAULT_HASH_ATTRIBUTE);
		let hash_value = attributes.hash_value(primary).or_else(|| {
			self
				.fallback_attribute
				.as_deref()
				.filter(|_| use_fallback)
				.and_then(|fallback| attributes.hash_value(fallback))
		});
		let Some(hash_value) = hash_value else {
			return false;
		};
		let Ok(version) = HashVersion::try_from(self.hash_version.unwrap_or(1)) else {
			return false;
		};

		let n = hash(self.seed.as_deref().unwrap_or(feature_key), &hash_value, version);
		match (&self.range, self.coverage) {
			(Some(range), _) => range.contains(n),
			(None, Some(coverage)) => n <= coverage,
			(None, None) => true,
		}
	}
}

/// A prerequisite: the parent feature's value, exposed as `{"value": ...}`,
/// must satisfy `condition`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentCondition {
	pub id: String,
	#[serde(default)]
	pub condition: Condition,
	/// A failing gate blocks the whole feature instead of skipping the rule.
	#[serde(default)]
	pub gate: bool,
}

impl ParentCondition {
	pub fn new(id: impl Into<String>, condition: Condition) -> Self {
		Self {
			id: id.into(),
			condition,
			gate: false,
		}
	}

	pub fn gated(mut self) -> Self {
		self.gate = true;
		self
	}
}

/// Rule shape as it appears in the definition payload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RuleDefinition {
	id: Option<String>,
	condition: Option<Condition>,
	parent_conditions: Vec<ParentCondition>,
	filters: Vec<Filter>,
	#[serde(deserialize_with = "present")]
	force: Option<Value>,
	#[serde(deserialize_with = "present")]
	fallback_value: Option<Value>,
	variations: Option<Vec<Value>>,
	key: Option<String>,
	weights: Option<Vec<f64>>,
	coverage: Option<f64>,
	range: Option<BucketRange>,
	ranges: Option<Vec<BucketRange>>,
	namespace: Option<Namespace>,
	hash_attribute: Option<String>,
	fallback_attribute: Option<String>,
	hash_version: Option<u32>,
	seed: Option<String>,
	meta: Vec<VariationMeta>,
	name: Option<String>,
	phase: Option<String>,
	disable_sticky_bucketing: bool,
	bucket_version: u32,
	min_bucket_version: u32,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
	D: Deserializer<'de>,
{
	Value::deserialize(deserializer).map(Some)
}

impl From<RuleDefinition> for FeatureRule {
	fn from(def: RuleDefinition) -> Self {
		let mut condition = def.condition;
		let action = match (def.force, def.variations) {
			(Some(value), _) => RuleAction::Force {
				value,
				rollout: Rollout {
					range: def.range,
					coverage: def.coverage,
					hash_attribute: def.hash_attribute,
					fallback_attribute: def.fallback_attribute,
					seed: def.seed,
					hash_version: def.hash_version,
				},
			},
			(None, Some(variations)) => RuleAction::Experiment {
				experiment: Arc::new(Experiment {
					key: def.key.unwrap_or_default(),
					variations,
					weights: def.weights,
					coverage: def.coverage,
					ranges: def.ranges,
					condition: condition.take(),
					namespace: def.namespace,
					hash_attribute: def.hash_attribute,
					fallback_attribute: def.fallback_attribute,
					hash_version: def.hash_version,
					seed: def.seed,
					meta: def.meta,
					name: def.name,
					phase: def.phase,
					disable_sticky_bucketing: def.disable_sticky_bucketing,
					bucket_version: def.bucket_version,
					min_bucket_version: def.min_bucket_version,
					..Default::default()
				}),
				fallback: def.fallback_value,
			},
			(None, None) => RuleAction::Noop,
		};

		Self {
			id: def.id,
			condition,
			parent_conditions: def.parent_conditions,
			filters: def.filters,
			action,
		}
	}
}

/// Why a feature resolved to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureSource {
	UnknownFeature,
	DefaultValue,
	Force,
	Experiment,
	/// A gated prerequisite failed.
	Prerequisite,
}

/// The resolved value of a feature for one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
	pub value: Value,
	pub source: FeatureSource,
	pub rule_id: Option<String>,
	pub experiment_key: Option<String>,
	pub experiment_result: Option<ExperimentResult>,
}

impl FeatureResult {
	pub fn new(value: Value, source: FeatureSource) -> Self {
		Self {
			value,
			source,
			rule_id: None,
			experiment_key: None,
			experiment_result: None,
		}
	}

	pub fn unknown() -> Self {
		Self::new(Value::Null, FeatureSource::UnknownFeature)
	}

	pub fn from_experiment(experiment: &Experiment, result: ExperimentResult) -> Self {
		Self {
			value: result.value.clone(),
			source: FeatureSource::Experiment,
			rule_id: None,
			experiment_key: Some(experiment.key.clone()),
			experiment_result: Some(result),
		}
	}

	pub fn with_rule_id(mut self, rule_id: Option<String>) -> Self {
		self.rule_id = rule_id;
		self
	}

	/// Truthiness of the value: `null`, `false`, `0` and `""` are off.
	pub fn on(&self) -> bool {
		is_truthy(&self.value)
	}

	pub fn off(&self) -> bool {
		!self.on()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn force_rule_keeps_explicit_null() {
		let rule: FeatureRule = serde_json::from_value(json!({"force": null})).unwrap();
		assert!(matches!(rule.action, RuleAction::Force { ref value, .. } if value.is_null()));

		let noop: FeatureRule = serde_json::from_value(json!({"id": "r1"})).unwrap();
		assert!(matches!(noop.action, RuleAction::Noop));
		assert_eq!(noop.id.as_deref(), Some("r1"));
	}

	#[test]
	fn experiment_rule_carries_fields() {
		let rule: FeatureRule = serde_json::from_value(json!({
			"variations": ["a", "b"],
			"weights": [0.1, 0.9],
			"coverage": 0.5,
			"hashAttribute": "deviceId",
			"namespace": ["ns", 0, 0.5],
			"fallbackValue": "c",
			"condition": {"country": "US"},
		}))
		.unwrap();
		let RuleAction::Experiment { experiment, fallback } = &rule.action else {
			panic!("expected experiment rule");
		};
		assert_eq!(experiment.key, "");
		assert_eq!(experiment.weights, Some(vec![0.1, 0.9]));
		assert_eq!(experiment.coverage, Some(0.5));
		assert_eq!(experiment.hash_attribute(), "deviceId");
		assert_eq!(fallback, &Some(json!("c")));
		assert!(experiment.condition.is_some());
		assert!(rule.condition.is_none());
	}

	#[test]
	fn bind_key_fills_missing_experiment_keys() {
		let mut feature: Feature = serde_json::from_value(json!({
			"defaultValue": false,
			"rules": [{"variations": [false, true]}, {"key": "explicit", "variations": [0, 1]}],
		}))
		.unwrap();
		feature.bind_key("my-feature");

		let keys: Vec<_> = feature
			.rules
			.iter()
			.filter_map(|r| match &r.action {
				RuleAction::Experiment { experiment, .. } => Some(experiment.key.clone()),
				_ => None,
			})
			.collect();
		assert_eq!(keys, vec!["my-feature", "explicit"]);
	}

	#[test]
	fn rollout_without_range_or_coverage_includes_everyone() {
		assert!(Rollout::default().includes(&Attributes::default(), "f", false));
	}

	#[test]
	fn rollout_coverage() {
		let attributes = Attributes::default().with("id", "1");
		let full = Rollout {
			coverage: Some(1.0),
			..Default::default()
		};
		let none = Rollout {
			coverage: Some(0.0),
			..Default::default()
		};
		assert!(full.includes(&attributes, "f", false));
		assert!(!none.includes(&attributes, "f", false));
		assert!(!full.includes(&Attributes::default(), "f", false));
	}

	#[test]
	fn rollout_range_and_fallback_attribute() {
		// hash("my-test", "1", v1) = 0.969
		let rollout = Rollout {
			range: Some(BucketRange::new(0.9, 1.0)),
			seed: Some("my-test".to_string()),
			fallback_attribute: Some("deviceId".to_string()),
			..Default::default()
		};
		assert!(rollout.includes(&Attributes::default().with("id", "1"), "f", false));

		let device_only = Attributes::default().with("deviceId", "1");
		assert!(!rollout.includes(&device_only, "f", false));
		assert!(rollout.includes(&device_only, "f", true));
	}

	#[test]
	fn result_truthiness() {
		assert!(FeatureResult::new(json!("on"), FeatureSource::Force).on());
		assert!(FeatureResult::new(json!(0), FeatureSource::Force).off());
		assert!(FeatureResult::unknown().off());
	}

	#[test]
	fn source_serializes_camel_case() {
		assert_eq!(serde_json::to_value(FeatureSource::UnknownFeature).unwrap(), json!("unknownFeature"));
		assert_eq!(serde_json::to_value(FeatureSource::DefaultValue).unwrap(), json!("defaultValue"));
	}
}
