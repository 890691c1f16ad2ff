// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Experiment definitions and assignment results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::Attributes;
use crate::condition::Condition;
use crate::feature::ParentCondition;
use crate::hash::{hash, HashVersion};
use crate::range::{bucket_ranges, BucketRange, Namespace};

pub const DEFAULT_HASH_ATTRIBUTE: &str = "id";

/// An A/B test: ordered variation values plus everything that decides which
/// subjects see which variation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Experiment {
	pub key: String,
	pub variations: Vec<Value>,
	/// Per-variation traffic split. Equal when absent or invalid.
	pub weights: Option<Vec<f64>>,
	pub active: bool,
	/// Fraction of eligible subjects included. Defaults to 1.
	pub coverage: Option<f64>,
	/// Explicit ranges, used instead of deriving them from weights.
	pub ranges: Option<Vec<BucketRange>>,
	pub condition: Option<Condition>,
	/// Prerequisites on other features. Like `condition`, skipped for
	/// subjects with a sticky assignment.
	pub parent_conditions: Vec<ParentCondition>,
	pub namespace: Option<Namespace>,
	pub filters: Vec<Filter>,
	/// Variation index served to everyone, bypassing hashing.
	pub force: Option<usize>,
	pub hash_attribute: Option<String>,
	pub fallback_attribute: Option<String>,
	pub hash_version: Option<u32>,
	/// Hashing seed. Defaults to the experiment key.
	pub seed: Option<String>,
	pub meta: Vec<VariationMeta>,
	pub name: Option<String>,
	pub phase: Option<String>,
	pub disable_sticky_bucketing: bool,
	pub bucket_version: u32,
	pub min_bucket_version: u32,
}

impl Default for Experiment {
	fn default() -> Self {
		Self {
			key: String::new(),
			variations: Vec::new(),
			weights: None,
			active: true,
			coverage: None,
			ranges: None,
			condition: None,
			parent_conditions: Vec::new(),
			namespace: None,
			filters: Vec::new(),
			force: None,
			hash_attribute: None,
			fallback_attribute: None,
			hash_version: None,
			seed: None,
			meta: Vec::new(),
			name: None,
			phase: None,
			disable_sticky_bucketing: false,
			bucket_version: 0,
			min_bucket_version: 0,
		}
	}
}

impl Experiment {
	pub fn new(key: impl Into<String>, variations: Vec<Value>) -> Self {
		Self {
			key: key.into(),
			variations,
			..Default::default()
		}
	}

	pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
		self.weights = Some(weights);
		self
	}

	pub fn with_coverage(mut self, coverage: f64) -> Self {
		self.coverage = Some(coverage);
		self
	}

	pub fn with_namespace(mut self, namespace: Namespace) -> Self {
		self.namespace = Some(namespace);
		self
	}

	pub fn with_condition(mut self, condition: Condition) -> Self {
		self.condition = Some(condition);
		self
	}

	pub fn with_parent_condition(mut self, parent: ParentCondition) -> Self {
		self.parent_conditions.push(parent);
		self
	}

	pub fn with_hash_attribute(mut self, attribute: impl Into<String>) -> Self {
		self.hash_attribute = Some(attribute.into());
		self
	}

	pub fn with_fallback_attribute(mut self, attribute: impl Into<String>) -> Self {
		self.fallback_attribute = Some(attribute.into());
		self
	}

	pub fn with_hash_version(mut self, version: HashVersion) -> Self {
		self.hash_version = Some(version.as_u32());
		self
	}

	pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
		self.seed = Some(seed.into());
		self
	}

	pub fn with_force(mut self, index: usize) -> Self {
		self.force = Some(index);
		self
	}

	pub fn with_meta(mut self, meta: Vec<VariationMeta>) -> Self {
		self.meta = meta;
		self
	}

	pub fn with_bucket_version(mut self, version: u32) -> Self {
		self.bucket_version = version;
		self
	}

	pub fn with_min_bucket_version(mut self, version: u32) -> Self {
		self.min_bucket_version = version;
		self
	}

	pub fn with_active(mut self, active: bool) -> Self {
		self.active = active;
		self
	}

	pub fn hash_attribute(&self) -> &str {
		self.hash_attribute.as_deref().unwrap_or(DEFAULT_HASH_ATTRIBUTE)
	}

	/// `None` when the definition names a version this engine does not know.
	pub fn hash_version(&self) -> Option<HashVersion> {
		match self.hash_version {
			None => Some(HashVersion::V1),
			Some(raw) => HashVersion::try_from(raw).ok(),
		}
	}

	pub fn seed(&self) -> &str {
		self.seed.as_deref().unwrap_or(&self.key)
	}

	/// The ranges used for bucketing.
	pub fn bucket_ranges(&self) -> Vec<BucketRange> {
		match &self.ranges {
			Some(ranges) => ranges.clone(),
			None => bucket_ranges(
				self.variations.len(),
				self.coverage.unwrap_or(1.0),
				self.weights.as_deref(),
			),
		}
	}

	/// Key under which a variation is recorded and tracked: its meta key, or
	/// its index.
	pub fn variation_key(&self, index: usize) -> String {
		self
			.meta
			.get(index)
			.and_then(|m| m.key.clone())
			.unwrap_or_else(|| index.to_string())
	}

	/// Inverse of [`Experiment::variation_key`].
	pub fn variation_index(&self, key: &str) -> Option<usize> {
		(0..self.variations.len()).find(|&i| self.variation_key(i) == key)
	}
}

/// Display and behaviour metadata for one variation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariationMeta {
	pub key: Option<String>,
	pub name: Option<String>,
	/// A passthrough variation counts the subject as enrolled without
	/// changing the feature value.
	pub passthrough: bool,
}

/// Excludes subjects whose hash falls outside every listed range. Filters
/// generalize namespaces.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
	#[serde(default)]
	pub seed: String,
	#[serde(default)]
	pub ranges: Vec<BucketRange>,
	#[serde(default)]
	pub attribute: Option<String>,
	#[serde(default)]
	pub hash_version: Option<u32>,
}

impl Filter {
	fn excludes(&self, attributes: &Attributes) -> bool {
		let attribute = self.attribute.as_deref().unwrap_or(DEFAULT_HASH_ATTRIBUTE);
		let Some(value) = attributes.hash_value(attribute) else {
			return true;
		};
		let Ok(version) = HashVersion::try_from(self.hash_version.unwrap_or(2)) else {
			return true;
		};
		let n = hash(&self.seed, &value, version);
		!self.ranges.iter().any(|range| range.contains(n))
	}
}

/// True when any filter excludes the subject.
pub fn is_filtered_out(filters: &[Filter], attributes: &Attributes) -> bool {
	filters.iter().any(|f| f.excludes(attributes))
}

/// The outcome of assigning a subject to an experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
	pub in_experiment: bool,
	/// Assigned variation. `None` when the subject is not enrolled.
	pub variation_id: Option<usize>,
	/// The assigned variation's value, or the first variation's when not enrolled.
	pub value: Value,
	pub hash_used: bool,
	pub hash_attribute: String,
	pub hash_value: Option<String>,
	/// Bucket value in `[0, 1)` when hashing ran.
	pub bucket: Option<f64>,
	pub feature_id: Option<String>,
	/// Variation key, see [`Experiment::variation_key`].
	pub key: String,
	pub name: Option<String>,
	pub passthrough: bool,
	pub sticky_bucket_used: bool,
}

impl ExperimentResult {
	/// A result for a subject who was not enrolled.
	pub fn not_enrolled(
		experiment: &Experiment,
		hash_attribute: &str,
		hash_value: Option<String>,
		feature_id: Option<&str>,
	) -> Self {
		Self {
			in_experiment: false,
			variation_id: None,
			value: experiment.variations.first().cloned().unwrap_or(Value::Null),
			hash_used: false,
			hash_attribute: hash_attribute.to_string(),
			hash_value,
			bucket: None,
			feature_id: feature_id.map(str::to_string),
			key: experiment.variation_key(0),
			name: experiment.meta.first().and_then(|m| m.name.clone()),
			passthrough: false,
			sticky_bucket_used: false,
		}
	}

	/// A result for a subject enrolled in variation `index`, which must be
	/// a valid variation.
	pub fn enrolled(
		experiment: &Experiment,
		index: usize,
		hash_attribute: &str,
		hash_value: Option<String>,
		feature_id: Option<&str>,
	) -> Self {
		let meta = experiment.meta.get(index);
		Self {
			in_experiment: true,
			variation_id: Some(index),
			value: experiment.variations.get(index).cloned().unwrap_or(Value::Null),
			hash_used: false,
			hash_attribute: hash_attribute.to_string(),
			hash_value,
			bucket: None,
			feature_id: feature_id.map(str::to_string),
			key: experiment.variation_key(index),
			name: meta.and_then(|m| m.name.clone()),
			passthrough: meta.is_some_and(|m| m.passthrough),
			sticky_bucket_used: false,
		}
	}
}
