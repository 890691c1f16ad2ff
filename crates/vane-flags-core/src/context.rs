// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-call evaluation state.
//!
//! An [`EvaluationContext`] carries everything that is specific to one
//! subject: attributes, overrides, the sticky documents loaded for it, and
//! the notifications produced while evaluating. The engine never calls
//! collaborators itself; callers drain [`EvaluationContext::take_notifications`]
//! and dispatch them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::attributes::Attributes;
use crate::experiment::{Experiment, ExperimentResult};
use crate::feature::FeatureResult;
use crate::sticky::{StickyAssignmentsDocument, StickyDocuments};

/// Query-string prefix for forcing a feature value, e.g. `?gb~checkout=true`.
pub const URL_FEATURE_PREFIX: &str = "gb~";

/// Engine-wide switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
	/// When false no subject is enrolled in any experiment.
	pub enabled: bool,
	/// Enrol nobody unless a variation is forced.
	pub qa_mode: bool,
	/// Honour `?gb~<feature>=<value>` overrides from the context URL.
	pub allow_url_overrides: bool,
	pub sticky_bucketing: bool,
}

impl Default for EvaluationOptions {
	fn default() -> Self {
		Self {
			enabled: true,
			qa_mode: false,
			allow_url_overrides: false,
			sticky_bucketing: false,
		}
	}
}

/// An experiment exposure waiting to be reported to the tracking hook.
#[derive(Debug, Clone)]
pub struct ExperimentExposure {
	pub experiment: Arc<Experiment>,
	pub result: ExperimentResult,
}

impl ExperimentExposure {
	/// Identity of an exposure for deduplication across calls. Re-evaluating
	/// an unchanged assignment yields the same key.
	pub fn tracking_key(&self) -> String {
		format!(
			"{}|{}|{}|{}|{}",
			self.result.feature_id.as_deref().unwrap_or_default(),
			self.experiment.key,
			self.result.hash_attribute,
			self.result.hash_value.as_deref().unwrap_or_default(),
			self.result.key,
		)
	}
}

/// Side effects requested by an evaluation.
#[derive(Debug, Clone)]
pub enum Notification {
	ExperimentViewed(ExperimentExposure),
	FeatureUsage {
		feature_key: String,
		result: FeatureResult,
	},
	/// A sticky document changed and should be persisted.
	StickySave(StickyAssignmentsDocument),
}

/// Everything the engine knows about one subject.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
	pub attributes: Attributes,
	/// Feature values that bypass all rules.
	pub forced_features: HashMap<String, Value>,
	/// Experiment key to variation index.
	pub forced_variations: HashMap<String, usize>,
	/// Page URL, read for query-string overrides.
	pub url: Option<Url>,
	pub sticky_documents: StickyDocuments,
	sticky_loaded: bool,
	in_flight: HashSet<String>,
	tracked: HashSet<(String, String)>,
	notifications: Vec<Notification>,
}

impl EvaluationContext {
	pub fn new(attributes: Attributes) -> Self {
		Self {
			attributes,
			..Default::default()
		}
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.attributes = self.attributes.with(key, value);
		self
	}

	pub fn with_forced_feature(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.forced_features.insert(key.into(), value.into());
		self
	}

	pub fn with_forced_variation(mut self, experiment_key: impl Into<String>, index: usize) -> Self {
		self.forced_variations.insert(experiment_key.into(), index);
		self
	}

	pub fn with_url(mut self, url: Url) -> Self {
		self.url = Some(url);
		self
	}

	pub fn with_sticky_documents(mut self, docs: StickyDocuments) -> Self {
		self.set_sticky_documents(docs);
		self
	}

	/// Installs loaded sticky documents and marks them as loaded.
	pub fn set_sticky_documents(&mut self, docs: StickyDocuments) {
		self.sticky_documents = docs;
		self.sticky_loaded = true;
	}

	/// Whether sticky documents were loaded for this context, even if none existed.
	pub fn sticky_loaded(&self) -> bool {
		self.sticky_loaded
	}

	/// Drains the notifications produced so far.
	pub fn take_notifications(&mut self) -> Vec<Notification> {
		std::mem::take(&mut self.notifications)
	}

	/// Value of a query-string parameter from the context URL.
	pub fn query_param(&self, name: &str) -> Option<String> {
		self
			.url
			.as_ref()?
			.query_pairs()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.into_owned())
	}

	/// Variation index forced through `?<experimentKey>=<index>`.
	pub(crate) fn query_variation(&self, experiment_key: &str, variations: usize) -> Option<usize> {
		self
			.query_param(experiment_key)?
			.parse::<usize>()
			.ok()
			.filter(|&i| i < variations)
	}

	/// Resets per-call state before a top-level evaluation.
	pub(crate) fn begin_call(&mut self) {
		self.in_flight.clear();
		self.tracked.clear();
	}

	/// Marks a feature as being resolved. False when it already was, which
	/// means a cycle.
	pub(crate) fn enter(&mut self, feature_key: &str) -> bool {
		self.in_flight.insert(feature_key.to_string())
	}

	pub(crate) fn leave(&mut self, feature_key: &str) {
		self.in_flight.remove(feature_key);
	}

	pub(crate) fn notify(&mut self, notification: Notification) {
		self.notifications.push(notification);
	}

	/// Queues an exposure once per feature and experiment within a call.
	pub(crate) fn track(&mut self, experiment: &Arc<Experiment>, result: &ExperimentResult) {
		let slot = (
			result.feature_id.clone().unwrap_or_default(),
			experiment.key.clone(),
		);
		if self.tracked.insert(slot) {
			self.notify(Notification::ExperimentViewed(ExperimentExposure {
				experiment: Arc::clone(experiment),
				result: result.clone(),
			}));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn builder_sets_overrides() {
		let ctx = EvaluationContext::new(Attributes::default())
			.with_attribute("id", "u1")
			.with_forced_feature("f", true)
			.with_forced_variation("exp", 1);
		assert_eq!(ctx.attributes.get("id"), Some(&json!("u1")));
		assert_eq!(ctx.forced_features.get("f"), Some(&json!(true)));
		assert_eq!(ctx.forced_variations.get("exp"), Some(&1));
		assert!(!ctx.sticky_loaded());
	}

	#[test]
	fn query_variation_requires_valid_index() {
		let url = Url::parse("https://example.com/page?exp=1&other=7&bad=x").unwrap();
		let ctx = EvaluationContext::default().with_url(url);
		assert_eq!(ctx.query_variation("exp", 2), Some(1));
		assert_eq!(ctx.query_variation("other", 2), None);
		assert_eq!(ctx.query_variation("bad", 2), None);
		assert_eq!(ctx.query_variation("missing", 2), None);
	}

	#[test]
	fn query_param_decodes_values() {
		let url = Url::parse("https://example.com/?gb~color=dark%20blue").unwrap();
		let ctx = EvaluationContext::default().with_url(url);
		assert_eq!(ctx.query_param("gb~color").as_deref(), Some("dark blue"));
	}

	#[test]
	fn cycle_guard() {
		let mut ctx = EvaluationContext::default();
		assert!(ctx.enter("a"));
		assert!(!ctx.enter("a"));
		ctx.leave("a");
		assert!(ctx.enter("a"));
		ctx.begin_call();
		assert!(ctx.enter("a"));
	}

	#[test]
	fn tracking_is_deduplicated_per_call() {
		let experiment = Arc::new(Experiment::new("exp", vec![json!(0), json!(1)]));
		let result = ExperimentResult::enrolled(&experiment, 1, "id", Some("u1".to_string()), Some("f"));
		let mut ctx = EvaluationContext::default();

		ctx.track(&experiment, &result);
		ctx.track(&experiment, &result);
		assert_eq!(ctx.take_notifications().len(), 1);

		ctx.begin_call();
		ctx.track(&experiment, &result);
		assert_eq!(ctx.take_notifications().len(), 1);
	}

	#[test]
	fn tracking_key_identifies_assignment() {
		let experiment = Arc::new(Experiment::new("exp", vec![json!(0), json!(1)]));
		let result = ExperimentResult::enrolled(&experiment, 1, "id", Some("u1".to_string()), Some("f"));
		let exposure = ExperimentExposure { experiment, result };
		assert_eq!(exposure.tracking_key(), "f|exp|id|u1|1");
	}
}
