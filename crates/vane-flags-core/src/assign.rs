// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Experiment assignment.
//!
//! [`ExperimentAssigner::assign`] runs the short-circuiting pipeline that
//! decides whether a subject is enrolled and in which variation:
//!
//! 1. Disabled engine, inactive experiment, or fewer than two variations.
//! 2. Query-string and context forced variations.
//! 3. QA mode.
//! 4. Hash attribute resolution, with the fallback attribute when sticky
//!    bucketing applies.
//! 5. Sticky lookup.
//! 6. Filters, or the namespace when no filters are set. Excluding a subject
//!    who has a recorded assignment overwrites it with the blocked marker.
//! 7. Experiment condition and prerequisites, skipped for sticky hits.
//! 8. Hashing and range lookup, unless a sticky hit supplies the variation.
//! 9. Recording the assignment and queueing the exposure.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::condition::SavedGroups;
use crate::context::{EvaluationContext, EvaluationOptions, Notification};
use crate::experiment::{is_filtered_out, Experiment, ExperimentResult};
use crate::feature::ParentCondition;
use crate::hash::hash;
use crate::range::{choose_variation, in_namespace};
use crate::sticky::{self, assignment_key, StickyKey, BLOCKED_VARIATION};

/// Assigns subjects to experiments against one set of options and saved groups.
#[derive(Debug, Clone, Copy)]
pub struct ExperimentAssigner<'a> {
	options: EvaluationOptions,
	saved_groups: &'a SavedGroups,
}

/// The identifier a subject is hashed on.
struct Subject {
	attribute: String,
	value: String,
}

impl<'a> ExperimentAssigner<'a> {
	pub fn new(options: EvaluationOptions, saved_groups: &'a SavedGroups) -> Self {
		Self {
			options,
			saved_groups,
		}
	}

	/// Assigns without access to other features. An experiment with
	/// prerequisites excludes every subject that reaches that check.
	pub fn assign(
		&self,
		experiment: &Arc<Experiment>,
		feature_id: Option<&str>,
		ctx: &mut EvaluationContext,
	) -> ExperimentResult {
		self.assign_with_prerequisites(experiment, feature_id, ctx, |parents, _| parents.is_empty())
	}

	/// Assigns, asking `prerequisites_met` whether the experiment's parent
	/// conditions hold for the subject.
	pub fn assign_with_prerequisites<F>(
		&self,
		experiment: &Arc<Experiment>,
		feature_id: Option<&str>,
		ctx: &mut EvaluationContext,
		mut prerequisites_met: F,
	) -> ExperimentResult
	where
		F: FnMut(&[ParentCondition], &mut EvaluationContext) -> bool,
	{
		let primary = experiment.hash_attribute();
		let excluded = |hash_attribute: &str, hash_value: Option<String>| {
			ExperimentResult::not_enrolled(experiment, hash_attribute, hash_value, feature_id)
		};

		if !self.options.enabled || !experiment.active || experiment.variations.len() < 2 {
			return excluded(primary, ctx.attributes.hash_value(primary));
		}

		if let Some(index) = self.forced_variation(experiment, ctx) {
			debug!(experiment_key = %experiment.key, index, "forced variation");
			return ExperimentResult::enrolled(
				experiment,
				index,
				primary,
				ctx.attributes.hash_value(primary),
				feature_id,
			);
		}

		if self.options.qa_mode {
			return excluded(primary, ctx.attributes.hash_value(primary));
		}

		let sticky_enabled = self.options.sticky_bucketing && !experiment.disable_sticky_bucketing;
		let Some(subject) = self.subject(experiment, ctx, sticky_enabled) else {
			debug!(experiment_key = %experiment.key, "no hash attribute value");
			return excluded(primary, None);
		};

		let mut sticky_index = None;
		let mut sticky_blocked = false;
		if sticky_enabled {
			let resolution = self.sticky_lookup(experiment, ctx);
			sticky_blocked = resolution.is_blocked();
			if let Some(key) = resolution.variation {
				sticky_index = experiment.variation_index(&key);
				if sticky_index.is_none() {
					debug!(experiment_key = %experiment.key, variation = %key, "stale sticky variation, rehashing");
				}
			}
		}

		if self.is_excluded(experiment, &subject.value, ctx) {
			if sticky_index.is_some() {
				self.record(experiment, &subject, BLOCKED_VARIATION, ctx);
			}
			return excluded(&subject.attribute, Some(subject.value));
		}

		if sticky_blocked {
			debug!(experiment_key = %experiment.key, "sticky assignment blocked");
			let mut result = excluded(&subject.attribute, Some(subject.value));
			result.sticky_bucket_used = true;
			return result;
		}

		if sticky_index.is_none() {
			if let Some(condition) = &experiment.condition {
				if !condition.evaluate_with_groups(&ctx.attributes, self.saved_groups) {
					return excluded(&subject.attribute, Some(subject.value));
				}
			}
			if !experiment.parent_conditions.is_empty() && !prerequisites_met(&experiment.parent_conditions, ctx) {
				debug!(experiment_key = %experiment.key, "prerequisite failed");
				return excluded(&subject.attribute, Some(subject.value));
			}
		}

		let Some(version) = experiment.hash_version() else {
			warn!(
				experiment_key = %experiment.key,
				hash_version = ?experiment.hash_version,
				"unsupported hash version"
			);
			return excluded(&subject.attribute, Some(subject.value));
		};
		let bucket = hash(experiment.seed(), &subject.value, version);

		let index = match sticky_index {
			Some(index) => index,
			None => match choose_variation(bucket, &experiment.bucket_ranges()) {
				Some(index) if index < experiment.variations.len() => index,
				Some(index) => {
					debug!(experiment_key = %experiment.key, index, "bucket range has no variation");
					return excluded(&subject.attribute, Some(subject.value));
				}
				None => return excluded(&subject.attribute, Some(subject.value)),
			},
		};

		if let Some(forced) = experiment.force {
			if forced >= experiment.variations.len() {
				return excluded(&subject.attribute, Some(subject.value));
			}
			return ExperimentResult::enrolled(
				experiment,
				forced,
				&subject.attribute,
				Some(subject.value),
				feature_id,
			);
		}

		let mut result = ExperimentResult::enrolled(
			experiment,
			index,
			&subject.attribute,
			Some(subject.value.clone()),
			feature_id,
		);
		result.hash_used = true;
		result.bucket = Some(bucket);
		result.sticky_bucket_used = sticky_index.is_some();

		if sticky_enabled {
			self.record(experiment, &subject, &result.key, ctx);
		}
		ctx.track(experiment, &result);
		result
	}

	fn forced_variation(&self, experiment: &Experiment, ctx: &EvaluationContext) -> Option<usize> {
		let variations = experiment.variations.len();
		ctx
			.query_variation(&experiment.key, variations)
			.or_else(|| ctx.forced_variations.get(&experiment.key).copied())
			.filter(|&index| index < variations)
	}

	/// Primary hash attribute, or the fallback attribute when sticky
	/// bucketing applies and the primary is empty.
	fn subject(&self, experiment: &Experiment, ctx: &EvaluationContext, sticky_enabled: bool) -> Option<Subject> {
		let primary = experiment.hash_attribute();
		if let Some(value) = ctx.attributes.hash_value(primary) {
			return Some(Subject {
				attribute: primary.to_string(),
				value,
			});
		}
		if !sticky_enabled {
			return None;
		}
		let fallback = experiment.fallback_attribute.as_deref()?;
		ctx.attributes.hash_value(fallback).map(|value| Subject {
			attribute: fallback.to_string(),
			value,
		})
	}

	fn sticky_lookup(&self, experiment: &Experiment, ctx: &EvaluationContext) -> sticky::StickyResolution {
		let primary_attribute = experiment.hash_attribute();
		let primary_value = ctx.attributes.hash_value(primary_attribute);
		let fallback_attribute = experiment.fallback_attribute.as_deref();
		let fallback_value = fallback_attribute.and_then(|attr| ctx.attributes.hash_value(attr));

		let key = StickyKey {
			experiment_key: &experiment.key,
			bucket_version: experiment.bucket_version,
			min_bucket_version: experiment.min_bucket_version,
		};
		sticky::resolve(
			&ctx.sticky_documents,
			key,
			primary_value.as_deref().map(|value| (primary_attribute, value)),
			fallback_attribute.zip(fallback_value.as_deref()),
		)
	}

	fn is_excluded(&self, experiment: &Experiment, hash_value: &str, ctx: &EvaluationContext) -> bool {
		if !experiment.filters.is_empty() {
			return is_filtered_out(&experiment.filters, &ctx.attributes);
		}
		experiment
			.namespace
			.as_ref()
			.is_some_and(|namespace| !in_namespace(hash_value, namespace))
	}

	fn record(&self, experiment: &Experiment, subject: &Subject, variation: &str, ctx: &mut EvaluationContext) {
		let slot = assignment_key(&experiment.key, experiment.bucket_version);
		if let Some(doc) = sticky::store(
			&mut ctx.sticky_documents,
			&subject.attribute,
			&subject.value,
			&slot,
			variation,
		) {
			debug!(experiment_key = %experiment.key, document = %doc.key(), variation, "sticky assignment changed");
			ctx.notify(Notification::StickySave(doc));
		}
	}
}


#[cfg(test)]
mod proptest_tests {
	use super::*;
	use crate::attributes::Attributes;
	use proptest::prelude::*;
	use serde_json::json;

	proptest! {
		#[test]
		fn assignment_is_deterministic(id in "[a-z0-9]{1,12}", coverage in 0.0f64..=1.0) {
			let groups = SavedGroups::new();
			let assigner = ExperimentAssigner::new(EvaluationOptions::default(), &groups);
			let experiment = Arc::new(
				Experiment::new("exp", vec![json!("a"), json!("b"), json!("c")]).with_coverage(coverage),
			);
			let mut first = EvaluationContext::new(Attributes::default().with("id", id.clone()));
			let mut second = EvaluationContext::new(Attributes::default().with("id", id));
			prop_assert_eq!(
				assigner.assign(&experiment, None, &mut first),
				assigner.assign(&experiment, None, &mut second)
			);
		}

		#[test]
		fn enrolled_variation_is_valid(id in "[a-z0-9]{1,12}") {
			let groups = SavedGroups::new();
			let assigner = ExperimentAssigner::new(EvaluationOptions::default(), &groups);
			let experiment = Arc::new(
				Experiment::new("exp", vec![json!(0), json!(1), json!(2)]).with_weights(vec![0.2, 0.3, 0.5]),
			);
			let mut ctx = EvaluationContext::new(Attributes::default().with("id", id));
			let result = assigner.assign(&experiment, None, &mut ctx);
			prop_assert!(result.in_experiment);
			prop_assert!(result.variation_id.unwrap() < 3);
		}
	}
}
