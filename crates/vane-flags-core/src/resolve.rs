// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature resolution.
//!
//! [`FeatureResolver::eval_feature`] resolves one feature for one subject:
//! cycle check, unknown key, forced value, URL override, then the ordered
//! rules, then the default value. Prerequisites re-enter the resolver for the
//! parent feature; the in-flight set in the context turns a reference cycle
//! into `unknownFeature` for the top-level call.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::assign::ExperimentAssigner;
use crate::attributes::Attributes;
use crate::context::{EvaluationContext, EvaluationOptions, Notification, URL_FEATURE_PREFIX};
use crate::experiment::{is_filtered_out, Experiment, ExperimentResult};
use crate::feature::{FeatureResult, FeatureRule, FeatureSource, ParentCondition, RuleAction};
use crate::snapshot::FeatureSnapshot;

/// Raised internally when a feature is reached again while being resolved.
#[derive(Debug)]
struct Cycle;

/// Resolves features from one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct FeatureResolver<'a> {
	snapshot: &'a FeatureSnapshot,
	options: EvaluationOptions,
}

impl<'a> FeatureResolver<'a> {
	pub fn new(snapshot: &'a FeatureSnapshot, options: EvaluationOptions) -> Self {
		Self { snapshot, options }
	}

	/// Resolves `key`. Never fails: unknown and cyclic features resolve to
	/// `unknownFeature` with a null value.
	pub fn eval_feature(&self, key: &str, ctx: &mut EvaluationContext) -> FeatureResult {
		ctx.begin_call();
		match self.resolve(key, ctx) {
			Ok(result) => result,
			Err(Cycle) => {
				debug!(feature_key = %key, "cyclic prerequisite");
				let result = FeatureResult::unknown();
				ctx.notify(Notification::FeatureUsage {
					feature_key: key.to_string(),
					result: result.clone(),
				});
				result
			}
		}
	}

	pub fn is_on(&self, key: &str, ctx: &mut EvaluationContext) -> bool {
		self.eval_feature(key, ctx).on()
	}

	pub fn is_off(&self, key: &str, ctx: &mut EvaluationContext) -> bool {
		self.eval_feature(key, ctx).off()
	}

	/// The resolved value, or `default` when the feature resolves to null.
	pub fn get_feature_value(&self, key: &str, ctx: &mut EvaluationContext, default: Value) -> Value {
		match self.eval_feature(key, ctx).value {
			Value::Null => default,
			value => value,
		}
	}

	/// Assigns the subject to an experiment that is not attached to a feature.
	pub fn run(&self, experiment: &Experiment, ctx: &mut EvaluationContext) -> ExperimentResult {
		ctx.begin_call();
		let experiment = Arc::new(experiment.clone());
		self.assign(&experiment, None, ctx)
	}

	fn assign(&self, experiment: &Arc<Experiment>, feature_id: Option<&str>, ctx: &mut EvaluationContext) -> ExperimentResult {
		self
			.assigner()
			.assign_with_prerequisites(experiment, feature_id, ctx, |parents, ctx| self.parents_met(parents, ctx))
	}

	/// True when every parent resolves to a value its condition accepts. A
	/// cycle counts as unmet.
	fn parents_met(&self, parents: &[ParentCondition], ctx: &mut EvaluationContext) -> bool {
		let groups = self.snapshot.saved_groups();
		parents.iter().all(|parent| match self.resolve(&parent.id, ctx) {
			Ok(result) => parent
				.condition
				.evaluate_with_groups(&Attributes::new(json!({ "value": result.value })), groups),
			Err(Cycle) => {
				debug!(parent = %parent.id, "cyclic experiment prerequisite");
				false
			}
		})
	}

	fn assigner(&self) -> ExperimentAssigner<'a> {
		ExperimentAssigner::new(self.options, self.snapshot.saved_groups())
	}

	fn resolve(&self, key: &str, ctx: &mut EvaluationContext) -> Result<FeatureResult, Cycle> {
		if !ctx.enter(key) {
			return Err(Cycle);
		}
		let result = self.resolve_entered(key, ctx);
		ctx.leave(key);

		let result = result?;
		ctx.notify(Notification::FeatureUsage {
			feature_key: key.to_string(),
			result: result.clone(),
		});
		Ok(result)
	}

	fn resolve_entered(&self, key: &str, ctx: &mut EvaluationContext) -> Result<FeatureResult, Cycle> {
		let Some(feature) = self.snapshot.feature(key) else {
			debug!(feature_key = %key, "unknown feature");
			return Ok(FeatureResult::unknown());
		};

		if let Some(value) = ctx.forced_features.get(key) {
			debug!(feature_key = %key, "forced feature value");
			return Ok(FeatureResult::new(value.clone(), FeatureSource::Force));
		}

		if self.options.allow_url_overrides {
			let param = format!("{URL_FEATURE_PREFIX}{key}");
			if let Some(value) = ctx
				.query_param(&param)
				.and_then(|raw| coerce_override(&raw, &feature.default_value))
			{
				debug!(feature_key = %key, "url feature override");
				return Ok(FeatureResult::new(value, FeatureSource::Force));
			}
		}

		for rule in &feature.rules {
			if let Some(result) = self.apply_rule(key, rule, ctx)? {
				return Ok(result);
			}
		}

		Ok(FeatureResult::new(feature.default_value.clone(), FeatureSource::DefaultValue))
	}

	/// `Ok(None)` means the rule does not apply and the next one is tried.
	fn apply_rule(
		&self,
		key: &str,
		rule: &FeatureRule,
		ctx: &mut EvaluationContext,
	) -> Result<Option<FeatureResult>, Cycle> {
		let groups = self.snapshot.saved_groups();

		for parent in &rule.parent_conditions {
			let parent_result = self.resolve(&parent.id, ctx)?;
			let parent_value = Attributes::new(json!({ "value": parent_result.value }));
			if parent.condition.evaluate_with_groups(&parent_value, groups) {
				continue;
			}
			if parent.gate {
				debug!(feature_key = %key, parent = %parent.id, "gated prerequisite failed");
				return Ok(Some(
					FeatureResult::new(Value::Null, FeatureSource::Prerequisite).with_rule_id(rule.id.clone()),
				));
			}
			debug!(feature_key = %key, parent = %parent.id, "skipping rule, prerequisite failed");
			return Ok(None);
		}

		if is_filtered_out(&rule.filters, &ctx.attributes) {
			debug!(feature_key = %key, rule_id = ?rule.id, "skipping rule, filtered out");
			return Ok(None);
		}

		if let Some(condition) = &rule.condition {
			if !condition.evaluate_with_groups(&ctx.attributes, groups) {
				debug!(feature_key = %key, rule_id = ?rule.id, "skipping rule, condition failed");
				return Ok(None);
			}
		}

		match &rule.action {
			RuleAction::Noop => Ok(None),
			RuleAction::Force { value, rollout } => {
				if !rollout.includes(&ctx.attributes, key, self.options.sticky_bucketing) {
					debug!(feature_key = %key, rule_id = ?rule.id, "skipping rule, outside rollout");
					return Ok(None);
				}
				Ok(Some(
					FeatureResult::new(value.clone(), FeatureSource::Force).with_rule_id(rule.id.clone()),
				))
			}
			RuleAction::Experiment { experiment, fallback } => {
				let result = self.assign(experiment, Some(key), ctx);
				if result.in_experiment {
					if result.passthrough {
						return Ok(None);
					}
					return Ok(Some(
						FeatureResult::from_experiment(experiment, result).with_rule_id(rule.id.clone()),
					));
				}
				// The fallback is only for subjects the rule targets.
				let targeted = experiment
					.condition
					.as_ref()
					.map_or(true, |condition| condition.evaluate_with_groups(&ctx.attributes, groups));
				if !targeted {
					debug!(feature_key = %key, rule_id = ?rule.id, "skipping rule, condition failed");
					return Ok(None);
				}
				Ok(fallback.as_ref().map(|value| {
					FeatureResult::new(value.clone(), FeatureSource::Force).with_rule_id(rule.id.clone())
				}))
			}
		}
	}
}

/// Converts a query-string override to the type of the feature's default
/// value. `None` when the raw text does not fit that type.
fn coerce_override(raw: &str, default: &Value) -> Option<Value> {
	match default {
		Value::Bool(_) => match raw {
			"true" | "1" | "on" => Some(Value::Bool(true)),
			"false" | "0" | "off" => Some(Value::Bool(false)),
			_ => None,
		},
		Value::Number(_) => {
			if let Ok(n) = raw.parse::<i64>() {
				return Some(Value::from(n));
			}
			raw
				.parse::<f64>()
				.ok()
				.and_then(serde_json::Number::from_f64)
				.map(Value::Number)
		}
		Value::String(_) => Some(Value::String(raw.to_string())),
		Value::Array(_) => serde_json::from_str::<Value>(raw).ok().filter(Value::is_array),
		Value::Object(_) => serde_json::from_str::<Value>(raw).ok().filter(Value::is_object),
		Value::Null => Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
	}
}
