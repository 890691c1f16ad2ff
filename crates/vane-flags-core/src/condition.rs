// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting conditions.
//!
//! Conditions arrive as a document-query style JSON tree (`{"country": "US"}`,
//! `{"age": {"$gte": 18}}`, `{"$or": [...]}`) and are compiled once, when a
//! snapshot is loaded, into a [`Condition`] tree. Evaluation never fails:
//! malformed nodes, operators applied to the wrong type, and invalid regular
//! expressions all evaluate to `false`.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use vane_flags_core::{Attributes, Condition};
//!
//! let condition = Condition::parse(&json!({"country": {"$in": ["US", "CA"]}}));
//! let attributes = Attributes::new(json!({"country": "US"}));
//!
//! assert!(condition.evaluate(&attributes));
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::attributes::{lookup_path, scalar_string, Attributes};
use crate::value::{deep_equals, is_truthy, type_tag};

/// Saved groups referenced by `$inGroup` and `$notInGroup`, keyed by group id.
pub type SavedGroups = HashMap<String, Vec<Value>>;

/// A compiled targeting condition.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "Value")]
pub enum Condition {
	And(Vec<Condition>),
	Or(Vec<Condition>),
	Nor(Vec<Condition>),
	Not(Box<Condition>),
	/// The attribute at `path` deep-equals `value`.
	FieldEquals { path: String, value: Value },
	/// The attribute at `path` satisfies `operator`.
	FieldOperator { path: String, operator: Operator },
	/// A node that could not be compiled. Always false.
	Invalid,
}

/// A test applied to a single value, with no path of its own. Used for field
/// tests and for the operands of `$not`, `$size`, `$elemMatch` and `$all`.
#[derive(Debug, Clone)]
pub enum ValueMatcher {
	Equals(Value),
	/// Every operator must pass.
	Operators(Vec<Operator>),
}

/// `$elemMatch` accepts either an operator object applied to each element or
/// a full condition evaluated with each element as the document.
#[derive(Debug, Clone)]
pub enum ElemMatch {
	Value(Box<ValueMatcher>),
	Condition(Box<Condition>),
}

#[derive(Debug, Clone)]
pub enum Operator {
	Eq(Value),
	Ne(Value),
	Lt(Value),
	Lte(Value),
	Gt(Value),
	Gte(Value),
	/// Version comparisons hold the padded form of their operand.
	VersionEq(String),
	VersionNe(String),
	VersionLt(String),
	VersionLte(String),
	VersionGt(String),
	VersionGte(String),
	In(Vec<Value>),
	Nin(Vec<Value>),
	InGroup(String),
	NotInGroup(String),
	Exists(bool),
	Type(String),
	Regex(Regex),
	Size(Box<ValueMatcher>),
	ElemMatch(ElemMatch),
	All(Vec<ValueMatcher>),
	Not(Box<ValueMatcher>),
	/// Unknown operator or malformed operand.
	Invalid,
}

impl Condition {
	/// Compiles a JSON condition. Non-object input compiles to [`Condition::Invalid`].
	pub fn parse(value: &Value) -> Condition {
		match value {
			Value::Object(map) => parse_object(map),
			_ => Condition::Invalid,
		}
	}

	/// Evaluates the condition against `attributes` with no saved groups.
	pub fn evaluate(&self, attributes: &Attributes) -> bool {
		self.evaluate_with_groups(attributes, &SavedGroups::new())
	}

	pub fn evaluate_with_groups(&self, attributes: &Attributes, groups: &SavedGroups) -> bool {
		self.eval(attributes.as_value(), groups)
	}

	fn eval(&self, doc: &Value, groups: &SavedGroups) -> bool {
		match self {
			Condition::And(nodes) => nodes.iter().all(|c| c.eval(doc, groups)),
			Condition::Or(nodes) => eval_or(nodes, doc, groups),
			Condition::Nor(nodes) => !eval_or(nodes, doc, groups),
			Condition::Not(inner) => !inner.eval(doc, groups),
			Condition::FieldEquals { path, value } => {
				ValueMatcher::equals(value, lookup_path(doc, path))
			}
			Condition::FieldOperator { path, operator } => {
				operator.matches(lookup_path(doc, path), groups)
			}
			Condition::Invalid => false,
		}
	}
}

/// The empty condition, which always passes.
impl Default for Condition {
	fn default() -> Self {
		Condition::And(Vec::new())
	}
}

impl From<Value> for Condition {
	fn from(value: Value) -> Self {
		Condition::parse(&value)
	}
}

/// An empty `$or` passes, which makes an empty `$nor` fail.
fn eval_or(nodes: &[Condition], doc: &Value, groups: &SavedGroups) -> bool {
	nodes.is_empty() || nodes.iter().any(|c| c.eval(doc, groups))
}

fn parse_object(map: &Map<String, Value>) -> Condition {
	let mut nodes: Vec<Condition> = map
		.iter()
		.map(|(key, operand)| parse_entry(key, operand))
		.collect();
	if nodes.len() == 1 {
		nodes.swap_remove(0)
	} else {
		Condition::And(nodes)
	}
}

fn parse_entry(key: &str, operand: &Value) -> Condition {
	match key {
		"$and" => parse_list(operand).map_or(Condition::Invalid, Condition::And),
		"$or" => parse_list(operand).map_or(Condition::Invalid, Condition::Or),
		"$nor" => parse_list(operand).map_or(Condition::Invalid, Condition::Nor),
		"$not" => Condition::Not(Box::new(Condition::parse(operand))),
		path => parse_field(path, operand),
	}
}

fn parse_list(operand: &Value) -> Option<Vec<Condition>> {
	operand
		.as_array()
		.map(|items| items.iter().map(Condition::parse).collect())
}

fn parse_field(path: &str, operand: &Value) -> Condition {
	match ValueMatcher::parse(operand) {
		ValueMatcher::Equals(value) => Condition::FieldEquals {
			path: path.to_string(),
			value,
		},
		ValueMatcher::Operators(mut operators) => {
			if operators.len() == 1 {
				Condition::FieldOperator {
					path: path.to_string(),
					operator: operators.swap_remove(0),
				}
			} else {
				Condition::And(
					operators
						.into_iter()
						.map(|operator| Condition::FieldOperator {
							path: path.to_string(),
							operator,
						})
						.collect(),
				)
			}
		}
	}
}

/// An object whose keys all start with `$`. The empty object is an empty
/// operator set and matches anything.
fn is_operator_object(value: &Value) -> bool {
	match value {
		Value::Object(map) => map.keys().all(|k| k.starts_with('$')),
		_ => false,
	}
}

impl ValueMatcher {
	pub fn parse(operand: &Value) -> ValueMatcher {
		match operand {
			Value::Object(map) if is_operator_object(operand) => ValueMatcher::Operators(
				map
					.iter()
					.map(|(op, arg)| Operator::parse(op, arg))
					.collect(),
			),
			other => ValueMatcher::Equals(other.clone()),
		}
	}

	pub fn matches(&self, actual: Option<&Value>, groups: &SavedGroups) -> bool {
		match self {
			ValueMatcher::Equals(expected) => Self::equals(expected, actual),
			ValueMatcher::Operators(operators) => operators.iter().all(|op| op.matches(actual, groups)),
		}
	}

	/// A `null` condition value matches both a missing and a null attribute.
	fn equals(expected: &Value, actual: Option<&Value>) -> bool {
		match actual {
			Some(actual) => deep_equals(actual, expected),
			None => expected.is_null(),
		}
	}
}

impl Operator {
	pub fn parse(op: &str, operand: &Value) -> Operator {
		match op {
			"$eq" => Operator::Eq(operand.clone()),
			"$ne" => Operator::Ne(operand.clone()),
			"$lt" => Operator::Lt(operand.clone()),
			"$lte" => Operator::Lte(operand.clone()),
			"$gt" => Operator::Gt(operand.clone()),
			"$gte" => Operator::Gte(operand.clone()),
			"$veq" | "$vne" | "$vlt" | "$vlte" | "$vgt" | "$vgte" => match scalar_string(operand) {
				Some(version) => {
					let padded = padded_version(&version);
					match op {
						"$veq" => Operator::VersionEq(padded),
						"$vne" => Operator::VersionNe(padded),
						"$vlt" => Operator::VersionLt(padded),
						"$vlte" => Operator::VersionLte(padded),
						"$vgt" => Operator::VersionGt(padded),
						_ => Operator::VersionGte(padded),
					}
				}
				None => Operator::Invalid,
			},
			"$in" => operand
				.as_array()
				.map_or(Operator::Invalid, |items| Operator::In(items.clone())),
			"$nin" => operand
				.as_array()
				.map_or(Operator::Invalid, |items| Operator::Nin(items.clone())),
			"$inGroup" => operand
				.as_str()
				.map_or(Operator::Invalid, |id| Operator::InGroup(id.to_string())),
			"$notInGroup" => operand
				.as_str()
				.map_or(Operator::Invalid, |id| Operator::NotInGroup(id.to_string())),
			"$exists" => Operator::Exists(is_truthy(operand)),
			"$type" => operand
				.as_str()
				.map_or(Operator::Invalid, |tag| Operator::Type(tag.to_string())),
			"$regex" => match operand.as_str().map(Regex::new) {
				Some(Ok(regex)) => Operator::Regex(regex),
				Some(Err(e)) => {
					warn!(pattern = ?operand, error = %e, "Invalid regex in condition");
					Operator::Invalid
				}
				None => Operator::Invalid,
			},
			"$size" => Operator::Size(Box::new(ValueMatcher::parse(operand))),
			"$elemMatch" => {
				if is_operator_object(operand) {
					Operator::ElemMatch(ElemMatch::Value(Box::new(ValueMatcher::parse(operand))))
				} else if operand.is_object() {
					Operator::ElemMatch(ElemMatch::Condition(Box::new(Condition::parse(operand))))
				} else {
					Operator::Invalid
				}
			}
			"$all" => operand.as_array().map_or(Operator::Invalid, |items| {
				Operator::All(items.iter().map(ValueMatcher::parse).collect())
			}),
			"$not" => Operator::Not(Box::new(ValueMatcher::parse(operand))),
			_ => Operator::Invalid,
		}
	}

	pub fn matches(&self, actual: Option<&Value>, groups: &SavedGroups) -> bool {
		match self {
			Operator::Eq(expected) => actual.is_some_and(|a| deep_equals(a, expected)),
			Operator::Ne(expected) => !actual.is_some_and(|a| deep_equals(a, expected)),
			Operator::Lt(expected) => compare(actual, expected) == Some(Ordering::Less),
			Operator::Lte(expected) => matches!(
				compare(actual, expected),
				Some(Ordering::Less | Ordering::Equal)
			),
			Operator::Gt(expected) => compare(actual, expected) == Some(Ordering::Greater),
			Operator::Gte(expected) => matches!(
				compare(actual, expected),
				Some(Ordering::Greater | Ordering::Equal)
			),
			Operator::VersionEq(v) => version_cmp(actual, v) == Some(Ordering::Equal),
			Operator::VersionNe(v) => version_cmp(actual, v).is_some_and(|o| o != Ordering::Equal),
			Operator::VersionLt(v) => version_cmp(actual, v) == Some(Ordering::Less),
			Operator::VersionLte(v) => matches!(
				version_cmp(actual, v),
				Some(Ordering::Less | Ordering::Equal)
			),
			Operator::VersionGt(v) => version_cmp(actual, v) == Some(Ordering::Greater),
			Operator::VersionGte(v) => matches!(
				version_cmp(actual, v),
				Some(Ordering::Greater | Ordering::Equal)
			),
			Operator::In(items) => is_in(actual, items),
			Operator::Nin(items) => !is_in(actual, items),
			Operator::InGroup(id) => is_in(actual, group(groups, id)),
			Operator::NotInGroup(id) => !is_in(actual, group(groups, id)),
			Operator::Exists(expected) => actual.is_some() == *expected,
			Operator::Type(tag) => type_tag(actual) == tag,
			Operator::Regex(regex) => actual
				.and_then(scalar_string)
				.is_some_and(|s| regex.is_match(&s)),
			Operator::Size(matcher) => match actual {
				Some(Value::Array(items)) => {
					matcher.matches(Some(&Value::from(items.len())), groups)
				}
				_ => false,
			},
			Operator::ElemMatch(elem) => match actual {
				Some(Value::Array(items)) => items.iter().any(|item| match elem {
					ElemMatch::Value(matcher) => matcher.matches(Some(item), groups),
					ElemMatch::Condition(condition) => condition.eval(item, groups),
				}),
				_ => false,
			},
			Operator::All(matchers) => match actual {
				Some(Value::Array(items)) => matchers
					.iter()
					.all(|m| items.iter().any(|item| m.matches(Some(item), groups))),
				_ => false,
			},
			Operator::Not(matcher) => !matcher.matches(actual, groups),
			Operator::Invalid => false,
		}
	}
}

fn group<'a>(groups: &'a SavedGroups, id: &str) -> &'a [Value] {
	groups.get(id).map(Vec::as_slice).unwrap_or_default()
}

/// Membership. An array attribute matches when any of its elements does.
fn is_in(actual: Option<&Value>, items: &[Value]) -> bool {
	match actual {
		None => false,
		Some(Value::Array(values)) => values
			.iter()
			.any(|v| items.iter().any(|item| deep_equals(v, item))),
		Some(value) => items.iter().any(|item| deep_equals(value, item)),
	}
}

/// Orders an attribute against an operand. Numeric operands coerce the
/// attribute to a number, with missing and null reading as zero. String
/// operands compare lexicographically against string attributes.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
	match expected {
		Value::Number(n) => {
			let rhs = n.as_f64()?;
			let lhs = match actual {
				None | Some(Value::Null) => 0.0,
				Some(Value::Number(a)) => a.as_f64()?,
				Some(Value::Bool(b)) => f64::from(u8::from(*b)),
				Some(Value::String(s)) => s.trim().parse().ok()?,
				Some(Value::Array(_) | Value::Object(_)) => return None,
			};
			lhs.partial_cmp(&rhs)
		}
		Value::String(rhs) => match actual {
			Some(Value::String(lhs)) => Some(lhs.as_str().cmp(rhs.as_str())),
			Some(Value::Number(a)) => {
				let rhs: f64 = rhs.trim().parse().ok()?;
				a.as_f64()?.partial_cmp(&rhs)
			}
			_ => None,
		},
		_ => None,
	}
}

fn version_cmp(actual: Option<&Value>, padded_expected: &str) -> Option<Ordering> {
	let actual = actual.and_then(scalar_string)?;
	Some(padded_version(&actual).as_str().cmp(padded_expected))
}

/// Normalizes a version string so that plain string ordering matches version
/// ordering.
///
/// A leading `v` and any `+build` suffix are dropped, the rest is split on
/// `.` and `-`, a release without a pre-release tag gets a trailing `~` (which
/// sorts after any tag), and numeric parts are zero-padded to five digits.
pub fn padded_version(input: &str) -> String {
	let trimmed = input.strip_prefix('v').unwrap_or(input);
	let trimmed = trimmed.split('+').next().unwrap_or_default();

	let mut parts: Vec<&str> = trimmed.split(|c| c == '-' || c == '.').collect();
	if parts.len() == 3 {
		parts.push("~");
	}

	parts
		.into_iter()
		.filter(|part| !part.is_empty())
		.map(|part| {
			if part.bytes().all(|b| b.is_ascii_digit()) {
				format!("{part:0>5}")
			} else {
				part.to_string()
			}
		})
		.collect::<Vec<_>>()
		.join("-")
}
