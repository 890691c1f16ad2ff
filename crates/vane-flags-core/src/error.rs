// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors raised while loading feature definitions.
///
/// Evaluation itself never fails; these only surface when a payload is parsed
/// into a [`FeatureSnapshot`](crate::FeatureSnapshot).
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("invalid feature payload: {0}")]
	InvalidPayload(String),

	#[error("unsupported hash version: {0}")]
	UnsupportedHashVersion(u32),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl From<serde_json::Error> for FlagsError {
	fn from(err: serde_json::Error) -> Self {
		FlagsError::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsError>;
