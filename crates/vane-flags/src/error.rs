// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flags SDK.

use thiserror::Error;

/// Flags SDK errors.
///
/// Evaluation never returns these. They surface from collaborator
/// boundaries: refreshing definitions and talking to the sticky bucket
/// service.
#[derive(Debug, Error)]
pub enum FlagsError {
	/// Definitions payload could not be parsed.
	#[error(transparent)]
	Core(#[from] vane_flags_core::FlagsError),

	/// The feature repository failed to produce a snapshot.
	#[error("failed to fetch feature definitions: {0}")]
	RepositoryFetch(String),

	#[error("failed to load sticky bucket assignments: {0}")]
	StickyBucketLoad(String),

	#[error("failed to save sticky bucket assignments: {0}")]
	StickyBucketSave(String),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientClosed,
}

impl FlagsError {
	/// Whether repeating the operation may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			FlagsError::RepositoryFetch(_) | FlagsError::StickyBucketLoad(_) | FlagsError::StickyBucketSave(_)
		)
	}
}

/// Result type alias for flags SDK operations.
pub type Result<T> = std::result::Result<T, FlagsError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collaborator_failures_are_retryable() {
		assert!(FlagsError::RepositoryFetch("timeout".to_string()).is_retryable());
		assert!(FlagsError::StickyBucketLoad("down".to_string()).is_retryable());
		assert!(FlagsError::StickyBucketSave("down".to_string()).is_retryable());
	}

	#[test]
	fn payload_and_lifecycle_errors_are_not_retryable() {
		let core = FlagsError::from(vane_flags_core::FlagsError::InvalidPayload("bad".to_string()));
		assert!(!core.is_retryable());
		assert!(!FlagsError::ClientClosed.is_retryable());
	}

	#[test]
	fn core_errors_display_transparently() {
		let err = FlagsError::from(vane_flags_core::FlagsError::UnsupportedHashVersion(7));
		assert_eq!(err.to_string(), "unsupported hash version: 7");
	}
}
