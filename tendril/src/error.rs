use std::{any::Any, fmt::Display, sync::Arc, time::Duration};

use thiserror::Error;

/// Errors carried by cells and loadables.
///
/// Cheap to clone; the same error may be stored in a cell's error slot,
/// replayed through settlements and rendered for the trace surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SignalError {
	/// An evaluation failed, either by returning an error or by panicking.
	#[error("computation failed: {message}")]
	Compute {
		/// The rendered failure.
		message: Arc<str>,
		/// Whether the failure came out of a future rather than a
		/// synchronous evaluation.
		deferred: bool,
	},
	/// A [`wait::timeout`](`crate::wait::timeout`) elapsed.
	#[error("timed out after {after:?}")]
	Timeout {
		/// The configured timeout.
		after: Duration,
	},
	/// The evaluation's abort token fired and user code chose to bail.
	#[error("evaluation aborted")]
	Aborted,
	/// The cell was disposed before the value could settle.
	#[error("signal disposed")]
	Disposed,
}

impl SignalError {
	/// A synchronous computation failure with the given message.
	pub fn compute(message: impl Display) -> Self {
		Self::Compute {
			message: message.to_string().into(),
			deferred: false,
		}
	}

	/// A computation failure that surfaced out of a future.
	pub fn deferred(message: impl Display) -> Self {
		Self::Compute {
			message: message.to_string().into(),
			deferred: true,
		}
	}

	/// Whether this failure surfaced out of a future.
	#[must_use]
	pub fn is_deferred(&self) -> bool {
		matches!(
			self,
			Self::Compute { deferred: true, .. } | Self::Timeout { .. }
		)
	}

	/// Recovers a [`SignalError`] from a panic payload.
	///
	/// Re-raised cell errors (see [`Readable::get`](`crate::Readable::get`))
	/// pass through structurally; other payloads keep their message.
	pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
		if let Some(error) = payload.downcast_ref::<Self>() {
			return error.clone();
		}
		let message = payload
			.downcast_ref::<&'static str>()
			.map(|s| (*s).to_owned())
			.or_else(|| payload.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| "panicked".to_owned());
		Self::Compute {
			message: message.into(),
			deferred: false,
		}
	}

	/// Flags the error as having surfaced out of a future.
	#[must_use]
	pub(crate) fn into_deferred(self) -> Self {
		match self {
			Self::Compute { message, .. } => Self::Compute {
				message,
				deferred: true,
			},
			other => other,
		}
	}
}
