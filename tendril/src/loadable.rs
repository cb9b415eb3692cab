//! Snapshots of asynchronous values.
//!
//! A [`Loadable`] is an immutable snapshot of a deferred computation in one
//! of three states: still loading, settled with a value, or settled with an
//! error. Loading snapshots carry a shared [`Settlement`] slot that waiters
//! can await; snapshots taken from the same evaluation share the same slot,
//! so bridging a snapshot to a future repeatedly is idempotent.

use std::{
	fmt::{self, Debug, Formatter},
	sync::Arc,
};

use async_lock::OnceCell;

use crate::{error::SignalError, traits::Value};

/// The shared slot a deferred evaluation settles into.
///
/// Settles exactly once; waiters before and after settlement both observe
/// the same result. Two settlements compare equal through
/// [`shares_identity`](`Settlement::shares_identity`) iff they came from
/// the same evaluation.
pub struct Settlement<T>(Arc<OnceCell<Result<T, SignalError>>>);

impl<T> Clone for Settlement<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl<T> Debug for Settlement<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Settlement")
			.field(if self.0.is_initialized() {
				&"settled"
			} else {
				&"pending"
			})
			.finish()
	}
}

impl<T: Value> Settlement<T> {
	pub(crate) fn pending() -> Self {
		Self(Arc::new(OnceCell::new()))
	}

	pub(crate) fn settled(result: Result<T, SignalError>) -> Self {
		let slot = Self::pending();
		let _ = slot.0.set_blocking(result);
		slot
	}

	/// Settles the slot. Returns whether this call won; late settlements
	/// are dropped.
	pub(crate) fn settle(&self, result: Result<T, SignalError>) -> bool {
		self.0.set_blocking(result).is_ok()
	}

	/// The settled result, if settlement already happened.
	#[must_use]
	pub fn peek(&self) -> Option<Result<T, SignalError>> {
		self.0.get().cloned()
	}

	/// Waits for settlement.
	pub async fn wait(&self) -> Result<T, SignalError> {
		self.0.wait().await.clone()
	}

	/// Blocking [`wait`](`Settlement::wait`), for synchronous callers.
	#[must_use]
	pub fn wait_blocking(&self) -> Result<T, SignalError> {
		self.0.wait_blocking().clone()
	}

	/// Whether `self` and `other` observe the same evaluation.
	#[must_use]
	pub fn shares_identity(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

/// The status discriminant of a [`Loadable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadStatus {
	/// The computation is still in flight.
	Loading,
	/// The computation settled with a value.
	Ready,
	/// The computation settled with an error.
	Failed,
}

/// A snapshot of an asynchronous value.
#[derive(Debug, Clone)]
pub enum Loadable<T> {
	/// Still in flight; carries the evaluation's settlement slot.
	Loading(Settlement<T>),
	/// Settled with a value.
	Ready(T),
	/// Settled with an error.
	Failed(SignalError),
}

impl<T: Value> Loadable<T> {
	/// The status discriminant.
	#[must_use]
	pub fn status(&self) -> LoadStatus {
		match self {
			Self::Loading(_) => LoadStatus::Loading,
			Self::Ready(_) => LoadStatus::Ready,
			Self::Failed(_) => LoadStatus::Failed,
		}
	}

	/// Whether the computation is still in flight.
	#[must_use]
	pub fn is_loading(&self) -> bool {
		matches!(self, Self::Loading(_))
	}

	/// The settled value, if any.
	#[must_use]
	pub fn value(&self) -> Option<&T> {
		match self {
			Self::Ready(value) => Some(value),
			Self::Loading(_) | Self::Failed(_) => None,
		}
	}

	/// The settled error, if any.
	#[must_use]
	pub fn error(&self) -> Option<&SignalError> {
		match self {
			Self::Failed(error) => Some(error),
			Self::Loading(_) | Self::Ready(_) => None,
		}
	}

	/// The snapshot's settlement slot.
	///
	/// Loading snapshots share their evaluation's slot; settled snapshots
	/// synthesize an already-settled one.
	#[must_use]
	pub fn settlement(&self) -> Settlement<T> {
		match self {
			Self::Loading(settlement) => settlement.clone(),
			Self::Ready(value) => Settlement::settled(Ok(value.clone())),
			Self::Failed(error) => Settlement::settled(Err(error.clone())),
		}
	}

	/// Resolves the snapshot to a result, awaiting settlement if needed.
	pub async fn wait(self) -> Result<T, SignalError> {
		match self {
			Self::Loading(settlement) => settlement.wait().await,
			Self::Ready(value) => Ok(value),
			Self::Failed(error) => Err(error),
		}
	}

	/// Collapses a loading snapshot whose settlement already happened into
	/// the settled form; other snapshots pass through.
	#[must_use]
	pub fn resolved(self) -> Self {
		match self {
			Self::Loading(settlement) => match settlement.peek() {
				Some(Ok(value)) => Self::Ready(value),
				Some(Err(error)) => Self::Failed(error),
				None => Self::Loading(settlement),
			},
			settled => settled,
		}
	}
}

impl<T: Value> From<Result<T, SignalError>> for Loadable<T> {
	fn from(result: Result<T, SignalError>) -> Self {
		match result {
			Ok(value) => Self::Ready(value),
			Err(error) => Self::Failed(error),
		}
	}
}
