//! Equality resolvers deciding whether a write counts as a change.
//!
//! A resolver takes `(prev, next)` and answers "treat as unchanged". It
//! must be total and side-effect free. [`Equality::structural`] (plain
//! `PartialEq`) is the default wherever the value type allows it; the free
//! functions here cover the cases it gets wrong, like floats whose `NaN`
//! should compare equal to itself.

use std::{
	fmt::{self, Debug, Formatter},
	sync::Arc,
};

/// Decides whether a cell treats a new value as unchanged.
pub enum Equality<T: ?Sized> {
	/// Every write is a change.
	Never,
	/// A custom resolver; `true` means "unchanged".
	With(Arc<dyn Fn(&T, &T) -> bool + Send + Sync>),
}

impl<T: ?Sized> Clone for Equality<T> {
	fn clone(&self) -> Self {
		match self {
			Self::Never => Self::Never,
			Self::With(f) => Self::With(Arc::clone(f)),
		}
	}
}

impl<T: ?Sized> Debug for Equality<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Never => f.write_str("Equality::Never"),
			Self::With(_) => f.write_str("Equality::With(..)"),
		}
	}
}

impl<T: ?Sized> Equality<T> {
	/// Structural comparison through `PartialEq`.
	#[must_use]
	pub fn structural() -> Self
	where
		T: PartialEq,
	{
		Self::With(Arc::new(|prev, next| prev == next))
	}

	/// A custom resolver; `true` means "treat as unchanged".
	pub fn with(f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
		Self::With(Arc::new(f))
	}

	/// Whether `next` should be treated as unchanged relative to `prev`.
	#[must_use]
	pub fn unchanged(&self, prev: &T, next: &T) -> bool {
		match self {
			Self::Never => false,
			Self::With(f) => f(prev, next),
		}
	}
}

impl<T: PartialEq> Default for Equality<T> {
	fn default() -> Self {
		Self::structural()
	}
}

/// Every write counts as a change.
#[must_use]
pub fn never<T>() -> Equality<T> {
	Equality::Never
}

/// No write ever counts as a change.
#[must_use]
pub fn always<T>() -> Equality<T> {
	Equality::with(|_, _| true)
}

/// Bit-identical comparison for `f64`, under which `NaN` equals itself and
/// `0.0` differs from `-0.0`.
#[must_use]
pub fn bitwise_f64() -> Equality<f64> {
	Equality::with(|prev: &f64, next: &f64| prev.to_bits() == next.to_bits())
}

/// Bit-identical comparison for `f32`; see [`bitwise_f64`].
#[must_use]
pub fn bitwise_f32() -> Equality<f32> {
	Equality::with(|prev: &f32, next: &f32| prev.to_bits() == next.to_bits())
}

/// One-level comparison by a projected key, for values whose full
/// structural comparison is too deep or not available.
pub fn by_key<T, K: PartialEq>(
	project: impl Fn(&T) -> K + Send + Sync + 'static,
) -> Equality<T> {
	Equality::with(move |prev, next| project(prev) == project(next))
}
