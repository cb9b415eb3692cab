use std::{fmt::Debug, panic::panic_any, sync::Arc};

use meristem::{runtime::Symbol, trace::CellKind};

use crate::SignalError;

/// Everything a signal cell can hold.
///
/// Blanket-implemented; the bounds exist so that values can be cloned out
/// of cells, shared across threads and rendered for the trace surface.
pub trait Value: Send + Sync + Clone + Debug + 'static {}

impl<T: Send + Sync + Clone + Debug + 'static> Value for T {}

/// The object-safe surface every cell flavor shares: identity, naming and
/// lifecycle.
pub trait Cell: Send + Sync {
	/// The cell's stable identity. Assigned at construction, never reused.
	fn symbol(&self) -> Symbol;

	/// The cell's flavor, as reported to the trace surface.
	fn kind(&self) -> CellKind;

	/// The cell's display name, if one was assigned.
	fn name(&self) -> Option<Arc<str>>;

	/// Assigns a display name. Identity is unaffected; a rename event is
	/// emitted so external indexes keyed by name can follow along.
	fn set_name(&self, name: &str);

	/// Releases the cell: cancels in-flight work, drains cleanups, drops
	/// subscriptions and marks it disposed. Idempotent.
	///
	/// A disposed cell still answers reads with its last known value.
	fn dispose(&self);

	/// Whether [`dispose`](`Cell::dispose`) (or [`forget`](`Cell::forget`))
	/// already ran.
	fn is_disposed(&self) -> bool;

	/// Like [`dispose`](`Cell::dispose`), but silent towards the trace
	/// surface. Used when reclaiming never-committed scopes, where a
	/// disposal event would be spurious.
	fn forget(&self);

	/// The name shown in diagnostics: the display name, or `#<id>`.
	fn display_name(&self) -> String {
		self.name()
			.map_or_else(|| format!("#{}", self.symbol().get()), |name| name.to_string())
	}
}

/// Read access to a cell holding `T`.
///
/// Reads performed inside a computed evaluation record a dependency on the
/// cell.
pub trait Readable<T: Value>: Cell {
	/// The current value, or the stored error of a failed evaluation.
	///
	/// Never panics; the sentinel for pending or errored cells is the
	/// `Err` variant.
	fn try_get(&self) -> Result<T, SignalError>;

	/// The current value.
	///
	/// # Panics
	///
	/// Re-raises the stored error when the cell's last evaluation failed;
	/// use [`try_get`](`Readable::try_get`) to avoid that.
	fn get(&self) -> T {
		match self.try_get() {
			Ok(value) => value,
			Err(error) => panic_any(error),
		}
	}

	/// The stored error of the last evaluation, if it failed.
	fn error(&self) -> Option<SignalError> {
		None
	}
}

/// Write access to a cell holding `T`.
pub trait Writable<T: Value>: Readable<T> {
	/// Replaces the value. Equality-checked; writing an unchanged value
	/// does not propagate. Writes to disposed cells are ignored (and
	/// surfaced as such on the trace surface).
	fn set(&self, value: T);

	/// Derives the next value from the current one, then writes it like
	/// [`set`](`Writable::set`).
	fn update(&self, f: impl FnOnce(&mut T))
	where
		Self: Sized;
}

/// Undoes an [`on`](`crate::Signal::on`) listener registration.
///
/// Deliberately inert on drop: dropping the handle keeps the listener
/// registered for the cell's lifetime, mirroring a lost unsubscribe
/// function.
#[must_use = "dropping an `Unlisten` keeps the listener registered; call `unlisten` to remove it"]
pub struct Unlisten(Option<Box<dyn FnOnce() + Send>>);

impl Unlisten {
	pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
		Self(Some(Box::new(f)))
	}

	/// A handle that removes nothing, as returned by disposed cells.
	pub(crate) fn noop() -> Self {
		Self(None)
	}

	/// Removes the listener. Idempotent.
	pub fn unlisten(mut self) {
		if let Some(f) = self.0.take() {
			f();
		}
	}
}

impl Debug for Unlisten {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Unlisten")
			.field(&self.0.as_ref().map(|_| "..."))
			.finish()
	}
}
