use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use meristem::{runtime::Symbol, trace};
use parking_lot::Mutex;

/// The low-level `on` listener list of one cell.
///
/// Notification is snapshot-based so listeners may unregister (or register
/// others) from inside their callback, and each listener panic is contained
/// at its own boundary so the remaining listeners still run.
pub(crate) struct Listeners<T: ?Sized> {
	entries: Mutex<Vec<(u64, Arc<dyn Fn(&T) + Send + Sync>)>>,
	next_id: AtomicU64,
}

impl<T: ?Sized> Listeners<T> {
	pub(crate) fn new() -> Self {
		Self {
			entries: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(0),
		}
	}

	/// Registers `listener`; returns its id and whether it is the first.
	pub(crate) fn add(&self, listener: Arc<dyn Fn(&T) + Send + Sync>) -> (u64, bool) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut entries = self.entries.lock();
		let was_empty = entries.is_empty();
		entries.push((id, listener));
		(id, was_empty)
	}

	/// Removes the listener with `id`; returns whether the list is now
	/// empty (and the removal happened).
	pub(crate) fn remove(&self, id: u64) -> bool {
		let mut entries = self.entries.lock();
		entries.retain(|(entry_id, _)| *entry_id != id);
		entries.is_empty()
	}

	pub(crate) fn notify(&self, symbol: Symbol, value: &T) {
		let snapshot = self.entries.lock().clone();
		for (_, listener) in snapshot {
			if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
				tracing::error!(
					symbol = symbol.get(),
					"listener panicked during notification"
				);
				trace::signal_errored(symbol, "listener panicked during notification", false);
			}
		}
	}

	pub(crate) fn clear(&self) {
		self.entries.lock().clear();
	}
}
