use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc, Weak,
};

use meristem::{
	runtime::{self, Propagation, SignalNode, Symbol},
	trace::{self, CellKind, ValueRepr},
};
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Serializer};

use crate::{
	equality::Equality,
	listeners::Listeners,
	traits::{Cell, Readable, Unlisten, Value, Writable},
	SignalError,
};

/// A mutable signal cell.
///
/// Holds a value, compares writes through its equality resolver, and
/// announces observable changes to listeners and dependents once the
/// enclosing batch drains. Handles are cheap clones of one shared cell.
pub struct Signal<T: Value> {
	raw: Arc<RawSignal<T>>,
}

impl<T: Value> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Self {
			raw: Arc::clone(&self.raw),
		}
	}
}

impl<T: Value> std::fmt::Debug for Signal<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Signal")
			.field("symbol", &self.raw.symbol)
			.field("name", &self.raw.name.lock())
			.finish_non_exhaustive()
	}
}

struct Snapshot<T> {
	value: T,
	/// Captured for `reset`.
	initial: T,
}

struct RawSignal<T: Value> {
	symbol: Symbol,
	name: Mutex<Option<Arc<str>>>,
	disposed: AtomicBool,
	version: AtomicU64,
	/// Lazy-first construction; the initializer runs on first access.
	init: Mutex<Option<Box<dyn FnOnce() -> T + Send>>>,
	slot: RwLock<Option<Snapshot<T>>>,
	equality: Equality<T>,
	listeners: Listeners<T>,
}

impl<T: Value + PartialEq> Signal<T> {
	/// A signal holding `value`, with structural equality.
	#[must_use]
	pub fn new(value: T) -> Self {
		Self::with_equality(value, Equality::structural())
	}

	/// The lazy-first form: `init` runs on first access, and its result
	/// doubles as the `reset` target.
	#[must_use]
	pub fn lazy(init: impl FnOnce() -> T + Send + 'static) -> Self {
		Self::lazy_with_equality(init, Equality::structural())
	}
}

impl<T: Value> Signal<T> {
	/// A signal holding `value`, with an explicit equality resolver.
	#[must_use]
	pub fn with_equality(value: T, equality: Equality<T>) -> Self {
		Self::construct(
			None,
			Some(Snapshot {
				initial: value.clone(),
				value,
			}),
			equality,
		)
	}

	/// Lazy-first construction with an explicit equality resolver.
	#[must_use]
	pub fn lazy_with_equality(
		init: impl FnOnce() -> T + Send + 'static,
		equality: Equality<T>,
	) -> Self {
		Self::construct(Some(Box::new(init)), None, equality)
	}

	fn construct(
		init: Option<Box<dyn FnOnce() -> T + Send>>,
		slot: Option<Snapshot<T>>,
		equality: Equality<T>,
	) -> Self {
		let symbol = runtime::next_symbol();
		let raw = Arc::new(RawSignal {
			symbol,
			name: Mutex::new(None),
			disposed: AtomicBool::new(false),
			version: AtomicU64::new(0),
			init: Mutex::new(init),
			slot: RwLock::new(slot),
			equality,
			listeners: Listeners::new(),
		});
		let node: Weak<dyn SignalNode> = Arc::downgrade(&(Arc::clone(&raw) as Arc<dyn SignalNode>));
		runtime::register_node(symbol, node);
		trace::signal_created(symbol, CellKind::Mutable, None);
		Self { raw }
	}

	/// Names the cell and returns it, for construction chains.
	#[must_use]
	pub fn named(self, name: &str) -> Self {
		self.set_name(name);
		self
	}

	/// Restores the value captured at construction (or produced by the lazy
	/// initializer). Equality-checked like any other write.
	pub fn reset(&self) {
		if self.raw.disposed.load(Ordering::SeqCst) {
			trace::write_ignored(self.raw.symbol);
			return;
		}
		runtime::critical(|| {
			self.raw.ensure_init();
			let initial = {
				let slot = self.raw.slot.read();
				slot.as_ref().expect("initialized above").initial.clone()
			};
			self.write(initial);
		});
	}

	/// Registers a low-level change listener, fired once per observable
	/// version change after the enclosing batch drains.
	///
	/// Keeps the cell intrinsically subscribed while any listener is
	/// registered. On a disposed cell this is a no-op.
	pub fn on(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Unlisten {
		if self.raw.disposed.load(Ordering::SeqCst) {
			return Unlisten::noop();
		}
		let (id, first) = self.raw.listeners.add(Arc::new(listener));
		if first {
			runtime::set_intrinsic(self.raw.symbol, true);
		}
		let weak = Arc::downgrade(&self.raw);
		Unlisten::new(move || {
			if let Some(raw) = weak.upgrade() {
				if raw.listeners.remove(id) {
					runtime::set_intrinsic(raw.symbol, false);
				}
			}
		})
	}

	/// Reads without recording a dependency, even inside an evaluation.
	#[must_use]
	pub fn peek(&self) -> T {
		self.raw.current()
	}

	/// Borrow-reads the value without cloning it. Records a dependency like
	/// [`get`](`Readable::get`).
	pub fn with_ref<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		runtime::record_dependency(self.raw.symbol);
		self.raw.ensure_init();
		let slot = self.raw.slot.read();
		f(&slot.as_ref().expect("initialized above").value)
	}

	fn write(&self, value: T) {
		let changed = {
			let mut slot = self.raw.slot.write();
			let snapshot = slot.as_mut().expect("initialized before `write`");
			if self.raw.equality.unchanged(&snapshot.value, &value) {
				false
			} else {
				snapshot.value = value;
				true
			}
		};
		if changed {
			self.raw.version.fetch_add(1, Ordering::SeqCst);
			runtime::publish(self.raw.symbol);
		}
	}
}

impl<T: Value> RawSignal<T> {
	fn ensure_init(&self) {
		if self.slot.read().is_some() {
			return;
		}
		// The initializer is user code and may reach back into the runtime;
		// entering the critical section first keeps the lock order uniform.
		runtime::critical(|| {
			let init = self.init.lock().take();
			if let Some(init) = init {
				let value = init();
				let mut slot = self.slot.write();
				if slot.is_none() {
					*slot = Some(Snapshot {
						initial: value.clone(),
						value,
					});
				}
			}
		});
	}

	fn current(&self) -> T {
		self.ensure_init();
		self.slot.read().as_ref().expect("initialized above").value.clone()
	}

	fn release(&self, announce: bool) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		runtime::purge(self.symbol);
		self.listeners.clear();
		if announce {
			trace::signal_disposed(self.symbol);
		}
	}
}

impl<T: Value> SignalNode for RawSignal<T> {
	fn refresh(&self) -> Propagation {
		// Mutable cells have no dependencies; nothing ever refreshes them.
		Propagation::Halt
	}

	fn announce(&self) {
		let value = self.current();
		let version = self.version.load(Ordering::SeqCst);
		trace::signal_changed(self.symbol, version, || ValueRepr {
			text: format!("{value:?}"),
			pending: false,
		});
		self.listeners.notify(self.symbol, &value);
	}
}

impl<T: Value> Cell for Signal<T> {
	fn symbol(&self) -> Symbol {
		self.raw.symbol
	}

	fn kind(&self) -> CellKind {
		CellKind::Mutable
	}

	fn name(&self) -> Option<Arc<str>> {
		self.raw.name.lock().clone()
	}

	fn set_name(&self, name: &str) {
		*self.raw.name.lock() = Some(name.into());
		trace::signal_renamed(self.raw.symbol, name);
	}

	fn dispose(&self) {
		self.raw.release(true);
	}

	fn is_disposed(&self) -> bool {
		self.raw.disposed.load(Ordering::SeqCst)
	}

	fn forget(&self) {
		self.raw.release(false);
	}
}

impl<T: Value> Readable<T> for Signal<T> {
	fn try_get(&self) -> Result<T, SignalError> {
		runtime::record_dependency(self.raw.symbol);
		Ok(self.raw.current())
	}
}

impl<T: Value> Writable<T> for Signal<T> {
	fn set(&self, value: T) {
		if self.raw.disposed.load(Ordering::SeqCst) {
			trace::write_ignored(self.raw.symbol);
			return;
		}
		runtime::critical(|| {
			self.raw.ensure_init();
			self.write(value);
		});
	}

	fn update(&self, f: impl FnOnce(&mut T)) {
		if self.raw.disposed.load(Ordering::SeqCst) {
			trace::write_ignored(self.raw.symbol);
			return;
		}
		runtime::critical(|| {
			self.raw.ensure_init();
			let mut next = self.raw.current();
			f(&mut next);
			self.write(next);
		});
	}
}

impl<T: Value> Drop for RawSignal<T> {
	fn drop(&mut self) {
		self.release(true);
	}
}

/// The JSON coercion of a cell is its current value, read untracked.
impl<T: Value + Serialize> Serialize for Signal<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.raw.current().serialize(serializer)
	}
}
