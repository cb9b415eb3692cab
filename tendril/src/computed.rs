use std::{
	mem,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Weak,
	},
};

use meristem::{
	runtime::{self, Propagation, SignalNode, Symbol},
	trace::{self, CellKind, ValueRepr},
};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::{
	context::{AbortHandle, CleanupFn, EvalContext},
	equality::Equality,
	listeners::Listeners,
	traits::{Cell, Readable, Unlisten, Value},
	SignalError,
};

/// Construction options for [`Computed`] and [`Deferred`](`crate::Deferred`)
/// cells.
pub struct ComputedOptions<T: Value> {
	pub(crate) name: Option<Arc<str>>,
	pub(crate) equality: Equality<T>,
	pub(crate) fallback: Option<Arc<dyn Fn(&SignalError) -> T + Send + Sync>>,
	pub(crate) on_change: Option<Arc<dyn Fn(&T) + Send + Sync>>,
	pub(crate) on_error: Option<Arc<dyn Fn(&SignalError) + Send + Sync>>,
}

impl<T: Value + PartialEq> Default for ComputedOptions<T> {
	fn default() -> Self {
		Self::with_equality(Equality::structural())
	}
}

impl<T: Value> ComputedOptions<T> {
	/// Options for a value type without `PartialEq`, or with a bespoke
	/// change notion.
	#[must_use]
	pub fn with_equality(equality: Equality<T>) -> Self {
		Self {
			name: None,
			equality,
			fallback: None,
			on_change: None,
			on_error: None,
		}
	}

	/// The cell's display name.
	#[must_use]
	pub fn name(mut self, name: &str) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Replaces the equality resolver.
	#[must_use]
	pub fn equality(mut self, equality: Equality<T>) -> Self {
		self.equality = equality;
		self
	}

	/// On evaluation failure, `fallback`'s result becomes the cell's value
	/// and downstream reads see success; the raw error is still recorded
	/// for observers and [`error`](`Readable::error`).
	#[must_use]
	pub fn fallback(mut self, fallback: impl Fn(&SignalError) -> T + Send + Sync + 'static) -> Self {
		self.fallback = Some(Arc::new(fallback));
		self
	}

	/// Invoked with each equality-distinct value.
	#[must_use]
	pub fn on_change(mut self, on_change: impl Fn(&T) + Send + Sync + 'static) -> Self {
		self.on_change = Some(Arc::new(on_change));
		self
	}

	/// Invoked with each evaluation failure, before any fallback applies.
	#[must_use]
	pub fn on_error(mut self, on_error: impl Fn(&SignalError) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(on_error));
		self
	}
}

type ComputeFn<T> = Box<dyn Fn(&mut EvalContext<'_>) -> Result<T, SignalError> + Send + Sync>;

/// A cell derived synchronously from whatever its compute function reads.
///
/// Evaluates lazily on first read, then re-evaluates on dependency change
/// while anything subscribes to it (listeners, or subscribed dependents).
/// Once the last subscriber leaves it goes detached: still readable, caught
/// up on demand, but holding no live subscriptions.
pub struct Computed<T: Value> {
	raw: Arc<RawComputed<T>>,
}

impl<T: Value> Clone for Computed<T> {
	fn clone(&self) -> Self {
		Self {
			raw: Arc::clone(&self.raw),
		}
	}
}

impl<T: Value> std::fmt::Debug for Computed<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Computed")
			.field("symbol", &self.raw.symbol)
			.field("name", &self.raw.name.lock())
			.finish_non_exhaustive()
	}
}

struct ComputedState<T> {
	slot: Option<Result<T, SignalError>>,
	cleanups: Vec<CleanupFn>,
	abort: Option<AbortHandle>,
}

struct RawComputed<T: Value> {
	symbol: Symbol,
	name: Mutex<Option<Arc<str>>>,
	disposed: AtomicBool,
	paused: AtomicBool,
	stale_while_paused: AtomicBool,
	version: AtomicU64,
	compute: ComputeFn<T>,
	equality: Equality<T>,
	fallback: Option<Arc<dyn Fn(&SignalError) -> T + Send + Sync>>,
	on_change: Option<Arc<dyn Fn(&T) + Send + Sync>>,
	on_error: Option<Arc<dyn Fn(&SignalError) + Send + Sync>>,
	state: Mutex<ComputedState<T>>,
	listeners: Listeners<T>,
}

impl<T: Value + PartialEq> Computed<T> {
	/// A computed cell with structural equality.
	pub fn new(compute: impl Fn(&mut EvalContext<'_>) -> T + Send + Sync + 'static) -> Self {
		Self::with_options(move |ctx| Ok(compute(ctx)), ComputedOptions::default())
	}

	/// A computed cell whose compute may fail; the error lands in the
	/// cell's error slot.
	pub fn fallible(
		compute: impl Fn(&mut EvalContext<'_>) -> Result<T, SignalError> + Send + Sync + 'static,
	) -> Self {
		Self::with_options(compute, ComputedOptions::default())
	}
}

impl<T: Value> Computed<T> {
	/// The fully-general constructor.
	pub fn with_options(
		compute: impl Fn(&mut EvalContext<'_>) -> Result<T, SignalError> + Send + Sync + 'static,
		options: ComputedOptions<T>,
	) -> Self {
		let symbol = runtime::next_symbol();
		let raw = Arc::new(RawComputed {
			symbol,
			name: Mutex::new(options.name.clone()),
			disposed: AtomicBool::new(false),
			paused: AtomicBool::new(false),
			stale_while_paused: AtomicBool::new(false),
			version: AtomicU64::new(0),
			compute: Box::new(compute),
			equality: options.equality,
			fallback: options.fallback,
			on_change: options.on_change,
			on_error: options.on_error,
			state: Mutex::new(ComputedState {
				slot: None,
				cleanups: Vec::new(),
				abort: None,
			}),
			listeners: Listeners::new(),
		});
		let node: Weak<dyn SignalNode> = Arc::downgrade(&(Arc::clone(&raw) as Arc<dyn SignalNode>));
		runtime::register_node(symbol, node);
		trace::signal_created(symbol, CellKind::Computed, options.name.as_deref());
		Self { raw }
	}

	/// Names the cell and returns it, for construction chains.
	#[must_use]
	pub fn named(self, name: &str) -> Self {
		self.set_name(name);
		self
	}

	/// Registers a low-level change listener; see
	/// [`Signal::on`](`crate::Signal::on`). Listening subscribes the cell,
	/// so it starts re-evaluating eagerly on dependency changes.
	pub fn on(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Unlisten {
		if self.raw.disposed.load(Ordering::SeqCst) {
			return Unlisten::noop();
		}
		self.raw.ensure_fresh();
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

	/// Stops dependency changes from re-evaluating this cell.
	///
	/// Reads keep answering with the last value. Staleness accumulated
	/// while paused is honored on [`resume`](`Computed::resume`).
	pub fn pause(&self) {
		self.raw.paused.store(true, Ordering::SeqCst);
	}

	/// Re-enables re-evaluation; catches up immediately if a dependency
	/// changed while paused.
	pub fn resume(&self) {
		if !self.raw.paused.swap(false, Ordering::SeqCst) {
			return;
		}
		if self.raw.stale_while_paused.swap(false, Ordering::SeqCst) {
			runtime::invalidate(self.raw.symbol);
		}
	}

	/// Whether the cell is paused.
	#[must_use]
	pub fn is_paused(&self) -> bool {
		self.raw.paused.load(Ordering::SeqCst)
	}
}

impl<T: Value> RawComputed<T> {
	/// Lazily evaluates on first read and catches up on staleness, inside
	/// the critical section so concurrent readers see one evaluation.
	fn ensure_fresh(&self) {
		runtime::critical(|| {
			if runtime::is_stale(self.symbol) {
				runtime::refresh(self.symbol);
			}
			let never_evaluated = self.state.lock().slot.is_none();
			if never_evaluated && !self.disposed.load(Ordering::SeqCst) {
				let _ = self.evaluate();
			}
		});
	}

	/// One evaluation pass: tear the previous evaluation down (cleanups in
	/// reverse order, abort token fired exactly once), run the compute
	/// under a fresh capture frame, apply fallback policy and announce the
	/// outcome.
	fn evaluate(&self) -> Propagation {
		let (previous_cleanups, previous_abort) = {
			let mut state = self.state.lock();
			(mem::take(&mut state.cleanups), state.abort.take())
		};
		run_cleanups(self.symbol, previous_cleanups);
		if let Some(abort) = previous_abort {
			abort.abort();
		}

		let (handle, signal) = AbortHandle::new();
		let mut cleanups = Vec::new();
		let computed = runtime::evaluate(self.symbol, || {
			let mut ctx = EvalContext::new(self.symbol, signal, &mut cleanups);
			match catch_unwind(AssertUnwindSafe(|| (self.compute)(&mut ctx))) {
				Ok(result) => result,
				Err(payload) => Err(SignalError::from_panic(payload.as_ref())),
			}
		});

		let outcome = match computed {
			Ok(value) => Ok(value),
			Err(error) => {
				trace::signal_errored(self.symbol, &error.to_string(), error.is_deferred());
				if let Some(on_error) = &self.on_error {
					let on_error = Arc::clone(on_error);
					if catch_unwind(AssertUnwindSafe(|| on_error(&error))).is_err() {
						tracing::error!(symbol = self.symbol.get(), "on_error callback panicked");
					}
				}
				match &self.fallback {
					Some(fallback) => match catch_unwind(AssertUnwindSafe(|| fallback(&error))) {
						Ok(value) => Ok(value),
						Err(payload) => Err(SignalError::from_panic(payload.as_ref())),
					},
					None => Err(error),
				}
			}
		};

		let changed = {
			let mut state = self.state.lock();
			let changed = match (&state.slot, &outcome) {
				(Some(Ok(previous)), Ok(next)) => !self.equality.unchanged(previous, next),
				_ => true,
			};
			state.slot = Some(outcome.clone());
			state.cleanups = cleanups;
			state.abort = Some(handle);
			changed
		};

		if changed {
			let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
			if let Ok(value) = &outcome {
				trace::signal_changed(self.symbol, version, || ValueRepr {
					text: format!("{value:?}"),
					pending: false,
				});
				if let Some(on_change) = &self.on_change {
					let on_change = Arc::clone(on_change);
					if catch_unwind(AssertUnwindSafe(|| on_change(value))).is_err() {
						tracing::error!(symbol = self.symbol.get(), "on_change callback panicked");
					}
				}
				self.listeners.notify(self.symbol, value);
			}
			Propagation::Propagate
		} else {
			Propagation::Halt
		}
	}

	fn release(&self, announce: bool) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		let (cleanups, abort) = {
			let mut state = self.state.lock();
			(mem::take(&mut state.cleanups), state.abort.take())
		};
		run_cleanups(self.symbol, cleanups);
		if let Some(abort) = abort {
			abort.abort();
		}
		runtime::purge(self.symbol);
		self.listeners.clear();
		if announce {
			trace::signal_disposed(self.symbol);
		}
	}
}

/// Drains an evaluation's cleanup list in reverse registration order, each
/// entry at its own panic boundary.
pub(crate) fn run_cleanups(symbol: Symbol, cleanups: Vec<CleanupFn>) {
	for cleanup in cleanups.into_iter().rev() {
		if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
			tracing::error!(symbol = symbol.get(), "cleanup panicked");
			trace::signal_errored(symbol, "cleanup panicked", false);
		}
	}
}

impl<T: Value> SignalNode for RawComputed<T> {
	fn refresh(&self) -> Propagation {
		if self.disposed.load(Ordering::SeqCst) {
			return Propagation::Halt;
		}
		if self.paused.load(Ordering::SeqCst) {
			self.stale_while_paused.store(true, Ordering::SeqCst);
			return Propagation::Halt;
		}
		if self.state.lock().slot.is_none() {
			// Never read; stays lazy.
			return Propagation::Halt;
		}
		self.evaluate()
	}
}

impl<T: Value> Cell for Computed<T> {
	fn symbol(&self) -> Symbol {
		self.raw.symbol
	}

	fn kind(&self) -> CellKind {
		CellKind::Computed
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

impl<T: Value> Readable<T> for Computed<T> {
	fn try_get(&self) -> Result<T, SignalError> {
		self.raw.ensure_fresh();
		runtime::record_dependency(self.raw.symbol);
		match self.raw.state.lock().slot.clone() {
			Some(result) => result,
			// Disposed before the first read ever happened.
			None => Err(SignalError::Disposed),
		}
	}

	fn error(&self) -> Option<SignalError> {
		match &self.raw.state.lock().slot {
			Some(Err(error)) => Some(error.clone()),
			_ => None,
		}
	}
}

impl<T: Value> Drop for RawComputed<T> {
	fn drop(&mut self) {
		self.release(true);
	}
}

/// The JSON coercion of a computed cell is its current value; a cell whose
/// last evaluation failed serializes as null.
impl<T: Value + Serialize> Serialize for Computed<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.raw.ensure_fresh();
		match &self.raw.state.lock().slot {
			Some(Ok(value)) => value.serialize(serializer),
			_ => serializer.serialize_none(),
		}
	}
}
