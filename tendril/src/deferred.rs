use std::{
	future::Future,
	mem,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Weak,
	},
};

use futures_lite::{future, FutureExt};
use meristem::{
	runtime::{self, Propagation, SignalNode, Symbol},
	trace::{self, CellKind, ValueRepr},
};
use parking_lot::Mutex;
use tap::Pipe as _;

use crate::{
	computed::run_cleanups,
	context::{AbortHandle, CleanupFn, EvalContext},
	equality::Equality,
	listeners::Listeners,
	loadable::{Loadable, Settlement},
	traits::{Cell, Readable, Unlisten, Value},
	ComputedOptions, SignalError,
};

type PendingFuture<T> = future::Boxed<Result<T, SignalError>>;

/// A computed cell whose evaluations run as futures.
///
/// Its observed value is a [`Loadable`]: each evaluation first surfaces as
/// [`Loadable::Loading`] with a fresh settlement slot, then reconciles to
/// `Ready` or `Failed` when the future settles — but only if that
/// evaluation is still the current one. A superseded future is dropped and
/// its abort token fired; a late result is discarded.
///
/// The engine schedules nothing itself: awaiting
/// [`settled`](`Deferred::settled`) is what drives the in-flight future.
pub struct Deferred<T: Value> {
	raw: Arc<RawDeferred<T>>,
}

impl<T: Value> Clone for Deferred<T> {
	fn clone(&self) -> Self {
		Self {
			raw: Arc::clone(&self.raw),
		}
	}
}

impl<T: Value> std::fmt::Debug for Deferred<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Deferred")
			.field("symbol", &self.raw.symbol)
			.field("name", &self.raw.name.lock())
			.finish_non_exhaustive()
	}
}

type DeferredCompute<T> =
	Box<dyn Fn(&mut EvalContext<'_>) -> PendingFuture<T> + Send + Sync>;

struct DeferredState<T: Value> {
	/// Bumped per evaluation; settlements reconcile only against their own
	/// generation.
	generation: u64,
	loadable: Option<Loadable<T>>,
	/// The previous *resolved* value, which resolution equality compares
	/// against (never the in-between loading states).
	last_resolved: Option<T>,
	last_error: Option<SignalError>,
	in_flight: Option<PendingFuture<T>>,
	settlement: Option<Settlement<T>>,
	cleanups: Vec<CleanupFn>,
	abort: Option<AbortHandle>,
}

struct RawDeferred<T: Value> {
	symbol: Symbol,
	name: Mutex<Option<Arc<str>>>,
	disposed: AtomicBool,
	paused: AtomicBool,
	stale_while_paused: AtomicBool,
	version: AtomicU64,
	compute: DeferredCompute<T>,
	equality: Equality<T>,
	fallback: Option<Arc<dyn Fn(&SignalError) -> T + Send + Sync>>,
	on_change: Option<Arc<dyn Fn(&T) + Send + Sync>>,
	on_error: Option<Arc<dyn Fn(&SignalError) + Send + Sync>>,
	state: Mutex<DeferredState<T>>,
	listeners: Listeners<Loadable<T>>,
}

impl<T: Value + PartialEq> Deferred<T> {
	/// A deferred cell with structural equality over resolved values.
	pub fn new<F, Fut>(compute: F) -> Self
	where
		F: Fn(&mut EvalContext<'_>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, SignalError>> + Send + 'static,
	{
		Self::with_options(compute, ComputedOptions::default())
	}
}

impl<T: Value> Deferred<T> {
	/// The fully-general constructor.
	pub fn with_options<F, Fut>(compute: F, options: ComputedOptions<T>) -> Self
	where
		F: Fn(&mut EvalContext<'_>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, SignalError>> + Send + 'static,
	{
		let symbol = runtime::next_symbol();
		let raw = Arc::new(RawDeferred {
			symbol,
			name: Mutex::new(options.name.clone()),
			disposed: AtomicBool::new(false),
			paused: AtomicBool::new(false),
			stale_while_paused: AtomicBool::new(false),
			version: AtomicU64::new(0),
			compute: Box::new(move |ctx| compute(ctx).boxed()),
			equality: options.equality,
			fallback: options.fallback,
			on_change: options.on_change,
			on_error: options.on_error,
			state: Mutex::new(DeferredState {
				generation: 0,
				loadable: None,
				last_resolved: None,
				last_error: None,
				in_flight: None,
				settlement: None,
				cleanups: Vec::new(),
				abort: None,
			}),
			listeners: Listeners::new(),
		});
		let node: Weak<dyn SignalNode> = Arc::downgrade(&(Arc::clone(&raw) as Arc<dyn SignalNode>));
		runtime::register_node(symbol, node);
		trace::signal_created(symbol, CellKind::Deferred, options.name.as_deref());
		Self { raw }
	}

	/// Names the cell and returns it, for construction chains.
	#[must_use]
	pub fn named(self, name: &str) -> Self {
		self.set_name(name);
		self
	}

	/// Registers a low-level listener over the cell's loadable snapshots;
	/// fires on loading transitions as well as settlements.
	pub fn on(&self, listener: impl Fn(&Loadable<T>) + Send + Sync + 'static) -> Unlisten {
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

	/// Drives the current in-flight evaluation to completion and returns
	/// its result.
	///
	/// When another caller is already driving it, waits on the settlement
	/// instead. The returned result is the evaluation's own — even when a
	/// configured fallback means the *cell* presents success downstream.
	///
	/// Dropping a driving `settled` future mid-flight cancels that
	/// evaluation; the cell stays loading until a dependency change starts
	/// the next one.
	pub async fn settled(&self) -> Result<T, SignalError> {
		self.raw.ensure_fresh();
		let (generation, in_flight, settlement) = {
			let mut state = self.raw.state.lock();
			(
				state.generation,
				state.in_flight.take(),
				state
					.settlement
					.clone()
					.expect("fresh evaluations always install a settlement"),
			)
		};
		match in_flight {
			Some(future) => {
				let outcome = future.await.map_err(SignalError::into_deferred);
				self.raw.reconcile(generation, outcome.clone());
				settlement.settle(outcome.clone());
				outcome
			}
			None => settlement.wait().await,
		}
	}

	/// Blocking [`settled`](`Deferred::settled`), for synchronous callers
	/// and tests.
	pub fn settle_blocking(&self) -> Result<T, SignalError> {
		future::block_on(self.settled())
	}

	/// Stops dependency changes from re-evaluating this cell; see
	/// [`Computed::pause`](`crate::Computed::pause`).
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
}

impl<T: Value> RawDeferred<T> {
	fn ensure_fresh(&self) {
		runtime::critical(|| {
			if runtime::is_stale(self.symbol) {
				runtime::refresh(self.symbol);
			}
			let never_evaluated = self.state.lock().loadable.is_none();
			if never_evaluated && !self.disposed.load(Ordering::SeqCst) {
				let _ = self.evaluate();
			}
		});
	}

	/// Starts a new evaluation: tears the previous one down (cleanups,
	/// abort token, dropping its future cancels it), runs the compute under
	/// a capture frame to obtain the next future, and announces the
	/// loading transition.
	fn evaluate(&self) -> Propagation {
		let (previous_cleanups, previous_abort, superseded) = {
			let mut state = self.state.lock();
			state.generation += 1;
			(
				mem::take(&mut state.cleanups),
				state.abort.take(),
				state.in_flight.take(),
			)
		};
		run_cleanups(self.symbol, previous_cleanups);
		if let Some(abort) = previous_abort {
			abort.abort();
		}
		drop(superseded);

		let (handle, signal) = AbortHandle::new();
		let mut cleanups = Vec::new();
		let produced = runtime::evaluate(self.symbol, || {
			let mut ctx = EvalContext::new(self.symbol, signal, &mut cleanups);
			catch_unwind(AssertUnwindSafe(|| (self.compute)(&mut ctx)))
		});
		let future = match produced {
			Ok(future) => future,
			// The compute panicked before even returning a future; surface
			// that as an immediately-failing evaluation.
			Err(payload) => {
				let error = SignalError::from_panic(payload.as_ref()).into_deferred();
				future::ready(Err(error)).boxed()
			}
		};

		let settlement = Settlement::pending();
		let loadable = Loadable::Loading(settlement.clone());
		{
			let mut state = self.state.lock();
			state.loadable = Some(loadable.clone());
			state.in_flight = Some(future);
			state.settlement = Some(settlement);
			state.cleanups = cleanups;
			state.abort = Some(handle);
		}

		let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
		trace::signal_changed(self.symbol, version, || ValueRepr {
			text: "loading".to_owned(),
			pending: true,
		});
		self.listeners.notify(self.symbol, &loadable);
		Propagation::Propagate
	}

	/// Applies a settled outcome iff `generation` is still current;
	/// superseded settlements are discarded.
	fn reconcile(&self, generation: u64, outcome: Result<T, SignalError>) {
		runtime::critical(|| {
			{
				let state = self.state.lock();
				if state.generation != generation || self.disposed.load(Ordering::SeqCst) {
					return;
				}
			}
			let resolved = match outcome {
				Ok(value) => {
					self.state.lock().last_error = None;
					Ok(value)
				}
				Err(error) => {
					self.state.lock().last_error = Some(error.clone());
					trace::signal_errored(self.symbol, &error.to_string(), true);
					if let Some(on_error) = &self.on_error {
						let on_error = Arc::clone(on_error);
						if catch_unwind(AssertUnwindSafe(|| on_error(&error))).is_err() {
							tracing::error!(
								symbol = self.symbol.get(),
								"on_error callback panicked"
							);
						}
					}
					match &self.fallback {
						Some(fallback) => {
							match catch_unwind(AssertUnwindSafe(|| fallback(&error))) {
								Ok(value) => Ok(value),
								Err(payload) => {
									Err(SignalError::from_panic(payload.as_ref()))
								}
							}
						}
						None => Err(error),
					}
				}
			};

			let (loadable, changed_value) = {
				let mut state = self.state.lock();
				let (loadable, changed_value) = match resolved {
					Ok(value) => {
						// Keep the previous resolved value's identity when
						// the resolver says nothing changed.
						let unchanged = state
							.last_resolved
							.as_ref()
							.is_some_and(|previous| self.equality.unchanged(previous, &value));
						let value = if unchanged {
							state.last_resolved.clone().expect("checked above")
						} else {
							value
						};
						state.last_resolved = Some(value.clone());
						let changed_value = (!unchanged).then(|| value.clone());
						(Loadable::Ready(value), changed_value)
					}
					Err(error) => (Loadable::Failed(error), None),
				};
				state.loadable = Some(loadable.clone());
				(loadable, changed_value)
			};
			if let Some(value) = &changed_value {
				if let Some(on_change) = &self.on_change {
					let on_change = Arc::clone(on_change);
					if catch_unwind(AssertUnwindSafe(|| on_change(value))).is_err() {
						tracing::error!(
							symbol = self.symbol.get(),
							"on_change callback panicked"
						);
					}
				}
			}

			let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
			trace::signal_changed(self.symbol, version, || {
				match &loadable {
					Loadable::Ready(value) => format!("{value:?}"),
					Loadable::Failed(error) => format!("failed: {error}"),
					Loadable::Loading(_) => "loading".to_owned(),
				}
				.pipe(|text| ValueRepr {
					text,
					pending: false,
				})
			});
			self.listeners.notify(self.symbol, &loadable);
			runtime::propagate(self.symbol);
		});
	}

	fn release(&self, announce: bool) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		let (cleanups, abort, in_flight, settlement) = {
			let mut state = self.state.lock();
			(
				mem::take(&mut state.cleanups),
				state.abort.take(),
				state.in_flight.take(),
				state.settlement.take(),
			)
		};
		run_cleanups(self.symbol, cleanups);
		if let Some(abort) = abort {
			abort.abort();
		}
		drop(in_flight);
		if let Some(settlement) = settlement {
			// Unblock anyone still waiting on the in-flight evaluation.
			settlement.settle(Err(SignalError::Disposed));
		}
		runtime::purge(self.symbol);
		self.listeners.clear();
		if announce {
			trace::signal_disposed(self.symbol);
		}
	}
}

impl<T: Value> SignalNode for RawDeferred<T> {
	fn refresh(&self) -> Propagation {
		if self.disposed.load(Ordering::SeqCst) {
			return Propagation::Halt;
		}
		if self.paused.load(Ordering::SeqCst) {
			self.stale_while_paused.store(true, Ordering::SeqCst);
			return Propagation::Halt;
		}
		if self.state.lock().loadable.is_none() {
			// Never read; stays lazy.
			return Propagation::Halt;
		}
		self.evaluate()
	}
}

impl<T: Value> Cell for Deferred<T> {
	fn symbol(&self) -> Symbol {
		self.raw.symbol
	}

	fn kind(&self) -> CellKind {
		CellKind::Deferred
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

impl<T: Value> Readable<Loadable<T>> for Deferred<T> {
	fn try_get(&self) -> Result<Loadable<T>, SignalError> {
		self.raw.ensure_fresh();
		runtime::record_dependency(self.raw.symbol);
		match self.raw.state.lock().loadable.clone() {
			Some(loadable) => Ok(loadable),
			None => Err(SignalError::Disposed),
		}
	}

	fn error(&self) -> Option<SignalError> {
		self.raw.state.lock().last_error.clone()
	}
}

impl<T: Value> Drop for RawDeferred<T> {
	fn drop(&mut self) {
		self.release(true);
	}
}
