use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use meristem::{
	runtime::{self, Deferral, Propagation, Symbol},
	trace,
};
use parking_lot::Mutex;

use crate::traits::Cell;

/// Groups cells (and plain cleanups) for collective disposal.
///
/// Disposal runs in reverse registration order. Besides the immediate
/// [`dispose`](`Scope::dispose`), a scope supports the deferred form that
/// double-invoking hosts need: [`defer_dispose`](`Scope::defer_dispose`)
/// schedules the terminal disposal for the runtime's next settle point and
/// hands back a cancellable handle, so a re-mount arriving within that
/// window can [`revive`](`Scope::revive`) the scope instead.
///
/// A scope that was created but never committed is reclaimed with
/// [`forget`](`Scope::forget`), which releases its cells without surfacing
/// disposal events.
#[derive(Clone)]
pub struct Scope {
	inner: Arc<ScopeInner>,
}

struct ScopeInner {
	symbol: Symbol,
	cells: Mutex<Vec<Box<dyn Cell>>>,
	cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
	disposed: AtomicBool,
	pending: Mutex<Option<Deferral>>,
}

impl Default for Scope {
	fn default() -> Self {
		Self::new()
	}
}

impl Scope {
	/// An empty scope.
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(ScopeInner {
				symbol: runtime::next_symbol(),
				cells: Mutex::new(Vec::new()),
				cleanups: Mutex::new(Vec::new()),
				disposed: AtomicBool::new(false),
				pending: Mutex::new(None),
			}),
		}
	}

	/// Adopts `cell` into the scope and hands it back, so constructions
	/// can be chained.
	pub fn adopt<C: Cell + Clone + 'static>(&self, cell: C) -> C {
		self.inner.cells.lock().push(Box::new(cell.clone()));
		cell
	}

	/// Registers a plain cleanup, run (in reverse registration order,
	/// after the cells are disposed) when the scope disposes.
	pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
		self.inner.cleanups.lock().push(Box::new(f));
	}

	/// Disposes every adopted cell in reverse registration order, then
	/// runs the cleanups. Idempotent; cancels a pending deferred disposal.
	pub fn dispose(&self) {
		if let Some(pending) = self.inner.pending.lock().take() {
			pending.cancel();
		}
		self.inner.dispose_now();
	}

	/// Schedules the terminal disposal for the runtime's next settle point
	/// (the end of the next dispatch drain, or an explicit
	/// [`tick`](`runtime::tick`)).
	///
	/// Until then the scope stays fully alive, and [`revive`](`Scope::revive`)
	/// cancels the disposal — the handshake that makes scopes safe under
	/// hosts that double-invoke mount effects in development.
	pub fn defer_dispose(&self) -> Deferral {
		let mut pending = self.inner.pending.lock();
		if let Some(previous) = pending.take() {
			previous.cancel();
		}
		let inner = Arc::clone(&self.inner);
		let deferral = runtime::defer(self.inner.symbol, move || {
			inner.dispose_now();
			Propagation::Halt
		});
		*pending = Some(deferral.clone());
		deferral
	}

	/// Cancels a pending deferred disposal. Returns whether one was still
	/// pending.
	pub fn revive(&self) -> bool {
		self.inner
			.pending
			.lock()
			.take()
			.is_some_and(|pending| pending.cancel())
	}

	/// Reclaims a never-committed scope: releases its cells and removes
	/// them from the trace registry without surfacing disposal events.
	/// Registered cleanups are dropped unrun.
	pub fn forget(self) {
		if self.inner.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(pending) = self.inner.pending.lock().take() {
			pending.cancel();
		}
		let cells = std::mem::take(&mut *self.inner.cells.lock());
		let symbols = cells.iter().map(|cell| cell.symbol()).collect::<Vec<_>>();
		for cell in cells.iter().rev() {
			cell.forget();
		}
		trace::signals_forgotten(&symbols);
		self.inner.cleanups.lock().clear();
	}

	/// Whether the scope was disposed (or forgotten).
	#[must_use]
	pub fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::SeqCst)
	}
}

impl ScopeInner {
	fn dispose_now(&self) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		let cells = std::mem::take(&mut *self.cells.lock());
		for cell in cells.iter().rev() {
			cell.dispose();
		}
		let cleanups = std::mem::take(&mut *self.cleanups.lock());
		for cleanup in cleanups.into_iter().rev() {
			if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
				tracing::error!("scope cleanup panicked");
			}
		}
	}
}

impl std::fmt::Debug for Scope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scope")
			.field("symbol", &self.inner.symbol)
			.field("cells", &self.inner.cells.lock().len())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}
