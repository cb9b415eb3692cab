//! The per-evaluation environment handed to compute functions: dependency
//! reads, the abort token and cleanup registration.

use std::{
	any::Any,
	collections::BTreeMap,
	fmt::{self, Debug, Formatter},
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use event_listener::Event;
use meristem::runtime::{self, Symbol};

use crate::{
	error::SignalError,
	traits::{Readable, Value},
};

pub(crate) type CleanupFn = Box<dyn FnOnce() + Send>;

struct AbortInner {
	aborted: AtomicBool,
	event: Event,
}

/// The firing side of an abort pair. Owned by the cell; fires exactly once,
/// when the evaluation it belongs to is superseded or the cell disposes.
pub(crate) struct AbortHandle {
	inner: Arc<AbortInner>,
}

impl AbortHandle {
	pub(crate) fn new() -> (Self, AbortSignal) {
		let inner = Arc::new(AbortInner {
			aborted: AtomicBool::new(false),
			event: Event::new(),
		});
		(
			Self {
				inner: Arc::clone(&inner),
			},
			AbortSignal { inner },
		)
	}

	pub(crate) fn abort(&self) {
		if !self.inner.aborted.swap(true, Ordering::SeqCst) {
			self.inner.event.notify(usize::MAX);
		}
	}
}

/// The observing side of an evaluation's abort token.
///
/// Observing the token is a contract, not an error: user code wires it into
/// its I/O and decides whether to bail (conventionally with
/// [`SignalError::Aborted`]) or to finish anyway — a superseded result is
/// discarded either way.
#[derive(Clone)]
pub struct AbortSignal {
	inner: Arc<AbortInner>,
}

impl AbortSignal {
	/// Whether the token fired.
	#[must_use]
	pub fn is_aborted(&self) -> bool {
		self.inner.aborted.load(Ordering::SeqCst)
	}

	/// Resolves once the token fires; immediately if it already did.
	pub async fn aborted(&self) {
		loop {
			if self.is_aborted() {
				return;
			}
			let listener = self.inner.event.listen();
			if self.is_aborted() {
				return;
			}
			listener.await;
		}
	}

	/// `Err(SignalError::Aborted)` once the token fired, for `?`-style
	/// bail-out points.
	pub fn check(&self) -> Result<(), SignalError> {
		if self.is_aborted() {
			Err(SignalError::Aborted)
		} else {
			Ok(())
		}
	}
}

impl Debug for AbortSignal {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("AbortSignal")
			.field("aborted", &self.is_aborted())
			.finish()
	}
}

/// The environment of one computed-cell evaluation.
///
/// Created fresh per evaluation. Dependency reads through [`dep`]
/// (`EvalContext::dep`) record the read cell as a dependency on first touch
/// and cache the resolved value for the remainder of the pass, so repeated
/// reads are stable even if the cell moves underneath.
pub struct EvalContext<'a> {
	symbol: Symbol,
	abort: AbortSignal,
	cleanups: &'a mut Vec<CleanupFn>,
	cache: BTreeMap<Symbol, Box<dyn Any + Send>>,
}

impl<'a> EvalContext<'a> {
	pub(crate) fn new(
		symbol: Symbol,
		abort: AbortSignal,
		cleanups: &'a mut Vec<CleanupFn>,
	) -> Self {
		Self {
			symbol,
			abort,
			cleanups,
			cache: BTreeMap::new(),
		}
	}

	/// The symbol of the cell being evaluated.
	#[must_use]
	pub fn symbol(&self) -> Symbol {
		self.symbol
	}

	/// Reads `source`, recording it as a dependency of this evaluation.
	///
	/// The first read resolves and caches the value; later reads within the
	/// same evaluation return the cached one.
	///
	/// # Panics
	///
	/// Re-raises the source's stored error, like [`Readable::get`]; use
	/// [`try_dep`](`EvalContext::try_dep`) to avoid that.
	pub fn dep<T: Value>(&mut self, source: &impl Readable<T>) -> T {
		match self.try_dep(source) {
			Ok(value) => value,
			Err(error) => std::panic::panic_any(error),
		}
	}

	/// Like [`dep`](`EvalContext::dep`), but with the source's stored error
	/// as a value. Errors are not cached; a later read re-resolves.
	pub fn try_dep<T: Value>(&mut self, source: &impl Readable<T>) -> Result<T, SignalError> {
		let symbol = source.symbol();
		if let Some(hit) = self
			.cache
			.get(&symbol)
			.and_then(|cached| cached.downcast_ref::<T>())
		{
			runtime::record_dependency(symbol);
			return Ok(hit.clone());
		}
		let value = source.try_get()?;
		self.cache.insert(symbol, Box::new(value.clone()));
		Ok(value)
	}

	/// This evaluation's abort token.
	#[must_use]
	pub fn abort(&self) -> AbortSignal {
		self.abort.clone()
	}

	/// Registers `f` to run when this evaluation is torn down: at the start
	/// of the next evaluation, or at cell disposal, whichever comes first.
	/// Cleanups run in reverse registration order, exactly once.
	pub fn cleanup(&mut self, f: impl FnOnce() + Send + 'static) {
		self.cleanups.push(Box::new(f));
	}

	/// Runs `f` with its panics contained, so one failing sub-computation
	/// cannot take the whole evaluation down.
	pub fn safe<R>(
		&mut self,
		f: impl FnOnce(&mut EvalContext<'_>) -> R,
	) -> Result<R, SignalError> {
		catch_unwind(AssertUnwindSafe(|| f(self)))
			.map_err(|payload| SignalError::from_panic(payload.as_ref()))
	}

	/// Runs a reusable helper under this context, so composed sub-logics
	/// keep recording dependencies and registering cleanups.
	pub fn with<R>(&mut self, f: impl FnOnce(&mut EvalContext<'_>) -> R) -> R {
		f(self)
	}
}

impl Debug for EvalContext<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("EvalContext")
			.field("symbol", &self.symbol)
			.field("aborted", &self.abort.is_aborted())
			.finish_non_exhaustive()
	}
}
