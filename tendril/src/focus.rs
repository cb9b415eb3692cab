use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use meristem::{
	runtime::Symbol,
	trace::{self, CellKind},
};
use scopeguard::guard;
use serde_json::Value as Json;

use crate::{
	computed::{Computed, ComputedOptions},
	equality::Equality,
	path::Path,
	traits::{Cell, Readable, Unlisten, Writable},
	SignalError,
};

/// A bidirectional projection into a path of a structured source value.
///
/// Reading yields the value at the path (or the fallback where the path
/// does not exist); writing rebuilds the source's root immutably with the
/// path replaced and writes that back to the source. The write path holds a
/// reentrancy guard, so the source→focus update a write causes can never
/// recurse into another focus write.
///
/// Named canonically as `focus(source.path)`, which graph builders use to
/// reconstruct parentage.
pub struct Focus<S: Writable<Json> + Clone + 'static> {
	source: S,
	path: Arc<Path>,
	view: Computed<Json>,
	updating: Arc<AtomicBool>,
}

impl<S: Writable<Json> + Clone + 'static> Clone for Focus<S> {
	fn clone(&self) -> Self {
		Self {
			source: self.source.clone(),
			path: Arc::clone(&self.path),
			view: self.view.clone(),
			updating: Arc::clone(&self.updating),
		}
	}
}

impl<S: Writable<Json> + Clone + 'static> std::fmt::Debug for Focus<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Focus")
			.field("symbol", &self.view.symbol())
			.field("path", &self.path)
			.finish_non_exhaustive()
	}
}

impl<S: Writable<Json> + Clone + 'static> Focus<S> {
	/// Focuses `source` on `path`. Missing paths read as `Json::Null`.
	pub fn new(source: &S, path: impl Into<Path>) -> Self {
		Self::with_fallback(source, path, Json::Null)
	}

	/// Focuses `source` on `path` with an explicit fallback for missing
	/// paths.
	pub fn with_fallback(source: &S, path: impl Into<Path>, fallback: Json) -> Self {
		let path = Arc::new(path.into());
		let name = format!("focus({}.{})", source.display_name(), path);
		let view = Computed::with_options(
			{
				let source = source.clone();
				let path = Arc::clone(&path);
				move |ctx| {
					let root = ctx.try_dep(&source)?;
					Ok(path.get(&root).cloned().unwrap_or_else(|| fallback.clone()))
				}
			},
			ComputedOptions::with_equality(Equality::structural()).name(&name),
		);
		Self {
			source: source.clone(),
			path,
			view,
			updating: Arc::new(AtomicBool::new(false)),
		}
	}

	/// The focused path.
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Registers a change listener on the projected value; see
	/// [`Signal::on`](`crate::Signal::on`).
	pub fn on(&self, listener: impl Fn(&Json) + Send + Sync + 'static) -> Unlisten {
		self.view.on(listener)
	}
}

impl<S: Writable<Json> + Clone + 'static> Cell for Focus<S> {
	fn symbol(&self) -> Symbol {
		self.view.symbol()
	}

	fn kind(&self) -> CellKind {
		CellKind::Computed
	}

	fn name(&self) -> Option<Arc<str>> {
		self.view.name()
	}

	fn set_name(&self, name: &str) {
		self.view.set_name(name);
	}

	fn dispose(&self) {
		self.view.dispose();
	}

	fn is_disposed(&self) -> bool {
		self.view.is_disposed()
	}

	fn forget(&self) {
		self.view.forget();
	}
}

impl<S: Writable<Json> + Clone + 'static> Readable<Json> for Focus<S> {
	fn try_get(&self) -> Result<Json, SignalError> {
		self.view.try_get()
	}

	fn error(&self) -> Option<SignalError> {
		self.view.error()
	}
}

impl<S: Writable<Json> + Clone + 'static> Writable<Json> for Focus<S> {
	fn set(&self, value: Json) {
		if self.view.is_disposed() {
			trace::write_ignored(self.view.symbol());
			return;
		}
		if self.updating.swap(true, Ordering::SeqCst) {
			// Re-entered from our own source write; stop the cycle here.
			return;
		}
		let _reset = guard(Arc::clone(&self.updating), |updating| {
			updating.store(false, Ordering::SeqCst);
		});
		self.source.update(|root| self.path.set(root, value));
	}

	fn update(&self, f: impl FnOnce(&mut Json)) {
		let mut value = match self.try_get() {
			Ok(value) => value,
			Err(_) => return,
		};
		f(&mut value);
		self.set(value);
	}
}
