//! The process-wide trace surface: a single installable sink observing the
//! lifecycle of every signal, plus the registries and bounded event cache
//! that make late installation useful.
//!
//! While no sink is installed the entire surface costs one relaxed boolean
//! load per call site; cells are expected to check [`enabled`] before
//! rendering values.

use core::sync::atomic::{AtomicBool, Ordering};
use std::{
	collections::{BTreeMap, BTreeSet, VecDeque},
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	time::Instant,
};

use parking_lot::Mutex;

use crate::runtime::Symbol;

/// Bounded length of the replayable event cache.
const EVENT_CACHE: usize = 512;
/// Bounded per-signal value history.
const VALUE_HISTORY: usize = 32;
/// Bounded per-signal error log.
const ERROR_LOG: usize = 16;

/// What flavor of cell a signal is, for introspection purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellKind {
	/// A value-holding cell written through `set`.
	Mutable,
	/// A cell derived synchronously from its dependencies.
	Computed,
	/// A cell derived through a future, observed as a loadable.
	Deferred,
}

/// A rendered snapshot of a signal's value, as carried by change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRepr {
	/// Debug rendering of the value.
	pub text: String,
	/// Whether the value is an in-flight (loading) one.
	pub pending: bool,
}

/// One trace event, stamped with its emission instant.
#[derive(Debug, Clone)]
pub struct TraceEvent {
	/// When the event was emitted.
	pub at: Instant,
	/// What happened.
	pub kind: TraceEventKind,
}

/// The event vocabulary of the trace surface.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TraceEventKind {
	/// A signal was constructed.
	Created {
		/// The new signal's identity.
		symbol: Symbol,
		/// Its cell flavor.
		kind: CellKind,
		/// Its display name, if any.
		name: Option<String>,
	},
	/// A signal's value observably changed.
	Changed {
		/// The changed signal.
		symbol: Symbol,
		/// Its version after the change.
		version: u64,
		/// The new value.
		value: ValueRepr,
	},
	/// An evaluation or listener failed.
	Errored {
		/// The affected signal.
		symbol: Symbol,
		/// The rendered error.
		message: String,
		/// Whether the failure came out of a future rather than a
		/// synchronous evaluation.
		deferred: bool,
	},
	/// A signal was disposed.
	Disposed {
		/// The disposed signal.
		symbol: Symbol,
	},
	/// A signal's display name changed; its identity did not.
	Renamed {
		/// The renamed signal.
		symbol: Symbol,
		/// The new display name.
		name: String,
	},
	/// Signals of a never-committed scope were reclaimed without disposal
	/// events.
	Forgotten {
		/// The reclaimed signals.
		symbols: Vec<Symbol>,
	},
	/// A write to a disposed cell was ignored.
	WriteIgnored {
		/// The disposed cell.
		symbol: Symbol,
	},
	/// A tag came into existence.
	TagCreated {
		/// The tag's name.
		tag: String,
	},
	/// A signal joined a tag.
	TagAdded {
		/// The tag's name.
		tag: String,
		/// The joining signal.
		symbol: Symbol,
	},
	/// A signal left a tag.
	TagRemoved {
		/// The tag's name.
		tag: String,
		/// The leaving signal.
		symbol: Symbol,
	},
	/// The dispatcher finished a drain and the runtime settled.
	///
	/// Chain trackers use this as the boundary between propagation chains.
	Quiescent,
	/// A panic crossed the host's panic hook while the bridge was active.
	HostPanic {
		/// The rendered panic payload.
		message: String,
	},
}

/// Receiver for [`TraceEvent`]s.
///
/// Exactly one sink is installed at a time; fan-out to several consumers is
/// a sink's own business.
pub trait TraceSink: Send + Sync {
	/// Called once per event, in emission order.
	///
	/// Runs under the emitter's call stack; panics are caught and logged,
	/// and must not be relied on for control flow.
	fn event(&self, event: &TraceEvent);
}

/// Everything the registry knows about one signal.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SignalRecord {
	/// The signal's identity.
	pub symbol: Symbol,
	/// Its cell flavor.
	pub kind: CellKind,
	/// Its current display name.
	pub name: Option<String>,
	/// When it was created.
	pub created_at: Instant,
	/// Its version as of the last change event.
	pub version: u64,
	/// How many change events it emitted.
	pub change_count: u64,
	/// Bounded history of recent values.
	pub history: VecDeque<(ValueRepr, Instant)>,
	/// How many error events it emitted.
	pub error_count: u64,
	/// Bounded log of recent errors.
	pub errors: VecDeque<(String, Instant)>,
	/// How many writes were ignored because the cell was disposed.
	pub ignored_writes: u64,
	/// The tags it belongs to.
	pub tags: BTreeSet<String>,
	/// Whether it was disposed.
	pub disposed: bool,
}

struct TracerState {
	sink: Option<Arc<dyn TraceSink>>,
	signals: BTreeMap<Symbol, SignalRecord>,
	tags: BTreeMap<String, BTreeSet<Symbol>>,
	cache: VecDeque<TraceEvent>,
	panic_bridge_installed: bool,
}

struct Tracer {
	enabled: AtomicBool,
	state: Mutex<TracerState>,
}

static TRACER: Tracer = Tracer {
	enabled: AtomicBool::new(false),
	state: Mutex::new(TracerState {
		sink: None,
		signals: BTreeMap::new(),
		tags: BTreeMap::new(),
		cache: VecDeque::new(),
		panic_bridge_installed: false,
	}),
};

/// Whether a sink is currently installed.
///
/// Cells branch on this before rendering values for change events.
#[inline]
#[must_use]
pub fn enabled() -> bool {
	TRACER.enabled.load(Ordering::Relaxed)
}

/// Installs `sink` as the process-wide trace sink, replacing any previous
/// one, and replays the bounded event cache to it in time order.
///
/// The first installation also bridges the host's panic hook so that panics
/// show up as [`TraceEventKind::HostPanic`]; the bridge stays dormant while
/// no sink is installed.
pub fn install(sink: Arc<dyn TraceSink>) {
	let (replay, sink) = {
		let mut state = TRACER.state.lock();
		if !state.panic_bridge_installed {
			state.panic_bridge_installed = true;
			let previous = std::panic::take_hook();
			std::panic::set_hook(Box::new(move |info| {
				bridge_panic(info);
				previous(info);
			}));
		}
		state.sink = Some(Arc::clone(&sink));
		TRACER.enabled.store(true, Ordering::Relaxed);
		(state.cache.iter().cloned().collect::<Vec<_>>(), sink)
	};
	for event in &replay {
		deliver(&sink, event);
	}
}

/// Removes the installed sink, if any.
///
/// Registries and the event cache are kept so a later [`install`] can
/// replay and resume; recording stops until then.
pub fn uninstall() {
	let mut state = TRACER.state.lock();
	TRACER.enabled.store(false, Ordering::Relaxed);
	state.sink = None;
}

/// Records a construction event.
pub fn signal_created(symbol: Symbol, kind: CellKind, name: Option<&str>) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Created {
		symbol,
		kind,
		name: name.map(str::to_owned),
	});
}

/// Records a change event. `render` only runs when a sink is installed.
pub fn signal_changed(symbol: Symbol, version: u64, render: impl FnOnce() -> ValueRepr) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Changed {
		symbol,
		version,
		value: render(),
	});
}

/// Records an evaluation or listener failure.
pub fn signal_errored(symbol: Symbol, message: &str, deferred: bool) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Errored {
		symbol,
		message: message.to_owned(),
		deferred,
	});
}

/// Records a disposal event.
pub fn signal_disposed(symbol: Symbol) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Disposed { symbol });
}

/// Records a rename event. Identity is unaffected.
pub fn signal_renamed(symbol: Symbol, name: &str) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Renamed {
		symbol,
		name: name.to_owned(),
	});
}

/// Atomically removes `symbols` from the registry without surfacing
/// disposal events — the reclamation path for never-committed scopes.
pub fn signals_forgotten(symbols: &[Symbol]) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Forgotten {
		symbols: symbols.to_vec(),
	});
}

/// Records that a write to a disposed cell was ignored.
pub fn write_ignored(symbol: Symbol) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::WriteIgnored { symbol });
}

/// Records a tag's creation.
pub fn tag_created(tag: &str) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::TagCreated {
		tag: tag.to_owned(),
	});
}

/// Records a signal joining a tag.
pub fn tag_added(tag: &str, symbol: Symbol) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::TagAdded {
		tag: tag.to_owned(),
		symbol,
	});
}

/// Records a signal leaving a tag.
pub fn tag_removed(tag: &str, symbol: Symbol) {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::TagRemoved {
		tag: tag.to_owned(),
		symbol,
	});
}

pub(crate) fn quiescent() {
	if !enabled() {
		return;
	}
	emit(TraceEventKind::Quiescent);
}

/// A snapshot of the signals registry, in symbol order.
#[must_use]
pub fn registry_snapshot() -> Vec<SignalRecord> {
	let state = TRACER.state.lock();
	state.signals.values().cloned().collect()
}

/// A snapshot of tag memberships.
#[must_use]
pub fn tags_snapshot() -> BTreeMap<String, BTreeSet<Symbol>> {
	let state = TRACER.state.lock();
	state.tags.clone()
}

fn emit(kind: TraceEventKind) {
	let event = TraceEvent {
		at: Instant::now(),
		kind,
	};
	let sink = {
		let mut state = TRACER.state.lock();
		record(&mut state, &event);
		if state.cache.len() == EVENT_CACHE {
			state.cache.pop_front();
		}
		state.cache.push_back(event.clone());
		state.sink.clone()
	};
	if let Some(sink) = sink {
		deliver(&sink, &event);
	}
}

/// Delivers one event, containing sink panics so they can never break the
/// dispatcher above.
fn deliver(sink: &Arc<dyn TraceSink>, event: &TraceEvent) {
	if catch_unwind(AssertUnwindSafe(|| sink.event(event))).is_err() {
		tracing::error!("trace sink panicked; event dropped");
	}
}

fn record(state: &mut TracerState, event: &TraceEvent) {
	match &event.kind {
		TraceEventKind::Created { symbol, kind, name } => {
			state.signals.insert(
				*symbol,
				SignalRecord {
					symbol: *symbol,
					kind: *kind,
					name: name.clone(),
					created_at: event.at,
					version: 0,
					change_count: 0,
					history: VecDeque::new(),
					error_count: 0,
					errors: VecDeque::new(),
					ignored_writes: 0,
					tags: BTreeSet::new(),
					disposed: false,
				},
			);
		}
		TraceEventKind::Changed {
			symbol,
			version,
			value,
		} => {
			if let Some(record) = state.signals.get_mut(symbol) {
				record.version = *version;
				record.change_count += 1;
				if record.history.len() == VALUE_HISTORY {
					record.history.pop_front();
				}
				record.history.push_back((value.clone(), event.at));
			}
		}
		TraceEventKind::Errored {
			symbol, message, ..
		} => {
			if let Some(record) = state.signals.get_mut(symbol) {
				record.error_count += 1;
				if record.errors.len() == ERROR_LOG {
					record.errors.pop_front();
				}
				record.errors.push_back((message.clone(), event.at));
			}
		}
		TraceEventKind::Disposed { symbol } => {
			if let Some(record) = state.signals.get_mut(symbol) {
				record.disposed = true;
			}
		}
		TraceEventKind::Renamed { symbol, name } => {
			if let Some(record) = state.signals.get_mut(symbol) {
				record.name = Some(name.clone());
			}
		}
		TraceEventKind::Forgotten { symbols } => {
			for symbol in symbols {
				state.signals.remove(symbol);
				for members in state.tags.values_mut() {
					members.remove(symbol);
				}
			}
		}
		TraceEventKind::WriteIgnored { symbol } => {
			if let Some(record) = state.signals.get_mut(symbol) {
				record.ignored_writes += 1;
			}
		}
		TraceEventKind::TagCreated { tag } => {
			state.tags.entry(tag.clone()).or_default();
		}
		TraceEventKind::TagAdded { tag, symbol } => {
			state.tags.entry(tag.clone()).or_default().insert(*symbol);
			if let Some(record) = state.signals.get_mut(symbol) {
				record.tags.insert(tag.clone());
			}
		}
		TraceEventKind::TagRemoved { tag, symbol } => {
			if let Some(members) = state.tags.get_mut(tag) {
				members.remove(symbol);
			}
			if let Some(record) = state.signals.get_mut(symbol) {
				record.tags.remove(tag);
			}
		}
		TraceEventKind::Quiescent | TraceEventKind::HostPanic { .. } => (),
	}
}

fn bridge_panic(info: &std::panic::PanicHookInfo<'_>) {
	if !enabled() {
		return;
	}
	// `try_lock`: the panic may originate under the tracer's own lock.
	let Some(mut state) = TRACER.state.try_lock() else {
		return;
	};
	let event = TraceEvent {
		at: Instant::now(),
		kind: TraceEventKind::HostPanic {
			message: info.to_string(),
		},
	};
	if state.cache.len() == EVENT_CACHE {
		state.cache.pop_front();
	}
	state.cache.push_back(event.clone());
	let sink = state.sink.clone();
	drop(state);
	if let Some(sink) = sink {
		deliver(&sink, &event);
	}
}
