use std::{
	collections::{hash_map::DefaultHasher, BTreeSet, HashMap, VecDeque},
	hash::{Hash, Hasher},
	sync::Arc,
	time::{Duration, Instant},
};

use meristem::{
	runtime::Symbol,
	trace::{TraceEvent, TraceEventKind, TraceSink},
};
use parking_lot::Mutex;

/// Occurrences kept per chain; older ones are evicted first.
const OCCURRENCE_CAP: usize = 100;

/// How one run of a chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
	/// The chain ran to quiescence without errors.
	Completed,
	/// At least one signal errored while the chain was open.
	Errored,
}

/// One observed run of a chain.
#[derive(Debug, Clone)]
pub struct Occurrence {
	/// When the chain's first change was observed.
	pub start: Instant,
	/// When the chain's last change was observed.
	pub end: Instant,
	/// `end - start`.
	pub duration: Duration,
	/// How the run ended.
	pub status: ChainStatus,
}

/// A coalesced chain reaction: a propagation path observed at least once.
#[derive(Debug, Clone)]
pub struct Chain {
	/// The propagation path, in change order.
	pub path: Vec<Symbol>,
	/// Signals along the path whose observed values were in flight.
	pub async_signals: BTreeSet<Symbol>,
	/// Bounded, oldest-first run history.
	pub occurrences: VecDeque<Occurrence>,
}

struct OpenChain {
	path: Vec<Symbol>,
	async_signals: BTreeSet<Symbol>,
	start: Instant,
	end: Instant,
	errored: bool,
}

#[derive(Default)]
struct TrackerState {
	open: Option<OpenChain>,
	/// Coalesced by path hash; insertion order retained for listing.
	chains: HashMap<u64, Chain>,
	order: Vec<u64>,
}

/// A [`TraceSink`] that assembles propagation chains.
///
/// A chain is the contiguous sequence of change events between two
/// quiescent points; chains of length ≥ 2 are persisted, identical paths
/// are coalesced, and each chain keeps a bounded run history. Install it
/// directly, or compose it with other sinks through
/// [`Fanout`](`crate::Fanout`).
#[derive(Clone, Default)]
pub struct ChainTracker {
	state: Arc<Mutex<TrackerState>>,
}

impl ChainTracker {
	/// A tracker with no recorded chains.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// The recorded chains, oldest-first.
	#[must_use]
	pub fn chains(&self) -> Vec<Chain> {
		let state = self.state.lock();
		state
			.order
			.iter()
			.filter_map(|hash| state.chains.get(hash).cloned())
			.collect()
	}

	/// Drops every recorded chain.
	pub fn clear(&self) {
		let mut state = self.state.lock();
		state.open = None;
		state.chains.clear();
		state.order.clear();
	}

	fn change(&self, symbol: Symbol, pending: bool, at: Instant) {
		let mut state = self.state.lock();
		match &mut state.open {
			Some(open) => {
				open.path.push(symbol);
				open.end = at;
				if pending {
					open.async_signals.insert(symbol);
				}
			}
			None => {
				let mut async_signals = BTreeSet::new();
				if pending {
					async_signals.insert(symbol);
				}
				state.open = Some(OpenChain {
					path: vec![symbol],
					async_signals,
					start: at,
					end: at,
					errored: false,
				});
			}
		}
	}

	fn finalize(&self) {
		let mut state = self.state.lock();
		let Some(open) = state.open.take() else {
			return;
		};
		if open.path.len() < 2 {
			return;
		}
		let hash = path_hash(&open.path);
		let occurrence = Occurrence {
			start: open.start,
			end: open.end,
			duration: open.end.duration_since(open.start),
			status: if open.errored {
				ChainStatus::Errored
			} else {
				ChainStatus::Completed
			},
		};
		let chain = state.chains.entry(hash).or_insert_with(|| {
			Chain {
				path: open.path.clone(),
				async_signals: BTreeSet::new(),
				occurrences: VecDeque::new(),
			}
		});
		chain.async_signals.extend(open.async_signals.iter().copied());
		if chain.occurrences.len() == OCCURRENCE_CAP {
			chain.occurrences.pop_front();
		}
		chain.occurrences.push_back(occurrence);
		if !state.order.contains(&hash) {
			state.order.push(hash);
		}
	}
}

impl TraceSink for ChainTracker {
	fn event(&self, event: &TraceEvent) {
		match &event.kind {
			TraceEventKind::Changed { symbol, value, .. } => {
				self.change(*symbol, value.pending, event.at);
			}
			TraceEventKind::Errored { .. } => {
				let mut state = self.state.lock();
				if let Some(open) = &mut state.open {
					open.errored = true;
				}
			}
			TraceEventKind::Quiescent => self.finalize(),
			_ => (),
		}
	}
}

fn path_hash(path: &[Symbol]) -> u64 {
	let mut hasher = DefaultHasher::new();
	for symbol in path {
		symbol.get().hash(&mut hasher);
	}
	hasher.finish()
}
