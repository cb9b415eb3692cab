//! The process-wide signals runtime: symbol allocation, dependency capture,
//! transitive subscriptions, batching and the propagation dispatcher.
//!
//! # Logic
//!
//! Callbacks associated with the same [`Symbol`] never run in parallel and
//! are totally ordered. Every entry point takes the runtime's reentrant
//! critical section, so callbacks may call back into the runtime freely on
//! the same thread while other threads block.
//!
//! Symbols are allocated monotonically and a signal may only depend on
//! signals created before it, so symbol order doubles as a topological
//! order of the dependency graph. The dispatcher refreshes stale signals
//! smallest-first, which is what makes propagation glitch-free: by the time
//! a dependent refreshes, all of its dependencies have already settled.

use core::{
	fmt::{self, Debug, Formatter},
	num::NonZeroU64,
	sync::atomic::{AtomicU64, AtomicU8, Ordering},
};
use std::{
	cell::RefCell,
	collections::{BTreeMap, BTreeSet, VecDeque},
	panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
	sync::{Arc, Weak},
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use scopeguard::guard;

use crate::trace;

/// Identifies one signal towards the runtime.
///
/// Symbols are allocated by [`next_symbol`], strictly increase over the
/// lifetime of the process and are never reused, so the relative creation
/// order of two signals can be recovered by comparing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(NonZeroU64);

impl Symbol {
	/// The numeric identity behind this symbol.
	#[must_use]
	pub const fn get(self) -> u64 {
		self.0.get()
	}
}

/// Verdict returned by [`SignalNode::refresh`] and deferral callbacks,
/// deciding whether dependents are flagged as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[must_use = "The dispatcher only flags dependents as stale when asked to."]
pub enum Propagation {
	/// Flag dependents as stale (and refresh the subscribed ones).
	Propagate,
	/// Leave dependents alone, except through other dependency relationships.
	Halt,
}

/// Runtime-facing callbacks of one signal cell.
///
/// Registered via [`register_node`] and held weakly; a node that has been
/// dropped is simply skipped by the dispatcher.
pub trait SignalNode: Send + Sync {
	/// Re-evaluates the node because a dependency changed (or because it was
	/// flagged stale). Runs inside the critical section; dependency capture
	/// is the node's own business (see [`evaluate`]).
	fn refresh(&self) -> Propagation;

	/// Announces a value that was committed by a plain write once the
	/// enclosing batch drains. Listener fan-out and trace events live in the
	/// cell, not here.
	fn announce(&self) {}

	/// Notifies the node that its subscribed status flipped. Runs detached
	/// from any outer dependency recording.
	fn on_subscribed_change(&self, subscribed: bool) {
		let _ = subscribed;
	}
}

struct SignalsRuntime {
	symbol_counter: AtomicU64,
	critical_mutex: ReentrantMutex<RefCell<RuntimeState>>,
}

// SAFETY: The `RefCell` is only ever borrowed while the reentrant mutex is
// held, and guards never cross threads.
unsafe impl Sync for SignalsRuntime {}

struct CaptureFrame {
	symbol: Symbol,
	touched: BTreeSet<Symbol>,
}

struct QueuedDeferral {
	symbol: Symbol,
	state: Arc<AtomicU8>,
	run: Box<dyn 'static + Send + FnOnce() -> Propagation>,
}

struct RuntimeState {
	/// `Some` frames record dependencies; `None` frames isolate detached work.
	context_stack: Vec<Option<CaptureFrame>>,
	nodes: BTreeMap<Symbol, Weak<dyn SignalNode>>,
	/// While a symbol is intrinsically subscribed it is present as its own
	/// subscriber here (but not in `all_by_dependency`).
	subscribers_by_dependency: BTreeMap<Symbol, BTreeSet<Symbol>>,
	all_by_dependent: BTreeMap<Symbol, BTreeSet<Symbol>>,
	all_by_dependency: BTreeMap<Symbol, BTreeSet<Symbol>>,
	stale: BTreeSet<Symbol>,
	/// FIFO of unique cells whose value changed inside the current batch.
	pending: VecDeque<Symbol>,
	pending_set: BTreeSet<Symbol>,
	deferrals: VecDeque<QueuedDeferral>,
	batch_depth: usize,
	draining: bool,
}

impl Debug for RuntimeState {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("RuntimeState")
			.field("context_stack_len", &self.context_stack.len())
			.field("nodes", &self.nodes.keys())
			.field("stale", &self.stale)
			.field("pending", &self.pending)
			.field("batch_depth", &self.batch_depth)
			.field("draining", &self.draining)
			.finish_non_exhaustive()
	}
}

static RUNTIME: SignalsRuntime = SignalsRuntime::new();

impl SignalsRuntime {
	const fn new() -> Self {
		Self {
			symbol_counter: AtomicU64::new(0),
			critical_mutex: ReentrantMutex::new(RefCell::new(RuntimeState {
				context_stack: Vec::new(),
				nodes: BTreeMap::new(),
				subscribers_by_dependency: BTreeMap::new(),
				all_by_dependent: BTreeMap::new(),
				all_by_dependency: BTreeMap::new(),
				stale: BTreeSet::new(),
				pending: VecDeque::new(),
				pending_set: BTreeSet::new(),
				deferrals: VecDeque::new(),
				batch_depth: 0,
				draining: false,
			})),
		}
	}
}

type Lock<'a> = ReentrantMutexGuard<'a, RefCell<RuntimeState>>;

/// Allocates a fresh [`Symbol`].
///
/// # Panics
///
/// Panics if the 64-bit symbol space is ever exhausted.
pub fn next_symbol() -> Symbol {
	Symbol(
		(RUNTIME.symbol_counter.fetch_add(1, Ordering::Relaxed) + 1)
			.try_into()
			.expect("infallible within reasonable time"),
	)
}

/// Registers `node` as the callback target for `symbol` and sets up its
/// dependency bookkeeping.
///
/// # Panics
///
/// Panics when `symbol` is registered twice without [`purge`] in between.
pub fn register_node(symbol: Symbol, node: Weak<dyn SignalNode>) {
	let lock = RUNTIME.critical_mutex.lock();
	let mut state = (*lock).borrow_mut();
	assert!(
		state.nodes.insert(symbol, node).is_none(),
		"tried to register a symbol twice without purging it in between"
	);
	state.subscribers_by_dependency.entry(symbol).or_default();
	state.all_by_dependent.entry(symbol).or_default();
	state.all_by_dependency.entry(symbol).or_default();
}

/// Runs `f` inside the runtime's reentrant critical section.
///
/// Cells use this to make compound operations (equality check, write,
/// publish) atomic towards other threads.
pub fn critical<T>(f: impl FnOnce() -> T) -> T {
	let _lock = RUNTIME.critical_mutex.lock();
	f()
}

/// Whether a dependency-recording frame is currently on the capture stack.
#[must_use]
pub fn is_tracking() -> bool {
	let lock = RUNTIME.critical_mutex.lock();
	let state = (*lock).borrow();
	matches!(state.context_stack.last(), Some(Some(_)))
}

/// When called between [`evaluate`] frames that record dependencies,
/// records `symbol` as a dependency of the innermost recording frame.
///
/// # Panics
///
/// Panics when `symbol` was created *after* the recording frame's signal:
/// allowing that would break the creation-order topology the dispatcher
/// relies on, and with it loop freedom.
pub fn record_dependency(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	let mut state = (*lock).borrow_mut();
	if let Some(Some(frame)) = state.context_stack.last_mut() {
		assert!(
			symbol < frame.symbol,
			"a signal can only depend on signals created before it (depending on {symbol:?} from {:?})",
			frame.symbol
		);
		frame.touched.insert(symbol);
	}
}

/// Runs `f` while recording dependencies for `symbol`, then replaces
/// `symbol`'s dependency set with the recorded one, adjusting subscriptions
/// along the way.
///
/// Newly (un)subscribed nodes are notified before this returns, detached
/// from the recording. Pending work that became runnable is drained
/// afterwards.
pub fn evaluate<T>(symbol: Symbol, f: impl FnOnce() -> T) -> T {
	let lock = RUNTIME.critical_mutex.lock();
	{
		let mut state = (*lock).borrow_mut();
		state.context_stack.push(Some(CaptureFrame {
			symbol,
			touched: BTreeSet::new(),
		}));
	}
	let r = catch_unwind(AssertUnwindSafe(f));
	let notifications = {
		let mut state = (*lock).borrow_mut();
		let frame = state
			.context_stack
			.pop()
			.flatten()
			.expect("unreachable: frame pushed above");
		assert_eq!(frame.symbol, symbol);
		update_dependency_set(&mut state, symbol, frame.touched)
	};
	dispatch_subscribed_changes(&lock, notifications);
	maybe_drain(&lock);
	r.unwrap_or_else(|payload| resume_unwind(payload))
}

/// Runs `f` exempted from any outer dependency recording.
pub fn run_detached<T>(f: impl FnOnce() -> T) -> T {
	let lock = RUNTIME.critical_mutex.lock();
	{
		let mut state = (*lock).borrow_mut();
		state.context_stack.push(None);
	}
	let r = catch_unwind(AssertUnwindSafe(f));
	{
		let mut state = (*lock).borrow_mut();
		assert!(
			matches!(state.context_stack.pop(), Some(None)),
			"unreachable: detached frame pushed above"
		);
	}
	maybe_drain(&lock);
	r.unwrap_or_else(|payload| resume_unwind(payload))
}

/// Runs `f` with notification fan-out deferred until the outermost batch
/// exits.
///
/// Batches nest; values written inside still become visible to reads
/// immediately, only announcements and dependent refreshes wait. The depth
/// is decremented through a scope guard, so an unwinding `f` cannot leave
/// the runtime batched.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
	let lock = RUNTIME.critical_mutex.lock();
	(*lock).borrow_mut().batch_depth += 1;
	let _guard = guard((), |()| {
		let lock = RUNTIME.critical_mutex.lock();
		(*lock).borrow_mut().batch_depth -= 1;
		maybe_drain(&lock);
	});
	f()
}

/// Reports that `symbol`'s value observably changed.
///
/// The change joins the current batch's pending queue (first-enqueue order,
/// at most once per cell) and is announced when the outermost batch exits;
/// without an open batch that happens before this returns.
pub fn publish(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	{
		let mut state = (*lock).borrow_mut();
		if state.pending_set.insert(symbol) {
			state.pending.push_back(symbol);
		}
	}
	maybe_drain(&lock);
}

/// Flags `symbol`'s dependents as stale and refreshes the subscribed ones,
/// without announcing `symbol` itself.
///
/// This is the entry point for cells that already performed their own
/// announcement (deferred settlements reconciling out-of-band).
pub fn propagate(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	(*lock).borrow_mut().mark_dependents_stale(symbol);
	maybe_drain(&lock);
}

/// Flags `symbol` itself as stale and schedules a refresh if possible.
pub fn invalidate(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	(*lock).borrow_mut().stale.insert(symbol);
	maybe_drain(&lock);
}

/// Whether `symbol` is currently flagged stale.
#[must_use]
pub fn is_stale(symbol: Symbol) -> bool {
	let lock = RUNTIME.critical_mutex.lock();
	let state = (*lock).borrow();
	state.stale.contains(&symbol)
}

/// Iff `symbol` is stale, clears the flag and runs its refresh callback.
///
/// This is the read path for detached (unsubscribed) signals, which are not
/// refreshed by the dispatcher and catch up on demand.
pub fn refresh(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	let node = {
		let mut state = (*lock).borrow_mut();
		if !state.stale.remove(&symbol) {
			return;
		}
		state.nodes.get(&symbol).and_then(Weak::upgrade)
	};
	if let Some(node) = node {
		// The node's own `refresh` re-enters `evaluate` for capture; the
		// verdict is moot here since dependents were already flagged when
		// the staleness spread.
		let _ = node.refresh();
	}
}

/// Enables or disables the inherent subscription of `symbol`.
///
/// An inherent subscription is one that is active regardless of dependents
/// (listeners, effects). Idempotent aside from the return value, which
/// reports whether anything changed.
pub fn set_intrinsic(symbol: Symbol, enabled: bool) -> bool {
	let lock = RUNTIME.critical_mutex.lock();
	let (changed, notifications) = {
		let mut state = (*lock).borrow_mut();
		if !state.subscribers_by_dependency.contains_key(&symbol) {
			return false;
		}
		let subscribed = state.subscribers_by_dependency[&symbol].contains(&symbol);
		if enabled == subscribed {
			(false, Vec::new())
		} else {
			let RuntimeState {
				all_by_dependent,
				subscribers_by_dependency,
				..
			} = &mut *state;
			let notifications = if enabled {
				subscribe_transitively(
					symbol,
					symbol,
					all_by_dependent,
					subscribers_by_dependency,
				)
			} else {
				unsubscribe_transitively(
					symbol,
					symbol,
					all_by_dependent,
					subscribers_by_dependency,
				)
			};
			(true, notifications)
		}
	};
	dispatch_subscribed_changes(&lock, notifications);
	maybe_drain(&lock);
	changed
}

/// Whether `symbol` currently has any subscription, inherent or through
/// dependents.
#[must_use]
pub fn is_subscribed(symbol: Symbol) -> bool {
	let lock = RUNTIME.critical_mutex.lock();
	let state = (*lock).borrow();
	state
		.subscribers_by_dependency
		.get(&symbol)
		.is_some_and(|subscribers| !subscribers.is_empty())
}

/// Handle to a queued [`defer`] callback.
#[derive(Debug, Clone)]
pub struct Deferral {
	state: Arc<AtomicU8>,
}

const DEFERRAL_PENDING: u8 = 0;
const DEFERRAL_CANCELLED: u8 = 1;
const DEFERRAL_RAN: u8 = 2;

impl Deferral {
	/// Cancels the queued callback. Returns whether it was still pending.
	pub fn cancel(&self) -> bool {
		self.state
			.compare_exchange(
				DEFERRAL_PENDING,
				DEFERRAL_CANCELLED,
				Ordering::SeqCst,
				Ordering::SeqCst,
			)
			.is_ok()
	}

	/// Whether the callback already ran.
	#[must_use]
	pub fn ran(&self) -> bool {
		self.state.load(Ordering::SeqCst) == DEFERRAL_RAN
	}
}

/// Queues `f` to run for `symbol` once the runtime next settles: at the end
/// of the next dispatch drain, or on an explicit [`tick`].
///
/// Unlike [`publish`], the callback never runs inline within the current
/// frame, which gives callers a window to [`Deferral::cancel`] it. That
/// window is what makes disposal safe under hosts that double-invoke mount
/// effects.
pub fn defer(symbol: Symbol, f: impl 'static + Send + FnOnce() -> Propagation) -> Deferral {
	let lock = RUNTIME.critical_mutex.lock();
	let state_flag = Arc::new(AtomicU8::new(DEFERRAL_PENDING));
	(*lock).borrow_mut().deferrals.push_back(QueuedDeferral {
		symbol,
		state: Arc::clone(&state_flag),
		run: Box::new(f),
	});
	Deferral { state: state_flag }
}

/// Drains any pending announcements, refreshes and deferrals.
///
/// Hosts without a natural write to piggyback on call this to flush
/// deferred disposals.
pub fn tick() {
	let lock = RUNTIME.critical_mutex.lock();
	maybe_drain(&lock);
}

/// Removes `symbol` from the runtime: callbacks, dependency relations in
/// either direction, pending work.
///
/// Subscription changes that result are processed (dependencies released by
/// an inherently subscribed `symbol` are notified). The caller must not
/// reuse `symbol` afterwards.
pub fn purge(symbol: Symbol) {
	let lock = RUNTIME.critical_mutex.lock();
	let notifications = {
		let mut state = (*lock).borrow_mut();
		let mut notifications = Vec::new();
		if state
			.subscribers_by_dependency
			.get(&symbol)
			.is_some_and(|subscribers| !subscribers.is_empty())
		{
			let dependencies = state
				.all_by_dependent
				.get(&symbol)
				.map(|dependencies| dependencies.iter().copied().collect::<Vec<_>>())
				.unwrap_or_default();
			let RuntimeState {
				all_by_dependent,
				subscribers_by_dependency,
				..
			} = &mut *state;
			for dependency in dependencies {
				notifications.extend(unsubscribe_transitively(
					dependency,
					symbol,
					all_by_dependent,
					subscribers_by_dependency,
				));
			}
			notifications.push((symbol, false));
		}
		state.stale.remove(&symbol);
		if state.pending_set.remove(&symbol) {
			state.pending.retain(|pending| *pending != symbol);
		}
		state
			.deferrals
			.retain(|deferral| deferral.symbol != symbol);
		{
			let map = &mut state.subscribers_by_dependency;
			map.remove(&symbol);
			for set in map.values_mut() {
				set.remove(&symbol);
			}
		}
		{
			let map = &mut state.all_by_dependent;
			map.remove(&symbol);
			for set in map.values_mut() {
				set.remove(&symbol);
			}
		}
		{
			let map = &mut state.all_by_dependency;
			map.remove(&symbol);
			for set in map.values_mut() {
				set.remove(&symbol);
			}
		}
		notifications
	};
	dispatch_subscribed_changes(&lock, notifications);
	{
		let mut state = (*lock).borrow_mut();
		state.nodes.remove(&symbol);
	}
	maybe_drain(&lock);
}

impl RuntimeState {
	/// Recursively flags all transitive dependents of `symbol` as stale.
	///
	/// Staleness spreads the whole way down so that detached signals can
	/// catch up lazily on their next read; the dispatcher itself only
	/// refreshes the subscribed ones.
	fn mark_dependents_stale(&mut self, symbol: Symbol) {
		fn mark(
			symbol: Symbol,
			all_by_dependency: &BTreeMap<Symbol, BTreeSet<Symbol>>,
			stale: &mut BTreeSet<Symbol>,
		) {
			if let Some(dependents) = all_by_dependency.get(&symbol) {
				for &dependent in dependents {
					if stale.insert(dependent) {
						mark(dependent, all_by_dependency, stale);
					}
				}
			}
		}
		mark(symbol, &self.all_by_dependency, &mut self.stale);
	}

	fn next_subscribed_stale(&self) -> Option<Symbol> {
		self.stale.iter().copied().find(|symbol| {
			self.subscribers_by_dependency
				.get(symbol)
				.is_some_and(|subscribers| !subscribers.is_empty())
		})
	}
}

fn update_dependency_set(
	state: &mut RuntimeState,
	symbol: Symbol,
	touched: BTreeSet<Symbol>,
) -> Vec<(Symbol, bool)> {
	let old = state
		.all_by_dependent
		.insert(symbol, touched.clone())
		.unwrap_or_default();
	let added = touched.difference(&old).copied().collect::<Vec<_>>();
	let removed = old.difference(&touched).copied().collect::<Vec<_>>();

	for &dependency in &removed {
		state
			.all_by_dependency
			.entry(dependency)
			.or_default()
			.remove(&symbol);
	}
	for &dependency in &added {
		state
			.all_by_dependency
			.entry(dependency)
			.or_default()
			.insert(symbol);
	}

	let is_subscribed = state
		.subscribers_by_dependency
		.get(&symbol)
		.is_some_and(|subscribers| !subscribers.is_empty());
	if !is_subscribed {
		return Vec::new();
	}
	let mut notifications = Vec::new();
	let RuntimeState {
		all_by_dependent,
		subscribers_by_dependency,
		..
	} = state;
	for dependency in removed {
		notifications.extend(unsubscribe_transitively(
			dependency,
			symbol,
			all_by_dependent,
			subscribers_by_dependency,
		));
	}
	for dependency in added {
		notifications.extend(subscribe_transitively(
			dependency,
			symbol,
			all_by_dependent,
			subscribers_by_dependency,
		));
	}
	notifications
}

/// Adds `dependent` as a subscriber of `dependency`; when that makes
/// `dependency` newly subscribed, its own dependencies follow suit.
fn subscribe_transitively(
	dependency: Symbol,
	dependent: Symbol,
	all_by_dependent: &BTreeMap<Symbol, BTreeSet<Symbol>>,
	subscribers_by_dependency: &mut BTreeMap<Symbol, BTreeSet<Symbol>>,
) -> Vec<(Symbol, bool)> {
	let subscribers = subscribers_by_dependency.entry(dependency).or_default();
	let newly_subscribed = subscribers.is_empty();
	subscribers.insert(dependent);
	if !newly_subscribed {
		return Vec::new();
	}
	let mut notifications = vec![(dependency, true)];
	if let Some(indirect) = all_by_dependent.get(&dependency) {
		for &indirect_dependency in indirect {
			notifications.extend(subscribe_transitively(
				indirect_dependency,
				dependency,
				all_by_dependent,
				subscribers_by_dependency,
			));
		}
	}
	notifications
}

fn unsubscribe_transitively(
	dependency: Symbol,
	dependent: Symbol,
	all_by_dependent: &BTreeMap<Symbol, BTreeSet<Symbol>>,
	subscribers_by_dependency: &mut BTreeMap<Symbol, BTreeSet<Symbol>>,
) -> Vec<(Symbol, bool)> {
	let Some(subscribers) = subscribers_by_dependency.get_mut(&dependency) else {
		return Vec::new();
	};
	subscribers.remove(&dependent);
	if !subscribers.is_empty() {
		return Vec::new();
	}
	let mut notifications = vec![(dependency, false)];
	if let Some(indirect) = all_by_dependent.get(&dependency) {
		for &indirect_dependency in indirect {
			notifications.extend(unsubscribe_transitively(
				indirect_dependency,
				dependency,
				all_by_dependent,
				subscribers_by_dependency,
			));
		}
	}
	notifications
}

fn node(lock: &Lock<'_>, symbol: Symbol) -> Option<Arc<dyn SignalNode>> {
	let state = (*lock).borrow();
	state.nodes.get(&symbol).and_then(Weak::upgrade)
}

/// Runs `on_subscribed_change` callbacks detached from dependency
/// recording, in the order the transitions occurred.
fn dispatch_subscribed_changes(lock: &Lock<'_>, notifications: Vec<(Symbol, bool)>) {
	for (symbol, subscribed) in notifications {
		let Some(node) = node(lock, symbol) else {
			continue;
		};
		{
			let mut state = (*lock).borrow_mut();
			state.context_stack.push(None);
		}
		let r = catch_unwind(AssertUnwindSafe(|| node.on_subscribed_change(subscribed)));
		{
			let mut state = (*lock).borrow_mut();
			assert!(matches!(state.context_stack.pop(), Some(None)));
		}
		if let Err(payload) = r {
			resume_unwind(payload);
		}
	}
}

/// Drains pending announcements, stale refreshes and deferrals until the
/// runtime settles, then emits the quiescent trace marker.
///
/// No-op while batched, while draining already, or while an evaluation
/// frame is on the stack (the enclosing drain or frame picks the work up).
fn maybe_drain(lock: &Lock<'_>) {
	{
		let state = (*lock).borrow();
		if state.draining || state.batch_depth > 0 || !state.context_stack.is_empty() {
			return;
		}
	}
	(*lock).borrow_mut().draining = true;
	let _guard = guard((), |()| {
		let lock = RUNTIME.critical_mutex.lock();
		(*lock).borrow_mut().draining = false;
	});

	enum Step {
		Announce(Symbol),
		Refresh(Symbol),
		Deferral(QueuedDeferral),
	}

	loop {
		let step = {
			let mut state = (*lock).borrow_mut();
			if let Some(symbol) = state.pending.pop_front() {
				state.pending_set.remove(&symbol);
				Some(Step::Announce(symbol))
			} else if let Some(symbol) = state.next_subscribed_stale() {
				state.stale.remove(&symbol);
				Some(Step::Refresh(symbol))
			} else if let Some(deferral) = state.deferrals.pop_front() {
				Some(Step::Deferral(deferral))
			} else {
				None
			}
		};
		let Some(step) = step else { break };
		match step {
			Step::Announce(symbol) => {
				tracing::trace!(symbol = symbol.get(), "announce");
				if let Some(node) = node(lock, symbol) {
					announce_detached(lock, &node);
				}
				(*lock).borrow_mut().mark_dependents_stale(symbol);
			}
			Step::Refresh(symbol) => {
				tracing::trace!(symbol = symbol.get(), "refresh");
				if let Some(node) = node(lock, symbol) {
					// The node re-enters `evaluate` for its capture frame;
					// its verdict spreads staleness further.
					match node.refresh() {
						Propagation::Propagate => {
							(*lock).borrow_mut().mark_dependents_stale(symbol);
						}
						Propagation::Halt => (),
					}
				}
			}
			Step::Deferral(deferral) => {
				if deferral
					.state
					.compare_exchange(
						DEFERRAL_PENDING,
						DEFERRAL_RAN,
						Ordering::SeqCst,
						Ordering::SeqCst,
					)
					.is_ok()
				{
					match (deferral.run)() {
						Propagation::Propagate => {
							(*lock).borrow_mut().mark_dependents_stale(deferral.symbol);
						}
						Propagation::Halt => (),
					}
				}
			}
		}
	}
	// Every completed top-level pass is a settle point, even an empty one:
	// chain trackers key their boundaries off this marker, and change
	// events emitted by lazy evaluations arrive outside any drain step.
	trace::quiescent();
}

fn announce_detached(lock: &Lock<'_>, node: &Arc<dyn SignalNode>) {
	{
		let mut state = (*lock).borrow_mut();
		state.context_stack.push(None);
	}
	let r = catch_unwind(AssertUnwindSafe(|| node.announce()));
	{
		let mut state = (*lock).borrow_mut();
		assert!(matches!(state.context_stack.pop(), Some(None)));
	}
	if let Err(payload) = r {
		resume_unwind(payload);
	}
}
