//! Composition over anything awaitable: loadables, deferred cells, plain
//! cells, and tuples or keyed families thereof.
//!
//! Two entry styles share one contract. [`ready`] is the synchronous probe
//! for render-loop-style consumers: it answers immediately with
//! [`Readiness::Ready`], [`Readiness::Pending`] or [`Readiness::Failed`]
//! and never blocks. [`all`] is the promise-style form that resolves once
//! every input has settled. `any`, `race` and `settled` cover keyed
//! families; [`timeout`] and [`delay`] add timing.

use std::{
	future::Future,
	task::Poll,
	time::Duration,
};

use futures_lite::{future, FutureExt};

use crate::{
	computed::Computed,
	deferred::Deferred,
	loadable::Loadable,
	signal::Signal,
	traits::{Readable, Value},
	SignalError,
};

/// The synchronous answer of [`ready`].
#[derive(Debug, Clone)]
pub enum Readiness<T> {
	/// Every input settled successfully.
	Ready(T),
	/// At least one input is still in flight.
	Pending,
	/// No input is in flight, and at least one failed; carries the first
	/// failure in input order.
	Failed(SignalError),
}

/// One awaitable input: anything that can snapshot itself as a
/// [`Loadable`].
pub trait WaitSource {
	/// The value the input settles to.
	type Output: Value;

	/// The input's current snapshot. Loading snapshots whose settlement
	/// already happened collapse to the settled form.
	fn probe(&self) -> Loadable<Self::Output>;
}

impl<T: Value> WaitSource for Loadable<T> {
	type Output = T;

	fn probe(&self) -> Loadable<T> {
		self.clone().resolved()
	}
}

impl<T: Value> WaitSource for Deferred<T> {
	type Output = T;

	fn probe(&self) -> Loadable<T> {
		match self.try_get() {
			Ok(loadable) => loadable.resolved(),
			Err(error) => Loadable::Failed(error),
		}
	}
}

impl<T: Value> WaitSource for Signal<T> {
	type Output = T;

	fn probe(&self) -> Loadable<T> {
		Loadable::Ready(self.get())
	}
}

impl<T: Value> WaitSource for Computed<T> {
	type Output = T;

	fn probe(&self) -> Loadable<T> {
		match self.try_get() {
			Ok(value) => Loadable::Ready(value),
			Err(error) => Loadable::Failed(error),
		}
	}
}

impl<W: WaitSource> WaitSource for &W {
	type Output = W::Output;

	fn probe(&self) -> Loadable<W::Output> {
		(**self).probe()
	}
}

/// A set of awaitable inputs: a single [`WaitSource`] or a tuple of them.
pub trait WaitSet {
	/// The structurally-mapped output.
	type Output;

	/// Probes every input. Loading beats failure: as long as anything is
	/// in flight the set is [`Readiness::Pending`]; once nothing is, the
	/// first failure in input order wins.
	fn probe_all(&self) -> Readiness<Self::Output>;

	/// Wakers for every input still in flight.
	fn waiters(&self) -> Vec<future::Boxed<()>>;
}

fn probe_to_readiness<T: Value>(probe: Loadable<T>) -> Readiness<T> {
	match probe {
		Loadable::Ready(value) => Readiness::Ready(value),
		Loadable::Loading(_) => Readiness::Pending,
		Loadable::Failed(error) => Readiness::Failed(error),
	}
}

fn waiter_of<T: Value>(probe: Loadable<T>) -> Vec<future::Boxed<()>> {
	match probe {
		Loadable::Loading(settlement) => {
			vec![async move {
				let _ = settlement.wait().await;
			}
			.boxed()]
		}
		Loadable::Ready(_) | Loadable::Failed(_) => Vec::new(),
	}
}

macro_rules! impl_wait_set_via_source {
	($($source:ty),+$(,)?) => {$(
		impl<T: Value> WaitSet for $source {
			type Output = T;

			fn probe_all(&self) -> Readiness<T> {
				probe_to_readiness(self.probe())
			}

			fn waiters(&self) -> Vec<future::Boxed<()>> {
				waiter_of(self.probe())
			}
		}
	)+};
}

impl_wait_set_via_source!(Loadable<T>, Signal<T>, Computed<T>, Deferred<T>);

impl<W: WaitSet> WaitSet for &W {
	type Output = W::Output;

	fn probe_all(&self) -> Readiness<W::Output> {
		(**self).probe_all()
	}

	fn waiters(&self) -> Vec<future::Boxed<()>> {
		(**self).waiters()
	}
}

macro_rules! impl_wait_set_for_tuple {
	($($source:ident: $index:tt),+) => {
		impl<$($source: WaitSource),+> WaitSet for ($($source,)+) {
			type Output = ($($source::Output,)+);

			fn probe_all(&self) -> Readiness<Self::Output> {
				let probes = ($(self.$index.probe(),)+);
				$(
					if probes.$index.is_loading() {
						return Readiness::Pending;
					}
				)+
				$(
					if let Loadable::Failed(error) = &probes.$index {
						return Readiness::Failed(error.clone());
					}
				)+
				Readiness::Ready(($(
					match probes.$index {
						Loadable::Ready(value) => value,
						Loadable::Loading(_) | Loadable::Failed(_) => unreachable!("checked above"),
					},
				)+))
			}

			fn waiters(&self) -> Vec<future::Boxed<()>> {
				let mut waiters = Vec::new();
				$(
					if let Loadable::Loading(settlement) = self.$index.probe() {
						waiters.push(async move {
							let _ = settlement.wait().await;
						}
						.boxed());
					}
				)+
				waiters
			}
		}
	};
}

impl_wait_set_for_tuple!(A: 0);
impl_wait_set_for_tuple!(A: 0, B: 1);
impl_wait_set_for_tuple!(A: 0, B: 1, C: 2);
impl_wait_set_for_tuple!(A: 0, B: 1, C: 2, D: 3);

/// The named-collection form: every entry must settle, and the output keeps
/// the keys alongside the values.
impl<K: Clone, S: WaitSource> WaitSet for Vec<(K, S)> {
	type Output = Vec<(K, S::Output)>;

	fn probe_all(&self) -> Readiness<Self::Output> {
		let probes = self
			.iter()
			.map(|(key, source)| (key, source.probe()))
			.collect::<Vec<_>>();
		if probes.iter().any(|(_, probe)| probe.is_loading()) {
			return Readiness::Pending;
		}
		if let Some(error) = probes.iter().find_map(|(_, probe)| probe.error()) {
			return Readiness::Failed(error.clone());
		}
		Readiness::Ready(
			probes
				.into_iter()
				.map(|(key, probe)| match probe {
					Loadable::Ready(value) => (key.clone(), value),
					Loadable::Loading(_) | Loadable::Failed(_) => unreachable!("checked above"),
				})
				.collect(),
		)
	}

	fn waiters(&self) -> Vec<future::Boxed<()>> {
		self.iter()
			.filter_map(|(_, source)| match source.probe() {
				Loadable::Loading(settlement) => Some(
					async move {
						let _ = settlement.wait().await;
					}
					.boxed(),
				),
				Loadable::Ready(_) | Loadable::Failed(_) => None,
			})
			.collect()
	}
}

/// The suspense-style probe: answers immediately, never blocks.
pub fn ready<W: WaitSet>(input: &W) -> Readiness<W::Output> {
	input.probe_all()
}

/// Resolves once every input settled successfully; fails with the first
/// failure in input order once nothing is left in flight.
///
/// Awaiting this does not *drive* deferred cells — pair it with
/// [`Deferred::settled`] (or a host that drives them) when the inputs are
/// cells rather than already-running settlements.
pub async fn all<W: WaitSet>(input: W) -> Result<W::Output, SignalError> {
	loop {
		match input.probe_all() {
			Readiness::Ready(value) => return Ok(value),
			Readiness::Failed(error) => return Err(error),
			Readiness::Pending => race_waiters(input.waiters()).await,
		}
	}
}

/// Resolves with `(value, key)` of the first entry to settle successfully;
/// fails only once every entry failed (with the first failure).
pub async fn any<K: Clone, S: WaitSource>(
	entries: impl IntoIterator<Item = (K, S)>,
) -> Result<(S::Output, K), SignalError> {
	let entries = entries.into_iter().collect::<Vec<_>>();
	loop {
		let mut first_failure = None;
		let mut waiters = Vec::new();
		for (key, source) in &entries {
			match source.probe() {
				Loadable::Ready(value) => return Ok((value, key.clone())),
				Loadable::Failed(error) => {
					first_failure.get_or_insert(error);
				}
				Loadable::Loading(settlement) => waiters.push(
					async move {
						let _ = settlement.wait().await;
					}
					.boxed(),
				),
			}
		}
		if waiters.is_empty() {
			return Err(first_failure.unwrap_or(SignalError::Aborted));
		}
		race_waiters(waiters).await;
	}
}

/// Resolves with `(outcome, key)` of the first entry to reach a terminal
/// state — which may be a failure.
pub async fn race<K: Clone, S: WaitSource>(
	entries: impl IntoIterator<Item = (K, S)>,
) -> (Result<S::Output, SignalError>, K) {
	let entries = entries.into_iter().collect::<Vec<_>>();
	assert!(!entries.is_empty(), "`race` needs at least one entry");
	loop {
		let mut waiters = Vec::new();
		for (key, source) in &entries {
			match source.probe() {
				Loadable::Ready(value) => return (Ok(value), key.clone()),
				Loadable::Failed(error) => return (Err(error), key.clone()),
				Loadable::Loading(settlement) => waiters.push(
					async move {
						let _ = settlement.wait().await;
					}
					.boxed(),
				),
			}
		}
		race_waiters(waiters).await;
	}
}

/// Resolves once every entry reached a terminal state, with each entry's
/// own outcome.
pub async fn settled<K, S: WaitSource>(
	entries: impl IntoIterator<Item = (K, S)>,
) -> Vec<(K, Result<S::Output, SignalError>)> {
	let mut outcomes = Vec::new();
	for (key, source) in entries {
		let outcome = loop {
			match source.probe() {
				Loadable::Ready(value) => break Ok(value),
				Loadable::Failed(error) => break Err(error),
				Loadable::Loading(settlement) => {
					let _ = settlement.wait().await;
				}
			}
		};
		outcomes.push((key, outcome));
	}
	outcomes
}

/// Wraps `future` with a timer that fails it with
/// [`SignalError::Timeout`] after `after`.
pub async fn timeout<F: Future>(future: F, after: Duration) -> Result<F::Output, SignalError> {
	async { Ok(future.await) }
		.or(async {
			delay(after).await;
			Err(SignalError::Timeout { after })
		})
		.await
}

/// A plain timed future, for composition.
///
/// The engine owns no scheduler; the timer rides a detached sleeper thread
/// bridged through a oneshot channel.
pub fn delay(after: Duration) -> impl Future<Output = ()> {
	let (tx, rx) = futures_channel::oneshot::channel::<()>();
	std::thread::Builder::new()
		.name("tendril-timer".to_owned())
		.spawn(move || {
			std::thread::sleep(after);
			let _ = tx.send(());
		})
		.expect("spawning the timer thread");
	async move {
		let _ = rx.await;
	}
}

/// Resolves once any of `waiters` does.
async fn race_waiters(mut waiters: Vec<future::Boxed<()>>) {
	if waiters.is_empty() {
		return;
	}
	future::poll_fn(move |cx| {
		for waiter in &mut waiters {
			if waiter.as_mut().poll(cx).is_ready() {
				return Poll::Ready(());
			}
		}
		Poll::Pending
	})
	.await;
}
