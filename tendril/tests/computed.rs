use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use tendril::{
	shadow_clone, Cell, Computed, ComputedOptions, Equality, Pipe, Readable, Signal, SignalError,
	Writable,
};

use _observations::Journal;

#[test]
fn evaluates_lazily_and_caches() {
	let evaluations = Arc::new(AtomicUsize::new(0));
	let a = Signal::new(1);
	let doubled = Computed::new({
		shadow_clone!(a, evaluations);
		move |ctx| {
			evaluations.fetch_add(1, Ordering::SeqCst);
			ctx.dep(&a) * 2
		}
	});

	assert_eq!(evaluations.load(Ordering::SeqCst), 0);
	assert_eq!(doubled.get(), 2);
	assert_eq!(doubled.get(), 2);
	assert_eq!(evaluations.load(Ordering::SeqCst), 1);

	a.set(5);
	assert_eq!(doubled.get(), 10);
	assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[test]
fn diamond_evaluates_the_join_exactly_once_per_change() {
	let log = Arc::new(Journal::new());
	let joins = Arc::new(AtomicUsize::new(0));

	let a = Signal::new(1);
	let b = a.map(|n| n + 1);
	let c = a.map(|n| n * 2);
	let d = Computed::new({
		shadow_clone!(b, c, joins);
		move |ctx| {
			joins.fetch_add(1, Ordering::SeqCst);
			ctx.dep(&b) + ctx.dep(&c)
		}
	});
	let _watch = d.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	assert_eq!(d.get(), 4);
	assert_eq!(joins.load(Ordering::SeqCst), 1);

	a.set(5);
	log.expect([16]); // (5 + 1) + (5 * 2), announced exactly once
	assert_eq!(d.get(), 16);
	assert_eq!(joins.load(Ordering::SeqCst), 2);
}

#[test]
fn dependency_reads_are_cached_within_one_evaluation() {
	let a = Signal::new(1);
	let sampled = Computed::new({
		shadow_clone!(a);
		move |ctx| {
			let first = ctx.dep(&a);
			let second = ctx.dep(&a);
			(first, second)
		}
	});
	assert_eq!(sampled.get(), (1, 1));
}

#[test]
fn detached_cells_catch_up_on_read() {
	let evaluations = Arc::new(AtomicUsize::new(0));
	let a = Signal::new(1);
	let through = Computed::new({
		shadow_clone!(a, evaluations);
		move |ctx| {
			evaluations.fetch_add(1, Ordering::SeqCst);
			ctx.dep(&a)
		}
	});

	assert_eq!(through.get(), 1);
	// No subscribers: changes only flag staleness.
	a.set(2);
	a.set(3);
	assert_eq!(evaluations.load(Ordering::SeqCst), 1);
	assert_eq!(through.get(), 3);
	assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[test]
fn unsubscribing_returns_to_the_detached_state() {
	let evaluations = Arc::new(AtomicUsize::new(0));
	let a = Signal::new(1);
	let through = Computed::new({
		shadow_clone!(a, evaluations);
		move |ctx| {
			evaluations.fetch_add(1, Ordering::SeqCst);
			ctx.dep(&a)
		}
	});

	let watch = through.on(|_| ());
	a.set(2); // subscribed: eager re-evaluation
	assert_eq!(evaluations.load(Ordering::SeqCst), 2);

	watch.unlisten();
	a.set(3); // detached again: lazy
	assert_eq!(evaluations.load(Ordering::SeqCst), 2);
	assert_eq!(through.get(), 3);
}

#[test]
fn chained_computeds_propagate_in_dependency_order() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(1);
	let b = a.map(|n| n * 10);
	let c = b.map(|n| n + 1);
	let _watch = c.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	a.set(2);
	log.expect([21]);
}

#[test]
fn equality_stops_the_cascade() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(-3);
	let magnitude = a.map(|n: &i32| n.abs());
	let shifted = magnitude.map(|n| n + 100);
	let _watch = shifted.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	assert_eq!(shifted.get(), 103);
	a.set(3); // magnitude unchanged, so nothing observable moves
	log.quiet();
	assert_eq!(shifted.get(), 103);
}

#[test]
fn cleanups_run_before_the_next_evaluation_and_at_disposal() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0);
	let tracked = Computed::new({
		shadow_clone!(a, log);
		move |ctx| {
			let value = ctx.dep(&a);
			ctx.cleanup({
				shadow_clone!(log);
				move || log.note(("cleanup", value))
			});
			value
		}
	});

	assert_eq!(tracked.get(), 0);
	log.quiet();

	a.set(1);
	assert_eq!(tracked.get(), 1);
	log.expect([("cleanup", 0)]);

	tracked.dispose();
	log.expect([("cleanup", 1)]);
	tracked.dispose();
	log.quiet();
}

#[test]
fn cleanups_run_in_reverse_registration_order() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0);
	let tracked = Computed::new({
		shadow_clone!(a, log);
		move |ctx| {
			let value = ctx.dep(&a);
			for i in 0..3 {
				ctx.cleanup({
					shadow_clone!(log);
					move || log.note(i)
				});
			}
			value
		}
	});
	let _ = tracked.get();
	tracked.dispose();
	log.expect([2, 1, 0]);
}

#[test]
fn abort_token_fires_exactly_on_supersession_and_disposal() {
	let tokens = Arc::new(token_log::TokenLog::new());
	let a = Signal::new(0);
	let tracked = Computed::new({
		shadow_clone!(a, tokens);
		move |ctx| {
			tokens.record(ctx.abort());
			ctx.dep(&a)
		}
	});

	let _ = tracked.get();
	assert_eq!(tokens.aborted_flags(), vec![false]);

	a.set(1);
	let _ = tracked.get();
	assert_eq!(tokens.aborted_flags(), vec![true, false]);

	tracked.dispose();
	assert_eq!(tokens.aborted_flags(), vec![true, true]);
}

/// Collects the abort signals handed to successive evaluations.
mod token_log {
	use std::sync::Mutex;
	use tendril::AbortSignal;

	pub struct TokenLog(Mutex<Vec<AbortSignal>>);

	impl TokenLog {
		pub fn new() -> Self {
			Self(Mutex::new(Vec::new()))
		}

		pub fn record(&self, signal: AbortSignal) {
			self.0.lock().unwrap().push(signal);
		}

		pub fn aborted_flags(&self) -> Vec<bool> {
			self.0
				.lock()
				.unwrap()
				.iter()
				.map(AbortSignal::is_aborted)
				.collect()
		}
	}
}

#[test]
fn errors_are_stored_and_rethrown_on_get() {
	let a = Signal::new(1);
	let fallible = Computed::fallible({
		shadow_clone!(a);
		move |ctx| {
			let n = ctx.dep(&a);
			if n < 0 {
				Err(SignalError::compute("negative input"))
			} else {
				Ok(n)
			}
		}
	});

	assert_eq!(fallible.try_get(), Ok(1));
	assert_eq!(fallible.error(), None);

	a.set(-1);
	assert!(matches!(
		fallible.try_get(),
		Err(SignalError::Compute { .. })
	));
	assert!(fallible.error().is_some());

	a.set(2);
	assert_eq!(fallible.try_get(), Ok(2));
	assert_eq!(fallible.error(), None);
}

#[test]
fn panics_in_compute_are_contained_as_errors() {
	let a = Signal::new(0);
	let panicky = Computed::new({
		shadow_clone!(a);
		move |ctx| {
			let n = ctx.dep(&a);
			assert!(n < 10, "too large");
			n
		}
	});

	assert_eq!(panicky.try_get(), Ok(0));
	a.set(10);
	assert!(panicky.try_get().is_err());
}

#[test]
fn fallback_presents_success_while_recording_the_error() {
	let errors = Arc::new(AtomicUsize::new(0));
	let a = Signal::new(1);
	let guarded = Computed::with_options(
		{
			shadow_clone!(a);
			move |ctx| {
				let n = ctx.try_dep(&a)?;
				if n < 0 {
					Err(SignalError::compute("negative input"))
				} else {
					Ok(n)
				}
			}
		},
		ComputedOptions::default().fallback(|_| -1).on_error({
			shadow_clone!(errors);
			move |_| {
				errors.fetch_add(1, Ordering::SeqCst);
			}
		}),
	);

	assert_eq!(guarded.get(), 1);
	a.set(-5);
	assert_eq!(guarded.get(), -1); // fallback value, presented as success
	assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn paused_cells_skip_reevaluation_until_resume() {
	let evaluations = Arc::new(AtomicUsize::new(0));
	let a = Signal::new(1);
	let tracked = Computed::new({
		shadow_clone!(a, evaluations);
		move |ctx| {
			evaluations.fetch_add(1, Ordering::SeqCst);
			ctx.dep(&a)
		}
	});
	let _watch = tracked.on(|_| ());
	assert_eq!(evaluations.load(Ordering::SeqCst), 1);

	tracked.pause();
	a.set(2);
	a.set(3);
	assert_eq!(evaluations.load(Ordering::SeqCst), 1);
	assert_eq!(tracked.get(), 1); // stale but paused

	tracked.resume();
	assert_eq!(evaluations.load(Ordering::SeqCst), 2);
	assert_eq!(tracked.get(), 3);
}

#[test]
fn custom_equality_controls_propagation() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(1);
	let sampled = Computed::with_options(
		{
			shadow_clone!(a);
			move |ctx| ctx.try_dep(&a)
		},
		ComputedOptions::with_equality(Equality::with(|_: &i32, _: &i32| true)),
	);
	let _watch = sampled.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	a.set(2); // the resolver treats everything as unchanged
	log.quiet();
}

#[test]
fn safe_contains_panics_of_sub_computations() {
	let a = Signal::new(0);
	let guarded = Computed::new({
		shadow_clone!(a);
		move |ctx| {
			let n = ctx.dep(&a);
			let risky = ctx.safe(|_| {
				assert!(n != 1, "one is forbidden");
				n * 10
			});
			risky.unwrap_or(-1)
		}
	});

	assert_eq!(guarded.get(), 0);
	a.set(1);
	assert_eq!(guarded.get(), -1);
	a.set(2);
	assert_eq!(guarded.get(), 20);
}
