use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use futures_lite::future::block_on;
use tendril::{
	shadow_clone, wait, AbortSignal, Cell, Computed, ComputedOptions, Deferred, LoadStatus,
	Loadable, Pipe, Readable, Signal, SignalError, Writable,
};

mod _drive;
use _drive::poll_once;
use _observations::Journal;

#[test]
fn first_read_is_loading_then_settles() {
	let x = Signal::new(2);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				wait::delay(Duration::from_millis(5)).await;
				Ok(n * 2)
			}
		}
	});

	assert_eq!(y.get().status(), LoadStatus::Loading);
	assert_eq!(y.settle_blocking(), Ok(4));
	assert_eq!(y.get().status(), LoadStatus::Ready);
	assert_eq!(y.get().value(), Some(&4));
}

#[test]
fn superseded_evaluations_never_surface() {
	let x = Signal::new(0);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				wait::delay(Duration::from_millis(5)).await;
				Ok(n * 2)
			}
		}
	});

	assert!(y.get().is_loading());

	// Supersede before the first evaluation ever settles.
	x.set(3);
	assert_eq!(y.settle_blocking(), Ok(6));
	assert_eq!(y.get().value(), Some(&6));
}

#[test]
fn late_settlements_of_driven_evaluations_are_discarded() {
	let x = Signal::new(0);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				wait::delay(Duration::from_millis(20)).await;
				Ok(n * 2)
			}
		}
	});
	let _watch = y.on(|_| ());

	// Start driving the first evaluation, then supersede it mid-flight.
	let mut stale_drive = Box::pin(y.settled());
	assert!(poll_once(stale_drive.as_mut()).is_pending());
	x.set(3);

	// The stale drive still reports its own result…
	assert_eq!(block_on(stale_drive), Ok(0));
	// …but the cell discarded it in favor of the newer evaluation.
	assert!(y.get().is_loading());
	assert_eq!(y.settle_blocking(), Ok(6));
}

#[test]
fn abort_tokens_cover_superseded_io() {
	let tokens = Arc::new(Mutex::new(Vec::<AbortSignal>::new()));
	let x = Signal::new(0);
	let y = Deferred::new({
		shadow_clone!(x, tokens);
		move |ctx| {
			let n = ctx.dep(&x);
			let abort = ctx.abort();
			tokens.lock().unwrap().push(abort.clone());
			async move {
				// Simulated cancellable I/O.
				abort.check()?;
				Ok(n)
			}
		}
	});
	let _watch = y.on(|_| ());

	assert!(y.get().is_loading());
	x.set(1);
	{
		let tokens = tokens.lock().unwrap();
		assert_eq!(tokens.len(), 2);
		assert!(tokens[0].is_aborted());
		assert!(!tokens[1].is_aborted());
	}
	assert_eq!(y.settle_blocking(), Ok(1));
}

#[test]
fn rejections_store_the_error() {
	let x = Signal::new(1);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				if n < 0 {
					Err(SignalError::deferred("negative input"))
				} else {
					Ok(n)
				}
			}
		}
	});

	assert_eq!(y.settle_blocking(), Ok(1));

	x.set(-1);
	assert!(y.settle_blocking().is_err());
	assert_eq!(y.get().status(), LoadStatus::Failed);
	assert!(y.error().is_some());
}

#[test]
fn fallback_reconciles_to_success() {
	let x = Signal::new(-1);
	let y = Deferred::with_options(
		{
			shadow_clone!(x);
			move |ctx| {
				let n = ctx.try_dep(&x);
				async move {
					let n = n?;
					if n < 0 {
						Err(SignalError::deferred("negative input"))
					} else {
						Ok(n)
					}
				}
			}
		},
		ComputedOptions::default().fallback(|_| 0),
	);

	// The evaluation's own outcome is the error…
	assert!(y.settle_blocking().is_err());
	// …while the cell presents the fallback as success.
	assert_eq!(y.get().value(), Some(&0));
	assert!(y.error().is_some());
}

#[test]
fn listeners_observe_loading_and_settled_snapshots() {
	let log = Arc::new(Journal::new());
	let x = Signal::new(1);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move { Ok(n * 10) }
		}
	});
	let _watch = y.on({
		shadow_clone!(log);
		move |loadable: &Loadable<i32>| log.note(loadable.status())
	});

	// Listening forced the first evaluation, so only its settlement is
	// observed; later evaluations surface their loading phase too.
	assert_eq!(y.settle_blocking(), Ok(10));
	log.expect([LoadStatus::Ready]);

	x.set(2);
	assert_eq!(y.settle_blocking(), Ok(20));
	log.expect([LoadStatus::Loading, LoadStatus::Ready]);
}

#[test]
fn resolution_equality_compares_resolved_values() {
	let log = Arc::new(Journal::new());
	let x = Signal::new(3i32);
	let magnitude = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move { Ok(n.abs()) }
		}
	});
	let downstream = Computed::new({
		shadow_clone!(magnitude);
		move |ctx| match ctx.dep(&magnitude) {
			Loadable::Ready(n) => n,
			Loadable::Loading(_) | Loadable::Failed(_) => -1,
		}
	});
	let _watch = downstream.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	assert_eq!(magnitude.settle_blocking(), Ok(3));
	log.expect([3]);

	x.set(-3);
	assert_eq!(magnitude.settle_blocking(), Ok(3));
	// Loading transitioned through, but the resolved value held steady.
	log.expect([-1, 3]);
}

#[test]
fn cleanups_and_dispose() {
	let cleanups = Arc::new(AtomicUsize::new(0));
	let x = Signal::new(0);
	let y = Deferred::new({
		shadow_clone!(x, cleanups);
		move |ctx| {
			let n = ctx.dep(&x);
			ctx.cleanup({
				shadow_clone!(cleanups);
				move || {
					cleanups.fetch_add(1, Ordering::SeqCst);
				}
			});
			async move { Ok(n) }
		}
	});

	assert_eq!(y.settle_blocking(), Ok(0));
	x.set(1); // flags the cell; the next evaluation drains the cleanup
	assert_eq!(y.settle_blocking(), Ok(1));
	assert_eq!(cleanups.load(Ordering::SeqCst), 1);

	y.dispose();
	assert_eq!(cleanups.load(Ordering::SeqCst), 2);
	assert!(y.is_disposed());
}

#[test]
fn disposal_unblocks_waiters() {
	let x = Signal::new(0);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				wait::delay(Duration::from_secs(3600)).await;
				Ok(n)
			}
		}
	});

	let loadable = y.get();
	assert!(loadable.is_loading());
	y.dispose();
	assert_eq!(
		block_on(loadable.wait()),
		Err(SignalError::Disposed)
	);
}

#[test]
fn repeated_snapshots_of_one_evaluation_share_their_settlement() {
	let x = Signal::new(1);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move { Ok(n) }
		}
	});

	let first = y.get().settlement();
	let second = y.get().settlement();
	assert!(first.shares_identity(&second));

	// A new evaluation gets a new slot.
	x.set(2);
	let third = y.get().settlement();
	assert!(!first.shares_identity(&third));
}

#[test]
fn deferred_cells_can_be_piped() {
	let x = Signal::new(2);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move { Ok(n + 1) }
		}
	});
	let status = y.map_with(
		|loadable: &Loadable<i32>| loadable.value().copied(),
		tendril::Equality::structural(),
	);

	assert_eq!(status.get(), None);
	assert_eq!(y.settle_blocking(), Ok(3));
	assert_eq!(status.get(), Some(3));
}
