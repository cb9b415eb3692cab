use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tendril::{shadow_clone, trace, wait, Cell, Computed, Deferred, Pipe, Signal, Writable};
use tendril_trace::ChainTracker;

// The sink slot is process-wide; serialize and filter by own symbols.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
	SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn diamond_propagation_records_one_chain() {
	let _serial = serial();
	let tracker = Arc::new(ChainTracker::new());
	trace::install(tracker.clone());

	let a = Signal::new(1);
	let b = a.map(|n| n + 1);
	let c = a.map(|n| n * 2);
	let d = Computed::new({
		shadow_clone!(b, c);
		move |ctx| ctx.dep(&b) + ctx.dep(&c)
	});
	let _watch = d.on(|_| ());

	a.set(5);
	trace::uninstall();

	let expected = vec![a.symbol(), b.symbol(), c.symbol(), d.symbol()];
	let chain = tracker
		.chains()
		.into_iter()
		.find(|chain| chain.path == expected)
		.expect("the diamond produced a chain");
	assert_eq!(chain.occurrences.len(), 1);
	assert!(chain.async_signals.is_empty());
}

#[test]
fn repeated_runs_coalesce_by_path() {
	let _serial = serial();
	let tracker = Arc::new(ChainTracker::new());
	trace::install(tracker.clone());

	let a = Signal::new(0);
	let b = a.map(|n| n + 1);
	let _watch = b.on(|_| ());

	a.set(1);
	a.set(2);
	a.set(3);
	trace::uninstall();

	let expected = vec![a.symbol(), b.symbol()];
	let chain = tracker
		.chains()
		.into_iter()
		.find(|chain| chain.path == expected)
		.expect("the pair produced a chain");
	assert_eq!(chain.occurrences.len(), 3);
	for occurrence in &chain.occurrences {
		assert_eq!(
			occurrence.duration,
			occurrence.end.duration_since(occurrence.start)
		);
	}
}

#[test]
fn single_changes_do_not_form_chains() {
	let _serial = serial();
	let tracker = Arc::new(ChainTracker::new());
	trace::install(tracker.clone());

	let lonely = Signal::new(0);
	lonely.set(1);
	trace::uninstall();

	assert!(tracker
		.chains()
		.iter()
		.all(|chain| !chain.path.contains(&lonely.symbol())));
}

#[test]
fn pending_values_flag_async_signals() {
	let _serial = serial();
	let tracker = Arc::new(ChainTracker::new());
	trace::install(tracker.clone());

	let x = Signal::new(1);
	let y = Deferred::new({
		shadow_clone!(x);
		move |ctx| {
			let n = ctx.dep(&x);
			async move {
				wait::delay(Duration::from_millis(1)).await;
				Ok(n)
			}
		}
	});
	let _watch = y.on(|_| ());

	// The re-evaluation after this write emits a pending value for `y`.
	x.set(2);
	trace::uninstall();

	let chain = tracker
		.chains()
		.into_iter()
		.find(|chain| chain.path.contains(&y.symbol()))
		.expect("the deferred pair produced a chain");
	assert!(chain.async_signals.contains(&y.symbol()));
}

#[test]
fn clear_drops_recorded_chains() {
	let _serial = serial();
	let tracker = Arc::new(ChainTracker::new());
	trace::install(tracker.clone());

	let a = Signal::new(0);
	let b = a.map(|n| *n);
	let _watch = b.on(|_| ());
	a.set(1);

	trace::uninstall();
	assert!(!tracker.chains().is_empty());
	tracker.clear();
	assert!(tracker.chains().is_empty());
}
