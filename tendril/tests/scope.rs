use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tendril::{shadow_clone, tick, Cell, Pipe, Readable, Scope, Signal, Writable};

use _observations::Journal;

// Deferred disposals flush at *any* drain, so concurrently running tests
// would flush each other's. Serialize the file.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
	SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn dispose_runs_in_reverse_registration_order() {
	let _serial = serial();
	let log = Arc::new(Journal::new());
	let scope = Scope::new();

	let a = scope.adopt(Signal::new(1));
	let b = scope.adopt(a.map(|n| n * 2));
	scope.defer({
		shadow_clone!(log);
		move || log.note("cleanup")
	});

	assert_eq!(b.get(), 2);
	scope.dispose();

	assert!(b.is_disposed());
	assert!(a.is_disposed());
	assert!(scope.is_disposed());
	log.expect(["cleanup"]);

	scope.dispose(); // idempotent
	log.quiet();
}

#[test]
fn deferred_dispose_waits_for_the_next_settle_point() {
	let _serial = serial();
	let scope = Scope::new();
	let a = scope.adopt(Signal::new(1));

	let deferral = scope.defer_dispose();
	assert!(!scope.is_disposed());
	assert!(!deferral.ran());

	tick();
	assert!(scope.is_disposed());
	assert!(deferral.ran());
	assert!(a.is_disposed());
}

#[test]
fn writes_flush_pending_deferred_disposals() {
	let _serial = serial();
	let scope = Scope::new();
	let a = scope.adopt(Signal::new(1));
	let unrelated = Signal::new(0);

	let _deferral = scope.defer_dispose();
	assert!(!scope.is_disposed());

	// Any drain is a settle point.
	unrelated.set(1);
	assert!(scope.is_disposed());
	assert!(a.is_disposed());
}

#[test]
fn revive_cancels_a_pending_disposal() {
	let _serial = serial();
	let scope = Scope::new();
	let a = scope.adopt(Signal::new(1));

	let deferral = scope.defer_dispose();
	assert!(scope.revive());
	assert!(!deferral.ran());

	tick();
	assert!(!scope.is_disposed());
	a.set(2);
	assert_eq!(a.get(), 2);

	// Nothing pending anymore.
	assert!(!scope.revive());
}

#[test]
fn double_invocation_handshake() {
	let _serial = serial();
	// A host mounting, unmount-effecting and re-mounting within one
	// synchronous frame must keep the scope alive.
	let scope = Scope::new();
	let state = scope.adopt(Signal::new("mounted"));

	// Unmount effect: schedule the terminal disposal…
	let _deferral = scope.defer_dispose();
	// …re-mount arrives before the runtime settles:
	scope.revive();

	tick();
	assert!(!scope.is_disposed());
	assert_eq!(state.get(), "mounted");

	// A second unmount with no re-mount really disposes.
	let _deferral = scope.defer_dispose();
	tick();
	assert!(scope.is_disposed());
}

#[test]
fn forget_releases_without_running_cleanups() {
	let _serial = serial();
	let log = Arc::new(Journal::new());
	let scope = Scope::new();
	let a = scope.adopt(Signal::new(1));
	scope.defer({
		shadow_clone!(log);
		move || log.note("cleanup")
	});

	scope.forget();
	assert!(a.is_disposed());
	log.quiet();
}
