use std::sync::Arc;

use tendril::{batch, equality, shadow_clone, Cell, Equality, Readable, Signal, Writable};

use _observations::Journal;

#[test]
fn set_and_get() {
	let a = Signal::new(1);
	assert_eq!(a.get(), 1);
	a.set(2);
	assert_eq!(a.get(), 2);
	assert_eq!(a.try_get(), Ok(2));
}

#[test]
fn update_derives_from_current() {
	let items = Signal::new(vec![1, 2, 3]);
	items.update(|items| items.push(4));
	assert_eq!(items.get(), vec![1, 2, 3, 4]);
}

#[test]
fn reset_restores_initial() {
	let a = Signal::new("initial".to_owned());
	a.set("changed".to_owned());
	a.reset();
	assert_eq!(a.get(), "initial");
}

#[test]
fn lazy_initializer_runs_on_first_access() {
	let a = Signal::lazy(|| 42);
	a.set(7);
	assert_eq!(a.get(), 7);
	a.reset();
	assert_eq!(a.get(), 42);
}

#[test]
fn listeners_fire_once_per_distinct_change() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0);
	let watch = a.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	a.set(1);
	a.set(1); // unchanged, no event
	a.set(2);
	log.expect([1, 2]);

	watch.unlisten();
	a.set(3);
	log.quiet();
}

#[test]
fn batched_writes_announce_once_in_enqueue_order() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0).named("a");
	let b = Signal::new(0).named("b");
	let _watch_a = a.on({
		shadow_clone!(log);
		move |n| log.note(("a", *n))
	});
	let _watch_b = b.on({
		shadow_clone!(log);
		move |n| log.note(("b", *n))
	});

	batch(|| {
		a.set(1);
		b.set(2);
		a.set(3);
		log.quiet();
	});
	log.expect([("a", 3), ("b", 2)]);
}

#[test]
fn nested_batches_defer_to_the_outermost() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0);
	let _watch = a.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	batch(|| {
		batch(|| a.set(1));
		log.quiet();
		a.set(2);
	});
	log.expect([2]);
}

#[test]
fn custom_equality_decides_changes() {
	let log = Arc::new(Journal::new());
	let a = Signal::with_equality(1.0_f64, equality::bitwise_f64());
	let _watch = a.on({
		shadow_clone!(log);
		move |n| log.note(n.to_bits())
	});

	a.set(f64::NAN);
	a.set(f64::NAN); // NaN is itself under bitwise equality
	log.expect([f64::NAN.to_bits()]);
}

#[test]
fn never_equality_propagates_every_write() {
	let log = Arc::new(Journal::new());
	let a = Signal::with_equality(0, Equality::Never);
	let _watch = a.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	a.set(0);
	a.set(0);
	log.expect([0, 0]);
}

#[test]
fn disposed_cells_ignore_writes_and_keep_their_value() {
	let a = Signal::new(5);
	a.dispose();
	assert!(a.is_disposed());

	a.set(6);
	assert_eq!(a.get(), 5);

	let watch = a.on(|_| panic!("listener on a disposed cell"));
	a.set(7);
	watch.unlisten();

	a.dispose(); // idempotent
	assert_eq!(a.get(), 5);
}

#[test]
fn writes_from_listeners_join_the_current_drain() {
	let log = Arc::new(Journal::new());
	let a = Signal::new(0);
	let b = Signal::new(0);
	let _forward = a.on({
		shadow_clone!(b);
		move |n| b.set(*n)
	});
	let _watch_b = b.on({
		shadow_clone!(log);
		move |n| log.note(*n)
	});

	a.set(4);
	log.expect([4]);
	assert_eq!(b.get(), 4);
}

#[test]
fn json_coercion_is_the_current_value() {
	let a = Signal::new(vec![1, 2]);
	assert_eq!(serde_json::to_string(&a).unwrap(), "[1,2]");
}
