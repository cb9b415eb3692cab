use std::sync::Arc;

use serde_json::{json, Value as Json};
use tendril::{shadow_clone, Cell, Focus, Path, Readable, Signal, Writable};

use _observations::Journal;

#[test]
fn reads_project_the_path() {
	let root = Signal::new(json!({ "user": { "name": "A" } }));
	let name = Focus::new(&root, "user.name");
	assert_eq!(name.get(), json!("A"));
}

#[test]
fn write_round_trip_rebuilds_the_root_immutably() {
	let root = Signal::new(json!({ "user": { "name": "A" }, "other": [1, 2] }));
	let name = Focus::new(&root, "user.name");

	name.set(json!("B"));

	assert_eq!(
		root.get(),
		json!({ "user": { "name": "B" }, "other": [1, 2] })
	);
	assert_eq!(name.get(), json!("B"));
}

#[test]
fn reverse_writes_reach_the_focus_without_recursion() {
	let log = Arc::new(Journal::new());
	let root = Signal::new(json!({ "user": { "name": "A" } }));
	let name = Focus::new(&root, "user.name");
	let _watch = name.on({
		shadow_clone!(log);
		move |value| log.note(value.clone())
	});

	root.set(json!({ "user": { "name": "C" } }));
	assert_eq!(name.get(), json!("C"));
	log.expect([json!("C")]);
}

#[test]
fn missing_paths_read_null_or_the_fallback() {
	let root = Signal::new(json!({}));
	let absent = Focus::new(&root, "a.b");
	assert_eq!(absent.get(), Json::Null);

	let with_fallback = Focus::with_fallback(&root, "a.c", json!("fallback"));
	assert_eq!(with_fallback.get(), json!("fallback"));
}

#[test]
fn writes_create_missing_intermediates_by_segment_shape() {
	let root = Signal::new(json!({}));
	let deep = Focus::new(&root, "users.0.name");

	deep.set(json!("first"));

	assert_eq!(root.get(), json!({ "users": [{ "name": "first" }] }));
	assert_eq!(deep.get(), json!("first"));
}

#[test]
fn numeric_segments_index_arrays() {
	let root = Signal::new(json!({ "items": ["a", "b", "c"] }));
	let second = Focus::new(&root, "items.1");
	assert_eq!(second.get(), json!("b"));

	second.set(json!("B"));
	assert_eq!(root.get(), json!({ "items": ["a", "B", "c"] }));
}

#[test]
fn focus_naming_encodes_parentage() {
	let root = Signal::new(json!({ "a": 1 })).named("root");
	let focused = Focus::new(&root, "a");
	assert_eq!(focused.display_name(), "focus(root.a)");
}

#[test]
fn sibling_paths_keep_their_identity() {
	let root = Signal::new(json!({ "left": { "n": 1 }, "right": { "n": 2 } }));
	let left = Focus::new(&root, "left.n");
	let right = Focus::new(&root, "right.n");

	left.set(json!(10));

	assert_eq!(left.get(), json!(10));
	assert_eq!(right.get(), json!(2));
	assert_eq!(
		root.get(),
		json!({ "left": { "n": 10 }, "right": { "n": 2 } })
	);
}

#[test]
fn update_applies_to_the_projected_value() {
	let root = Signal::new(json!({ "count": 1 }));
	let count = Focus::new(&root, "count");
	count.update(|value| {
		*value = json!(value.as_i64().unwrap() + 1);
	});
	assert_eq!(root.get(), json!({ "count": 2 }));
}

#[test]
fn paths_parse_and_display() {
	let path = Path::parse("users.0.name");
	assert_eq!(path.to_string(), "users.0.name");
	assert_eq!(path.segments().len(), 3);
}

#[test]
fn focused_writes_are_equality_checked_at_the_root() {
	let log = Arc::new(Journal::new());
	let root = Signal::new(json!({ "n": 1 }));
	let n = Focus::new(&root, "n");
	let _watch = root.on({
		shadow_clone!(log);
		move |_| log.note(())
	});

	n.set(json!(1)); // structurally unchanged root: no propagation
	log.quiet();
	n.set(json!(2));
	log.expect([()]);
}
