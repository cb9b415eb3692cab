//! Property suites for the quantified engine invariants.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

use proptest::prelude::*;
use tendril::{batch, shadow_clone, Cell, Computed, Pipe, Readable, Signal, Writable};

/// A derived cell's recipe in the model: sum selected upstream cells and
/// add a constant.
#[derive(Debug, Clone)]
struct DerivedSpec {
	upstream: Vec<prop::sample::Index>,
	offset: i64,
}

fn derived_specs() -> impl Strategy<Value = Vec<DerivedSpec>> {
	prop::collection::vec(
		(
			prop::collection::vec(any::<prop::sample::Index>(), 1..4),
			-10i64..10,
		)
			.prop_map(|(upstream, offset)| DerivedSpec { upstream, offset }),
		1..6,
	)
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(64))]

	/// Glitch-freedom: after any batch of writes over any layered DAG,
	/// every derived cell equals its compute over the final source values.
	#[test]
	fn derived_cells_settle_to_their_model(
		source_values in prop::collection::vec(-100i64..100, 1..4),
		specs in derived_specs(),
		writes in prop::collection::vec((any::<prop::sample::Index>(), -100i64..100), 0..8),
	) {
		let sources = source_values
			.iter()
			.map(|value| Signal::new(*value))
			.collect::<Vec<_>>();

		// Layer the derived cells: each may read sources and any earlier
		// derived cell, so creation order stays a topological order.
		let mut derived = Vec::<Computed<i64>>::new();
		for spec in &specs {
			let upstream_sources = sources.clone();
			let upstream_derived = derived.clone();
			let spec_clone = spec.clone();
			let cell = Computed::new(move |ctx| {
				let mut total = spec_clone.offset;
				for index in &spec_clone.upstream {
					let pool = upstream_sources.len() + upstream_derived.len();
					let position = index.index(pool);
					total += if position < upstream_sources.len() {
						ctx.dep(&upstream_sources[position])
					} else {
						ctx.dep(&upstream_derived[position - upstream_sources.len()])
					};
				}
				total
			});
			derived.push(cell);
		}

		// Keep the last derived cell hot so the push path is exercised.
		let _watch = derived.last().map(|cell| cell.on(|_| ()));

		let mut model_sources = source_values;
		batch(|| {
			for (index, value) in &writes {
				let position = index.index(model_sources.len());
				sources[position].set(*value);
				model_sources[position] = *value;
			}
		});

		// The model: fold each spec over the settled values.
		let mut model_derived = Vec::<i64>::new();
		for spec in &specs {
			let mut total = spec.offset;
			for index in &spec.upstream {
				let pool = model_sources.len() + model_derived.len();
				let position = index.index(pool);
				total += if position < model_sources.len() {
					model_sources[position]
				} else {
					model_derived[position - model_sources.len()]
				};
			}
			model_derived.push(total);
		}

		for (cell, expected) in derived.iter().zip(&model_derived) {
			prop_assert_eq!(cell.get(), *expected);
		}
	}

	/// Exactly one listener notification per equality-distinct transition,
	/// in write order.
	#[test]
	fn one_notification_per_distinct_transition(
		initial in -100i64..100,
		writes in prop::collection::vec(-100i64..100, 0..16),
	) {
		let observed = Arc::new(Mutex::new(Vec::new()));
		let a = Signal::new(initial);
		let _watch = a.on({
			shadow_clone!(observed);
			move |value| observed.lock().unwrap().push(*value)
		});

		for value in &writes {
			a.set(*value);
		}

		let mut expected = Vec::new();
		let mut current = initial;
		for value in writes {
			if value != current {
				expected.push(value);
				current = value;
			}
		}
		prop_assert_eq!(observed.lock().unwrap().clone(), expected);
	}

	/// Cleanup exactness: every evaluation that registered a cleanup sees
	/// it run exactly once, by the end of the cell's life.
	#[test]
	fn cleanups_run_exactly_once_per_evaluation(
		writes in prop::collection::vec(-100i64..100, 0..8),
	) {
		let evaluations = Arc::new(AtomicUsize::new(0));
		let cleanups = Arc::new(AtomicUsize::new(0));

		let a = Signal::new(0i64);
		let tracked = Computed::new({
			shadow_clone!(a, evaluations, cleanups);
			move |ctx| {
				evaluations.fetch_add(1, Ordering::SeqCst);
				ctx.cleanup({
					shadow_clone!(cleanups);
					move || {
						cleanups.fetch_add(1, Ordering::SeqCst);
					}
				});
				ctx.dep(&a)
			}
		});
		let _watch = tracked.on(|_| ());

		for value in writes {
			a.set(value);
		}
		tracked.dispose();

		prop_assert_eq!(
			cleanups.load(Ordering::SeqCst),
			evaluations.load(Ordering::SeqCst)
		);
	}

	/// Piped chains agree with direct computation regardless of write
	/// interleaving.
	#[test]
	fn pipe_chains_agree_with_the_model(
		initial in -50i64..50,
		writes in prop::collection::vec(-50i64..50, 0..10),
	) {
		let a = Signal::new(initial);
		let chained = a.map(|n| n * 2).map(|n| n + 1);

		for value in &writes {
			a.set(*value);
		}

		let last = writes.last().copied().unwrap_or(initial);
		prop_assert_eq!(chained.get(), last * 2 + 1);
	}
}
