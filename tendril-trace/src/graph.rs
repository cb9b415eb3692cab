//! A pure builder deriving a read-only dependency graph from the signals
//! registry and the recorded chains.
//!
//! Edges come from three sources, deduplicated and weighted:
//!
//! 1. temporal adjacency within chain paths (`chain` edges);
//! 2. the `focus(parent.path)` naming convention (`focus` edges, labeled
//!    with the path suffix);
//! 3. the `operator(source)` pipe naming convention (`pipe` edges, labeled
//!    with the operator).
//!
//! The builder never mutates its inputs.

use std::collections::BTreeMap;

use meristem::{
	runtime::Symbol,
	trace::{CellKind, SignalRecord},
};

use crate::Chain;

/// Operators recognized by the pipe naming convention.
const PIPE_OPERATORS: &[&str] = &["map", "to", "filter", "scan", "debounce", "throttle"];

/// How an edge was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
	/// Adjacent in an observed chain reaction.
	Chain,
	/// Focus parentage, from the `focus(parent.path)` name.
	Focus,
	/// Pipe parentage, from the `operator(source)` name.
	Pipe,
}

/// A directed edge from a signal to one of its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
	/// The upstream signal.
	pub from: Symbol,
	/// The downstream signal.
	pub to: Symbol,
	/// How the edge was derived.
	pub kind: EdgeKind,
	/// The focused path suffix or the pipe operator, where applicable.
	pub label: Option<String>,
	/// How many independent derivations produced this edge.
	pub weight: u32,
}

/// One signal, as the graph sees it.
#[derive(Debug, Clone)]
pub struct Node {
	/// The signal's identity.
	pub symbol: Symbol,
	/// Its display name, if any.
	pub name: Option<String>,
	/// Its cell flavor.
	pub kind: CellKind,
	/// Whether it was disposed.
	pub disposed: bool,
	/// How many change events it emitted.
	pub change_count: u64,
}

/// The derived graph: nodes by symbol, edges deduplicated by
/// `(from, to, kind)`.
#[derive(Debug, Clone, Default)]
pub struct Graph {
	/// Nodes, in symbol (creation) order.
	pub nodes: BTreeMap<Symbol, Node>,
	/// Deduplicated, weighted edges.
	pub edges: Vec<Edge>,
}

/// Builds the graph from a registry snapshot and the recorded chains.
#[must_use]
pub fn build(records: &[SignalRecord], chains: &[Chain]) -> Graph {
	let mut nodes = BTreeMap::new();
	for record in records {
		nodes.insert(
			record.symbol,
			Node {
				symbol: record.symbol,
				name: record.name.clone(),
				kind: record.kind,
				disposed: record.disposed,
				change_count: record.change_count,
			},
		);
	}

	// Resolve names to symbols; on collision the youngest undisposed
	// signal wins, matching how operators name their sources.
	let mut by_name = BTreeMap::<&str, Symbol>::new();
	for record in records {
		if let Some(name) = record.name.as_deref() {
			if !record.disposed || !by_name.contains_key(name) {
				by_name.insert(name, record.symbol);
			}
		}
	}

	let mut edges = BTreeMap::<(Symbol, Symbol, EdgeKind), Edge>::new();
	let mut bump = |from: Symbol, to: Symbol, kind: EdgeKind, label: Option<String>| {
		edges
			.entry((from, to, kind))
			.and_modify(|edge| edge.weight += 1)
			.or_insert(Edge {
				from,
				to,
				kind,
				label,
				weight: 1,
			});
	};

	for chain in chains {
		for pair in chain.path.windows(2) {
			bump(pair[0], pair[1], EdgeKind::Chain, None);
		}
	}

	for record in records {
		let Some(name) = record.name.as_deref() else {
			continue;
		};
		if let Some((parent, path)) = parse_focus(name) {
			if let Some(&from) = by_name.get(parent) {
				bump(from, record.symbol, EdgeKind::Focus, Some(path.to_owned()));
			}
		} else if let Some((operator, source)) = parse_pipe(name) {
			if let Some(&from) = by_name.get(source) {
				bump(from, record.symbol, EdgeKind::Pipe, Some(operator.to_owned()));
			}
		}
	}

	Graph {
		nodes,
		edges: edges.into_values().collect(),
	}
}

/// Splits `focus(parent.path)` into `(parent, path)`.
fn parse_focus(name: &str) -> Option<(&str, &str)> {
	let inner = name.strip_prefix("focus(")?.strip_suffix(')')?;
	let (parent, path) = inner.split_once('.')?;
	if parent.is_empty() || path.is_empty() {
		return None;
	}
	Some((parent, path))
}

/// Splits `operator(source)` into `(operator, source)` for the known
/// operators.
fn parse_pipe(name: &str) -> Option<(&str, &str)> {
	let open = name.find('(')?;
	let operator = &name[..open];
	if !PIPE_OPERATORS.contains(&operator) {
		return None;
	}
	let source = name[open + 1..].strip_suffix(')')?;
	if source.is_empty() {
		return None;
	}
	Some((operator, source))
}
