use std::{collections::BTreeSet, sync::Arc};

use meristem::{runtime::Symbol, trace};

use crate::traits::Cell;

/// A named many-to-many membership set over signals.
///
/// Membership lives in the trace registries, so external inspectors see
/// tag creation and membership changes as first-class events.
#[derive(Debug, Clone)]
pub struct Tag {
	name: Arc<str>,
}

impl Tag {
	/// Creates (or re-opens) the tag named `name`.
	#[must_use]
	pub fn new(name: &str) -> Self {
		trace::tag_created(name);
		Self { name: name.into() }
	}

	/// The tag's name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Adds `cell` to the tag.
	pub fn add(&self, cell: &dyn Cell) {
		trace::tag_added(&self.name, cell.symbol());
	}

	/// Removes `cell` from the tag.
	pub fn remove(&self, cell: &dyn Cell) {
		trace::tag_removed(&self.name, cell.symbol());
	}

	/// Whether `cell` is currently a member.
	#[must_use]
	pub fn contains(&self, cell: &dyn Cell) -> bool {
		self.members().contains(&cell.symbol())
	}

	/// The current membership set.
	#[must_use]
	pub fn members(&self) -> BTreeSet<Symbol> {
		trace::tags_snapshot()
			.remove(self.name.as_ref())
			.unwrap_or_default()
	}
}
