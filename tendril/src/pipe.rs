//! Pipe operators: derived cells with canonical names.
//!
//! Every operator returns a [`Computed`] whose display name follows the
//! `operator(source)` convention, which is what lets graph builders
//! reconstruct parentage from the trace registry alone.

use parking_lot::Mutex;

use crate::{
	computed::{Computed, ComputedOptions},
	equality::Equality,
	traits::{Cell, Readable, Value},
};

/// Derivation operators available on every readable cell handle.
pub trait Pipe<T: Value>: Readable<T> + Clone + Sized + 'static {
	/// A cell holding `f` of the source's value.
	fn map<U: Value + PartialEq>(
		&self,
		f: impl Fn(&T) -> U + Send + Sync + 'static,
	) -> Computed<U> {
		self.map_with(f, Equality::structural())
	}

	/// [`map`](`Pipe::map`) with an explicit equality resolver.
	fn map_with<U: Value>(
		&self,
		f: impl Fn(&T) -> U + Send + Sync + 'static,
		equality: Equality<U>,
	) -> Computed<U> {
		let source = self.clone();
		let name = format!("map({})", self.display_name());
		Computed::with_options(
			move |ctx| Ok(f(&ctx.try_dep(&source)?)),
			ComputedOptions::with_equality(equality).name(&name),
		)
	}

	/// Like [`map`](`Pipe::map`), separately named so observers can tell
	/// projection pipes apart from general maps.
	fn to<U: Value + PartialEq>(
		&self,
		f: impl Fn(&T) -> U + Send + Sync + 'static,
	) -> Computed<U> {
		let source = self.clone();
		let name = format!("to({})", self.display_name());
		Computed::with_options(
			move |ctx| Ok(f(&ctx.try_dep(&source)?)),
			ComputedOptions::with_equality(Equality::structural()).name(&name),
		)
	}

	/// A seeded fold over the source's changes.
	///
	/// The first read yields `seed`; each subsequent source change yields
	/// `reducer(accumulator, source)`. Re-evaluations without a source
	/// change (the dispatcher may revisit) leave the accumulator alone.
	fn scan<U: Value + PartialEq>(
		&self,
		seed: U,
		reducer: impl Fn(&U, &T) -> U + Send + Sync + 'static,
	) -> Computed<U>
	where
		T: PartialEq,
	{
		let source = self.clone();
		let name = format!("scan({})", self.display_name());
		let folded = Mutex::new(None::<(T, U)>);
		Computed::with_options(
			move |ctx| {
				let value = ctx.try_dep(&source)?;
				let mut folded = folded.lock();
				let next = match &*folded {
					None => seed.clone(),
					Some((input, accumulator)) if *input == value => accumulator.clone(),
					Some((_, accumulator)) => reducer(accumulator, &value),
				};
				*folded = Some((value, next.clone()));
				Ok(next)
			},
			ComputedOptions::with_equality(Equality::structural()).name(&name),
		)
	}

	/// A cell holding the source's *last accepted* value.
	///
	/// The initial value passes through unconditionally; afterwards,
	/// changes failing `predicate` keep the previous value and do not
	/// propagate.
	fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Computed<T>
	where
		T: PartialEq,
	{
		let source = self.clone();
		let name = format!("filter({})", self.display_name());
		let accepted = Mutex::new(None::<T>);
		Computed::with_options(
			move |ctx| {
				let value = ctx.try_dep(&source)?;
				let mut accepted = accepted.lock();
				match &*accepted {
					Some(previous) if !predicate(&value) => Ok(previous.clone()),
					_ => {
						*accepted = Some(value.clone());
						Ok(value)
					}
				}
			},
			ComputedOptions::with_equality(Equality::structural()).name(&name),
		)
	}

	/// Skips consecutive equality-equal values, under the canonical
	/// `debounce(source)` name.
	fn debounce(&self) -> Computed<T>
	where
		T: PartialEq,
	{
		let source = self.clone();
		let name = format!("debounce({})", self.display_name());
		Computed::with_options(
			move |ctx| ctx.try_dep(&source),
			ComputedOptions::with_equality(Equality::structural()).name(&name),
		)
	}
}

impl<T: Value, S: Readable<T> + Clone + 'static> Pipe<T> for S {}
