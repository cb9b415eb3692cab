#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]

pub use meristem::{
	runtime::{batch, tick, Deferral, Propagation, Symbol},
	trace,
};

mod listeners;
mod traits;
pub use traits::{Cell, Readable, Unlisten, Value, Writable};

pub mod context;
pub use context::{AbortSignal, EvalContext};

pub mod equality;
pub use equality::Equality;

mod error;
pub use error::SignalError;

pub mod loadable;
pub use loadable::{LoadStatus, Loadable, Settlement};

mod signal;
pub use signal::Signal;

mod computed;
pub use computed::{Computed, ComputedOptions};

mod deferred;
pub use deferred::Deferred;

pub mod pipe;
pub use pipe::Pipe;

pub mod path;
pub use path::Path;

mod focus;
pub use focus::Focus;

mod tag;
pub use tag::Tag;

mod scope;
pub use scope::Scope;

pub mod wait;

/// Shadows the named bindings with clones of themselves, so that a closure
/// can take them `move` without consuming the originals.
///
/// ```
/// use tendril::{shadow_clone, Computed, Readable, Signal, Writable};
///
/// let count = Signal::new(1);
/// let doubled = Computed::new({
/// 	shadow_clone!(count);
/// 	move |ctx| ctx.dep(&count) * 2
/// });
/// assert_eq!(doubled.get(), 2);
/// count.set(3);
/// assert_eq!(doubled.get(), 6);
/// ```
#[macro_export]
macro_rules! shadow_clone {
	($($name:ident),+$(,)?) => {
		$(let $name = ::core::clone::Clone::clone(&$name);)+
	};
}

#[doc = include_str!("../README.md")]
mod readme {}
