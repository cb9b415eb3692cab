#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]

mod chains;
pub use chains::{Chain, ChainStatus, ChainTracker, Occurrence};

pub mod graph;

mod fanout;
pub use fanout::Fanout;

#[doc = include_str!("../README.md")]
mod readme {}
