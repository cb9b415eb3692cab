#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]
//!
//! # Threading Notes
//!
//! All bookkeeping happens inside one process-wide reentrant critical
//! section. Callbacks may re-enter the runtime freely from the thread that
//! currently holds it; other threads block until it is released.

pub mod runtime;
pub mod trace;

#[doc = include_str!("../README.md")]
mod readme {}
