#![allow(dead_code)]

//! Hand-driving deferred evaluations: a single poll against the no-op
//! waker lets a test start a `settled` drive, leave it parked on its
//! timer, and supersede the evaluation before the future ever completes.

use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll, Waker},
};

/// Polls `future` exactly once. `Poll::Pending` means the drive started
/// and parked; the caller finishes it later under a real executor.
pub fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
	future.poll(&mut Context::from_waker(Waker::noop()))
}
