use std::sync::Arc;

use meristem::trace::{TraceEvent, TraceSink};

/// Composes several sinks behind the runtime's single sink slot.
///
/// The runtime keeps exactly one installed sink; consumers that want more
/// wrap them here. Delivery order follows construction order, and each
/// sink already sits behind the emitter's panic boundary.
pub struct Fanout {
	sinks: Vec<Arc<dyn TraceSink>>,
}

impl Fanout {
	/// A fanout over `sinks`.
	#[must_use]
	pub fn new(sinks: Vec<Arc<dyn TraceSink>>) -> Self {
		Self { sinks }
	}
}

impl TraceSink for Fanout {
	fn event(&self, event: &TraceEvent) {
		for sink in &self.sinks {
			sink.event(event);
		}
	}
}
