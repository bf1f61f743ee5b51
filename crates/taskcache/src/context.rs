//! Event sink and diagnostic channel handed to plugins.

use crate::error::TaskCacheError;
use crate::events::{EventEnvelope, EventRecord};
use tracing::warn;

/// Where plugins send their output.
///
/// `report` is one-way: it never fails and must not change how the plugin
/// proceeds.
pub trait ParserContext {
    /// Accept a record produced by `plugin`.
    fn produce_event(&mut self, plugin: &'static str, record: EventRecord);

    /// Accept a non-fatal diagnostic raised by `plugin`.
    fn report(&mut self, plugin: &'static str, diagnostic: TaskCacheError);
}

/// A diagnostic tagged with the plugin that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub plugin: &'static str,
    pub error: TaskCacheError,
}

/// Context that keeps everything in memory and logs diagnostics.
#[derive(Debug, Default)]
pub struct CollectingContext {
    pub events: Vec<EventEnvelope>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The records alone, in production order.
    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().map(|e| &e.record)
    }
}

impl ParserContext for CollectingContext {
    fn produce_event(&mut self, plugin: &'static str, record: EventRecord) {
        self.events.push(EventEnvelope { plugin, record });
    }

    fn report(&mut self, plugin: &'static str, diagnostic: TaskCacheError) {
        warn!("[{}] {}", plugin, diagnostic);
        self.diagnostics.push(Diagnostic {
            plugin,
            error: diagnostic,
        });
    }
}
