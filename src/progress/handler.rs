//! Progress handler trait and events

use crate::pipeline::directive::DirectiveKind;
use std::time::Duration;

/// Events emitted while a plan is built
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Build started
    Started { image: String, backend: String },

    /// Validation started
    ValidationStarted,

    /// Validation completed
    ValidationComplete { rules: usize },

    /// Directive started (`index` is 1-based)
    DirectiveStarted {
        index: usize,
        total: usize,
        directive: DirectiveKind,
        summary: String,
    },

    /// Directive satisfied from the layer cache
    DirectiveCached {
        index: usize,
        total: usize,
        directive: DirectiveKind,
        layer: String,
    },

    /// Directive executed
    DirectiveComplete {
        index: usize,
        total: usize,
        directive: DirectiveKind,
        duration: Duration,
    },

    /// Directive failed; no later directive runs
    DirectiveFailed {
        index: usize,
        total: usize,
        directive: DirectiveKind,
        error: String,
    },

    /// One line of command or builder output
    Output { directive: Option<DirectiveKind>, line: String },

    /// Image committed under its tag
    Completed {
        image: String,
        id: String,
        executed: usize,
        cached: usize,
        total_time: Duration,
    },

    /// Build failed; the tag was not touched
    Failed { image: String, error: String },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
