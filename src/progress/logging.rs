//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { image, backend } => {
                info!(image = %image, backend = %backend, "Starting build");
            }
            ProgressEvent::ValidationStarted => {
                debug!("Validating build plan");
            }
            ProgressEvent::ValidationComplete { rules } => {
                debug!(rules, "Build plan valid");
            }
            ProgressEvent::DirectiveStarted {
                index,
                total,
                directive,
                summary,
            } => {
                info!(
                    step = %format!("{}/{}", index, total),
                    directive = %directive,
                    "{}",
                    summary
                );
            }
            ProgressEvent::DirectiveCached {
                index,
                total,
                directive,
                layer,
            } => {
                info!(
                    step = %format!("{}/{}", index, total),
                    directive = %directive,
                    layer = %layer,
                    "Using cached layer"
                );
            }
            ProgressEvent::DirectiveComplete {
                index,
                total,
                directive,
                duration,
            } => {
                debug!(
                    step = %format!("{}/{}", index, total),
                    directive = %directive,
                    duration_ms = duration.as_millis() as u64,
                    "Directive complete"
                );
            }
            ProgressEvent::DirectiveFailed {
                index,
                total,
                directive,
                error,
            } => {
                error!(
                    step = %format!("{}/{}", index, total),
                    directive = %directive,
                    error = %error,
                    "Directive failed"
                );
            }
            ProgressEvent::Output { directive, line } => match directive {
                Some(directive) => debug!(directive = %directive, "{}", line),
                None => debug!("{}", line),
            },
            ProgressEvent::Completed {
                image,
                id,
                executed,
                cached,
                total_time,
            } => {
                info!(
                    image = %image,
                    id = %id,
                    executed,
                    cached,
                    total_time_ms = total_time.as_millis() as u64,
                    "Build complete"
                );
            }
            ProgressEvent::Failed { image, error } => {
                error!(image = %image, error = %error, "Build failed");
            }
        }
    }
}
