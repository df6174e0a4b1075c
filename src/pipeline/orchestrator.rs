use super::plan::BuildPlan;
use crate::backend::{BuildBackend, BuildOutcome, BuildRequest};
use crate::error::BuildError;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::validation::Validator;
use std::time::Instant;
use tracing::{debug, info};

/// Validates a plan and hands it to a backend, reporting progress around it
pub struct BuildOrchestrator {
    validator: Validator,
}

impl BuildOrchestrator {
    pub fn new(validator: Validator) -> Self {
        Self { validator }
    }

    pub async fn execute(
        &self,
        plan: &BuildPlan,
        backend: &dyn BuildBackend,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        info!(
            image = %plan.image,
            backend = backend.name(),
            directives = plan.len(),
            "Starting build"
        );
        progress.on_progress(&ProgressEvent::Started {
            image: plan.image.clone(),
            backend: backend.name().to_string(),
        });

        progress.on_progress(&ProgressEvent::ValidationStarted);
        if let Err(e) = self.validator.validate(plan) {
            let err = BuildError::Validation(e.to_string());
            progress.on_progress(&ProgressEvent::Failed {
                image: plan.image.clone(),
                error: err.to_string(),
            });
            return Err(err);
        }
        progress.on_progress(&ProgressEvent::ValidationComplete {
            rules: self.validator.rule_count(),
        });
        debug!("Build plan valid");

        match backend.build(plan, request, progress).await {
            Ok(outcome) => {
                progress.on_progress(&ProgressEvent::Completed {
                    image: outcome.image.clone(),
                    id: outcome.config.id.clone(),
                    executed: outcome.executed(),
                    cached: outcome.cached(),
                    total_time: start.elapsed(),
                });
                Ok(outcome)
            }
            Err(e) => {
                progress.on_progress(&ProgressEvent::Failed {
                    image: plan.image.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

impl Default for BuildOrchestrator {
    fn default() -> Self {
        Self::new(Validator::default())
    }
}
