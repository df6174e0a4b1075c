pub mod directive;
pub mod orchestrator;
pub mod plan;

pub use directive::{Directive, DirectiveKind};
pub use orchestrator::BuildOrchestrator;
pub use plan::BuildPlan;
