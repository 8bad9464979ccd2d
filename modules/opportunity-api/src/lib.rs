pub mod registry;
pub mod routes;

use std::sync::Arc;

use opportunity_scout::PipelineOrchestrator;

pub use registry::RunRegistry;
pub use routes::build_router;

pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub registry: Arc<RunRegistry>,
}
