pub mod gate;
pub mod hydrator;
pub mod keywords;
pub mod normalizer;
pub mod orchestrator;
pub mod pruner;
pub mod retriever;
pub mod stats;

pub use gate::RelevanceGate;
pub use hydrator::Hydrator;
pub use keywords::KeywordQueryBuilder;
pub use normalizer::TextNormalizer;
pub use orchestrator::{PipelineDeps, PipelineOrchestrator, RunObserver, SearchOutcome};
pub use pruner::RelevancePruner;
pub use retriever::{BulkRetriever, RetrievalParams};
