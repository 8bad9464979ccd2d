use thiserror::Error;

/// Failure taxonomy for a search run.
///
/// Only `Validation` ends a run. The other variants are recorded as
/// degradations or warnings while the run carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient dependency error: {0}")]
    TransientDependency(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Ambiguous classification: {0}")]
    ClassificationAmbiguous(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientDependency(_))
    }

    /// Classify an arbitrary error bubbled up through an `anyhow` seam.
    pub fn classify(err: &anyhow::Error) -> PipelineError {
        match err.downcast_ref::<PipelineError>() {
            Some(e) => e.clone(),
            None => PipelineError::DependencyUnavailable(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_keeps_typed_errors() {
        let err = anyhow::Error::new(PipelineError::TransientDependency("429".into()));
        assert!(PipelineError::classify(&err).is_transient());
    }

    #[test]
    fn classify_defaults_to_unavailable() {
        let err = anyhow::anyhow!("connection refused");
        assert!(matches!(
            PipelineError::classify(&err),
            PipelineError::DependencyUnavailable(_)
        ));
    }
}
