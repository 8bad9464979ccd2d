use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use opportunity_common::PipelineError;

pub const KEYWORD_LLM: &str = "keyword-llm";
pub const EMBEDDING: &str = "embedding";
pub const CLASSIFICATION_LLM: &str = "classification-llm";
pub const EXTERNAL_SEARCH: &str = "external-search";
pub const HYDRATION: &str = "hydration";

/// Append-only ledger of estimated USD spend per category.
///
/// One meter per run. Safe to share across concurrent workers.
#[derive(Default)]
pub struct CostMeter {
    ledger: Mutex<BTreeMap<String, f64>>,
}

impl CostMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount_usd` to `category`. Negative or non-finite amounts are
    /// rejected and leave the ledger untouched.
    pub fn record(&self, category: &str, amount_usd: f64) -> Result<(), PipelineError> {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            warn!(category, amount_usd, "Rejected invalid cost amount");
            return Err(PipelineError::InvalidArgument(format!(
                "cost for {category} must be a non-negative number, got {amount_usd}"
            )));
        }
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        *ledger.entry(category.to_string()).or_insert(0.0) += amount_usd;
        debug!(category, amount_usd, "Cost recorded");
        Ok(())
    }

    /// Sum of every category.
    pub fn total(&self) -> f64 {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.values().sum()
    }

    pub fn category(&self, category: &str) -> f64 {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.get(category).copied().unwrap_or(0.0)
    }

    pub fn breakdown(&self) -> BTreeMap<String, f64> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn negative_amount_is_rejected_and_not_recorded() {
        let meter = CostMeter::new();
        meter.record(EMBEDDING, 0.5).unwrap();
        let err = meter.record(EMBEDDING, -5.0).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
        assert_eq!(meter.total(), 0.5);
    }

    #[test]
    fn nan_is_rejected() {
        let meter = CostMeter::new();
        assert!(meter.record(KEYWORD_LLM, f64::NAN).is_err());
        assert!(meter.breakdown().is_empty());
    }

    #[test]
    fn total_equals_sum_of_categories() {
        let meter = CostMeter::new();
        meter.record(KEYWORD_LLM, 0.001).unwrap();
        meter.record(EMBEDDING, 0.002).unwrap();
        meter.record(CLASSIFICATION_LLM, 0.003).unwrap();
        meter.record(EMBEDDING, 0.004).unwrap();
        let sum: f64 = meter.breakdown().values().sum();
        assert!((meter.total() - sum).abs() < 1e-12);
        assert!((meter.category(EMBEDDING) - 0.006).abs() < 1e-12);
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost() {
        let meter = Arc::new(CostMeter::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let meter = meter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    meter.record(CLASSIFICATION_LLM, 0.25).unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(meter.total(), 400.0);
    }

    #[test]
    fn total_never_decreases() {
        let meter = CostMeter::new();
        let mut last = 0.0;
        for amount in [0.1, -1.0, 0.0, 0.3, f64::INFINITY, 0.2] {
            let _ = meter.record(EXTERNAL_SEARCH, amount);
            let now = meter.total();
            assert!(now >= last);
            last = now;
        }
    }
}
