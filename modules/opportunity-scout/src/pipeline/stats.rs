use std::time::Instant;

use opportunity_common::StageStats;

use crate::scheduling::CostMeter;

/// Measures one stage: wall clock plus the cost the meter gained while
/// it ran. Stages run one at a time, so the delta belongs to this stage.
pub struct StageTimer {
    stage: &'static str,
    items_in: usize,
    started: Instant,
    cost_before: f64,
}

impl StageTimer {
    pub fn start(stage: &'static str, items_in: usize, meter: &CostMeter) -> Self {
        Self {
            stage,
            items_in,
            started: Instant::now(),
            cost_before: meter.total(),
        }
    }

    pub fn finish(self, items_out: usize, api_calls: u64, meter: &CostMeter) -> StageStats {
        let stats = StageStats {
            stage: self.stage.to_string(),
            items_in: self.items_in,
            items_out,
            api_calls,
            cost_usd: (meter.total() - self.cost_before).max(0.0),
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            stage = self.stage,
            items_in = stats.items_in,
            items_out,
            api_calls,
            cost_usd = stats.cost_usd,
            duration_ms = stats.duration_ms,
            "Stage complete"
        );
        stats
    }
}

/// Tokens for text the provider did not meter. Four characters per token.
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_attributes_cost_delta() {
        let meter = CostMeter::new();
        meter.record("embedding", 1.0).unwrap();
        let timer = StageTimer::start("gate", 10, &meter);
        meter.record("classification-llm", 0.25).unwrap();
        let stats = timer.finish(7, 10, &meter);
        assert_eq!(stats.items_in, 10);
        assert_eq!(stats.items_out, 7);
        assert!((stats.cost_usd - 0.25).abs() < 1e-12);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(8), 2);
    }
}
