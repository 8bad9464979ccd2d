use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Counters for one stage of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStats {
    pub stage: String,
    pub items_in: usize,
    pub items_out: usize,
    pub api_calls: u64,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// A stage that fell back to its degraded path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: String,
    pub reason: String,
}

/// Aggregate statistics for a run. Built up append-only by the
/// orchestrator and frozen when the run finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub raw_fetched: usize,
    pub after_embed: usize,
    pub after_gate: usize,
    pub api_calls: u64,
    #[serde(rename = "tokenCostUSD")]
    pub token_cost_usd: f64,
    pub elapsed_sec: f64,

    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub stages: Vec<StageStats>,
    #[serde(default)]
    pub cost_breakdown: BTreeMap<String, f64>,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub hydration_failures: usize,
}

impl RunStats {
    pub fn record_stage(&mut self, stage: StageStats) {
        self.api_calls += stage.api_calls;
        self.stages.push(stage);
    }

    pub fn degrade(&mut self, stage: impl Into<String>, reason: impl Into<String>) {
        self.degradations.push(Degradation {
            stage: stage.into(),
            reason: reason.into(),
        });
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Search Run Complete ===")?;
        writeln!(f, "Keywords:           {}", self.keywords.len())?;
        writeln!(f, "Raw fetched:        {}", self.raw_fetched)?;
        writeln!(f, "After embedding:    {}", self.after_embed)?;
        writeln!(f, "After gate:         {}", self.after_gate)?;
        writeln!(f, "API calls:          {}", self.api_calls)?;
        writeln!(f, "Cost (USD):         {:.4}", self.token_cost_usd)?;
        writeln!(f, "Elapsed (s):        {:.1}", self.elapsed_sec)?;
        writeln!(f, "Hydration failures: {}", self.hydration_failures)?;
        if !self.stages.is_empty() {
            writeln!(f, "\nStages:")?;
            for s in &self.stages {
                writeln!(
                    f,
                    "  {:<10} {:>5} -> {:<5} calls={:<4} ${:.4} {}ms",
                    s.stage, s.items_in, s.items_out, s.api_calls, s.cost_usd, s.duration_ms
                )?;
            }
        }
        if !self.degradations.is_empty() {
            writeln!(f, "\nDegradations:")?;
            for d in &self.degradations {
                writeln!(f, "  {}: {}", d.stage, d.reason)?;
            }
        }
        for w in &self.warnings {
            writeln!(f, "Warning: {}", w)?;
        }
        Ok(())
    }
}
