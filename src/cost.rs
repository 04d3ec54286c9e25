//! Token and image accounting across stages, reported in the final manifest.

use serde::Serialize;

/// Blended per-token price used for the manifest estimate, USD per million.
const USD_PER_MILLION_TOKENS: f64 = 15.0;

/// Flat per-image price used for the manifest estimate.
const USD_PER_IMAGE: f64 = 0.04;

/// Resource usage for one studio call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub tokens: u64,
    pub images: u64,
}

impl Usage {
    pub fn tokens(tokens: u64) -> Self {
        Self { tokens, images: 0 }
    }

    pub fn images(images: u64) -> Self {
        Self { tokens: 0, images }
    }

    /// Rough token estimate for generated text, four characters per token.
    pub fn for_text(text: &str) -> Self {
        Self {
            tokens: (text.len() / 4) as u64,
            images: 0,
        }
    }
}

/// Accumulated totals for the whole run, embedded in the manifest.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CostSummary {
    pub total_tokens: u64,
    pub total_images: u64,
    pub estimated_cost_usd: f64,
}

/// Per-stage usage ledger.
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    entries: Vec<(String, Usage)>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &str, usage: Usage) {
        self.entries.push((stage.to_string(), usage));
    }

    pub fn entries(&self) -> &[(String, Usage)] {
        &self.entries
    }

    pub fn summary(&self) -> CostSummary {
        let total_tokens: u64 = self.entries.iter().map(|(_, u)| u.tokens).sum();
        let total_images: u64 = self.entries.iter().map(|(_, u)| u.images).sum();
        let estimated_cost_usd = (total_tokens as f64 / 1_000_000.0) * USD_PER_MILLION_TOKENS
            + total_images as f64 * USD_PER_IMAGE;
        CostSummary {
            total_tokens,
            total_images,
            // Two decimal places is plenty for an estimate
            estimated_cost_usd: (estimated_cost_usd * 100.0).round() / 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_costs_nothing() {
        let tracker = CostTracker::new();
        let summary = tracker.summary();
        assert_eq!(summary.total_tokens, 0);
        assert_eq!(summary.total_images, 0);
        assert_eq!(summary.estimated_cost_usd, 0.0);
    }

    #[test]
    fn test_record_accumulates_across_stages() {
        let mut tracker = CostTracker::new();
        tracker.record("research", Usage::tokens(1_000_000));
        tracker.record("production", Usage { tokens: 500_000, images: 10 });

        let summary = tracker.summary();
        assert_eq!(summary.total_tokens, 1_500_000);
        assert_eq!(summary.total_images, 10);
        // 1.5M tokens at 15/M plus 10 images at 0.04
        assert_eq!(summary.estimated_cost_usd, 22.9);
    }

    #[test]
    fn test_text_estimate() {
        let usage = Usage::for_text("abcdefgh");
        assert_eq!(usage.tokens, 2);
        assert_eq!(usage.images, 0);
    }

    #[test]
    fn test_entries_keep_stage_names() {
        let mut tracker = CostTracker::new();
        tracker.record("research", Usage::tokens(10));
        tracker.record("design", Usage::tokens(20));
        assert_eq!(tracker.entries().len(), 2);
        assert_eq!(tracker.entries()[0].0, "research");
    }
}
