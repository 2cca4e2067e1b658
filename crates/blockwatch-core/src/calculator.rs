use crate::data_structures::{BurnRate, SessionBlock, UsageProjection};
use chrono::{DateTime, Duration, Utc};

/// Burn rates never divide by less than one minute.
pub const MIN_BURN_DURATION_MINUTES: f64 = 1.0;

pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }

    /// Active blocks are measured from the block start to `now`, completed
    /// blocks from their first to their last entry.
    pub fn calculate_burn_rate(&self, block: &SessionBlock, now: DateTime<Utc>) -> Option<BurnRate> {
        if block.is_gap() || block.is_empty() {
            return None;
        }

        let elapsed = if block.is_active() {
            now - block.start_time()
        } else {
            block.actual_duration()
        };
        let minutes = (elapsed.num_milliseconds() as f64 / 60_000.0).max(MIN_BURN_DURATION_MINUTES);

        let tokens = block.token_counts();
        let tokens_per_minute = tokens.total() as f64 / minutes;
        let indicator = tokens.non_cache_total() as f64 / minutes;
        let cost_per_hour = block.cost_usd() / (minutes / 60.0);

        Some(BurnRate::new(tokens_per_minute, indicator, cost_per_hour))
    }

    pub fn project_block_usage(
        &self,
        block: &SessionBlock,
        now: DateTime<Utc>,
    ) -> Option<UsageProjection> {
        if !block.is_active() || now >= block.end_time() {
            return None;
        }

        let burn_rate = self.calculate_burn_rate(block, now)?;
        let current_tokens = block.token_counts().total();
        let current_cost = block.cost_usd();

        let remaining_minutes =
            ((block.end_time() - now).num_milliseconds() as f64 / 60_000.0).max(0.0);

        let projected_additional_tokens =
            (burn_rate.tokens_per_minute() * remaining_minutes).round() as u64;
        let projected_additional_cost = burn_rate.cost_per_hour() * remaining_minutes / 60.0;

        Some(UsageProjection::new(
            current_tokens,
            current_cost,
            remaining_minutes,
            projected_additional_tokens,
            projected_additional_cost,
        ))
    }

    pub fn calculate_total_cost(&self, blocks: &[SessionBlock]) -> f64 {
        blocks
            .iter()
            .filter(|b| !b.is_gap())
            .map(|block| block.cost_usd())
            .sum()
    }

    pub fn calculate_total_tokens(&self, blocks: &[SessionBlock]) -> u64 {
        blocks
            .iter()
            .filter(|b| !b.is_gap())
            .map(|block| block.token_counts().total())
            .sum()
    }

    /// Mean over completed blocks.
    pub fn calculate_average_burn_rate(
        &self,
        blocks: &[SessionBlock],
        now: DateTime<Utc>,
    ) -> Option<BurnRate> {
        let burn_rates: Vec<BurnRate> = blocks
            .iter()
            .filter(|b| !b.is_active())
            .filter_map(|block| self.calculate_burn_rate(block, now))
            .collect();

        if burn_rates.is_empty() {
            return None;
        }

        let n = burn_rates.len() as f64;
        let avg = |f: fn(&BurnRate) -> f64| burn_rates.iter().map(f).sum::<f64>() / n;

        Some(BurnRate::new(
            avg(BurnRate::tokens_per_minute),
            avg(BurnRate::tokens_per_minute_for_indicator),
            avg(BurnRate::cost_per_hour),
        ))
    }

    pub fn calculate_peak_burn_rate(
        &self,
        blocks: &[SessionBlock],
        now: DateTime<Utc>,
    ) -> Option<BurnRate> {
        blocks
            .iter()
            .filter(|b| !b.is_active())
            .filter_map(|block| self.calculate_burn_rate(block, now))
            .max_by(|a, b| a.tokens_per_minute().total_cmp(&b.tokens_per_minute()))
    }

    pub fn calculate_time_to_limit(
        &self,
        current_tokens: u64,
        token_limit: u64,
        tokens_per_minute: f64,
    ) -> Option<Duration> {
        if current_tokens >= token_limit || tokens_per_minute <= 0.0 {
            return None;
        }

        let remaining_tokens = token_limit - current_tokens;
        let minutes_to_limit = remaining_tokens as f64 / tokens_per_minute;

        let seconds = minutes_to_limit * 60.0;
        if !seconds.is_finite() {
            return None;
        }
        // out-of-range values saturate in the cast and are rejected here
        Duration::try_seconds(seconds as i64)
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}
