use crate::error::BlockError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaudePlan {
    Pro,
    Max5,
    Max20,
    Custom(u64),
}

impl ClaudePlan {
    pub fn max_tokens(&self) -> u64 {
        match self {
            ClaudePlan::Pro => 44_000,
            ClaudePlan::Max5 => 220_000,
            ClaudePlan::Max20 => 880_000,
            ClaudePlan::Custom(limit) => *limit,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ClaudePlan::Pro => "Claude Pro".to_string(),
            ClaudePlan::Max5 => "Claude Max 5".to_string(),
            ClaudePlan::Max20 => "Claude Max 20".to_string(),
            ClaudePlan::Custom(limit) => format!("Custom ({} tokens)", limit),
        }
    }
}

impl FromStr for ClaudePlan {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Ok(ClaudePlan::Pro),
            "max5" => Ok(ClaudePlan::Max5),
            "max20" => Ok(ClaudePlan::Max20),
            other => other
                .parse::<u64>()
                .ok()
                .filter(|limit| *limit > 0)
                .map(ClaudePlan::Custom)
                .ok_or_else(|| {
                    BlockError::InvalidConfiguration(format!(
                        "unknown plan '{}', expected pro, max5, max20 or a token count",
                        s
                    ))
                }),
        }
    }
}

/// Which log family an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Primary,
    Secondary,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Primary => write!(f, "primary"),
            SourceTag::Secondary => write!(f, "secondary"),
        }
    }
}

/// One timestamped usage record read from a log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    source: SourceTag,
    timestamp: DateTime<Utc>,
    model: String,
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
    cost_usd: Option<f64>,
    identity: Option<String>,
}

impl UsageEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
        cost_usd: Option<f64>,
    ) -> Self {
        Self {
            source: SourceTag::Primary,
            timestamp,
            model,
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
            cost_usd,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source = source;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn source(&self) -> SourceTag {
        self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn cache_creation_tokens(&self) -> u64 {
        self.cache_creation_tokens
    }

    pub fn cache_read_tokens(&self) -> u64 {
        self.cache_read_tokens
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Unknown cost counts as zero.
    pub fn cost_usd(&self) -> f64 {
        self.cost_usd.unwrap_or(0.0)
    }

    pub fn has_cost(&self) -> bool {
        self.cost_usd.is_some()
    }

    pub fn token_counts(&self) -> TokenCounts {
        TokenCounts::new(
            self.input_tokens,
            self.output_tokens,
            self.cache_creation_tokens,
            self.cache_read_tokens,
        )
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn non_cache_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn new(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_tokens: u64,
        cache_read_tokens: u64,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
        }
    }

    pub fn add_event(&mut self, event: &UsageEvent) {
        self.input_tokens += event.input_tokens;
        self.output_tokens += event.output_tokens;
        self.cache_creation_tokens += event.cache_creation_tokens;
        self.cache_read_tokens += event.cache_read_tokens;
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn cache_creation_tokens(&self) -> u64 {
        self.cache_creation_tokens
    }

    pub fn cache_read_tokens(&self) -> u64 {
        self.cache_read_tokens
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn non_cache_total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A billing window. Real blocks cover `[start_time, start_time + window)`;
/// gap blocks cover the idle stretch between two real blocks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    actual_end_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    entries: Vec<UsageEvent>,
    entry_count: usize,
    token_counts: TokenCounts,
    cost_usd: f64,
    models: BTreeSet<String>,
    sources: BTreeSet<SourceTag>,
    is_active: bool,
    is_gap: bool,
}

impl SessionBlock {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: start_time.to_rfc3339(),
            start_time,
            end_time,
            actual_end_time: None,
            entries: Vec::new(),
            entry_count: 0,
            token_counts: TokenCounts::default(),
            cost_usd: 0.0,
            models: BTreeSet::new(),
            sources: BTreeSet::new(),
            is_active: false,
            is_gap: false,
        }
    }

    pub fn gap(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            id: format!("gap-{}", start_time.to_rfc3339()),
            is_gap: true,
            ..Self::new(start_time, end_time)
        }
    }

    /// Entries must arrive in timestamp order.
    pub fn add_event(&mut self, event: UsageEvent) {
        self.token_counts.add_event(&event);
        self.cost_usd += event.cost_usd();
        self.models.insert(event.model.clone());
        self.sources.insert(event.source);
        self.actual_end_time = Some(event.timestamp);
        self.entries.push(event);
        self.entry_count = self.entries.len();
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn actual_end_time(&self) -> Option<DateTime<Utc>> {
        self.actual_end_time
    }

    pub fn entries(&self) -> &[UsageEvent] {
        &self.entries
    }

    pub fn token_counts(&self) -> &TokenCounts {
        &self.token_counts
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    pub fn models(&self) -> &BTreeSet<String> {
        &self.models
    }

    pub fn sources(&self) -> &BTreeSet<SourceTag> {
        &self.sources
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_gap(&self) -> bool {
        self.is_gap
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time from the first to the last entry.
    pub fn actual_duration(&self) -> Duration {
        match (self.entries.first(), self.actual_end_time) {
            (Some(first), Some(last)) => last - first.timestamp,
            _ => Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BurnRateLevel {
    Normal,
    Moderate,
    High,
}

pub const MODERATE_BURN_RATE: f64 = 500.0;
pub const HIGH_BURN_RATE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    tokens_per_minute: f64,
    tokens_per_minute_for_indicator: f64,
    cost_per_hour: f64,
}

impl BurnRate {
    pub fn new(
        tokens_per_minute: f64,
        tokens_per_minute_for_indicator: f64,
        cost_per_hour: f64,
    ) -> Self {
        Self {
            tokens_per_minute,
            tokens_per_minute_for_indicator,
            cost_per_hour,
        }
    }

    pub fn tokens_per_minute(&self) -> f64 {
        self.tokens_per_minute
    }

    /// Input and output tokens only, used for the burn level indicator.
    pub fn tokens_per_minute_for_indicator(&self) -> f64 {
        self.tokens_per_minute_for_indicator
    }

    pub fn cost_per_hour(&self) -> f64 {
        self.cost_per_hour
    }

    pub fn level(&self) -> BurnRateLevel {
        if self.tokens_per_minute_for_indicator > HIGH_BURN_RATE {
            BurnRateLevel::High
        } else if self.tokens_per_minute_for_indicator > MODERATE_BURN_RATE {
            BurnRateLevel::Moderate
        } else {
            BurnRateLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageProjection {
    current_tokens: u64,
    current_cost: f64,
    remaining_minutes: f64,
    projected_additional_tokens: u64,
    projected_additional_cost: f64,
    projected_total_tokens: u64,
    projected_total_cost: f64,
}

impl UsageProjection {
    pub fn new(
        current_tokens: u64,
        current_cost: f64,
        remaining_minutes: f64,
        projected_additional_tokens: u64,
        projected_additional_cost: f64,
    ) -> Self {
        Self {
            current_tokens,
            current_cost,
            remaining_minutes,
            projected_additional_tokens,
            projected_additional_cost,
            projected_total_tokens: current_tokens + projected_additional_tokens,
            projected_total_cost: current_cost + projected_additional_cost,
        }
    }

    pub fn current_tokens(&self) -> u64 {
        self.current_tokens
    }

    pub fn current_cost(&self) -> f64 {
        self.current_cost
    }

    pub fn remaining_minutes(&self) -> f64 {
        self.remaining_minutes
    }

    pub fn projected_additional_tokens(&self) -> u64 {
        self.projected_additional_tokens
    }

    pub fn projected_additional_cost(&self) -> f64 {
        self.projected_additional_cost
    }

    pub fn projected_total_tokens(&self) -> u64 {
        self.projected_total_tokens
    }

    pub fn projected_total_cost(&self) -> f64 {
        self.projected_total_cost
    }
}
