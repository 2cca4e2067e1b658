use crate::data_structures::TokenCounts;
use std::collections::HashMap;

/// Prices events whose log line carries no cost of its own.
pub trait CostOracle: Send + Sync {
    fn cost_for(&self, model: &str, tokens: &TokenCounts) -> Option<f64>;
}

/// Per-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    input_cost_per_token: f64,
    output_cost_per_token: f64,
    cache_creation_input_token_cost: f64,
    cache_read_input_token_cost: f64,
}

impl ModelPricing {
    /// Builds pricing from dollars per million tokens.
    pub fn per_million(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input_cost_per_token: input / 1_000_000.0,
            output_cost_per_token: output / 1_000_000.0,
            cache_creation_input_token_cost: cache_creation / 1_000_000.0,
            cache_read_input_token_cost: cache_read / 1_000_000.0,
        }
    }

    pub fn calculate_cost(&self, tokens: &TokenCounts) -> f64 {
        let cost = (tokens.input_tokens() as f64 * self.input_cost_per_token)
            + (tokens.output_tokens() as f64 * self.output_cost_per_token)
            + (tokens.cache_creation_tokens() as f64 * self.cache_creation_input_token_cost)
            + (tokens.cache_read_tokens() as f64 * self.cache_read_input_token_cost);

        (cost * 1_000_000.0).round() / 1_000_000.0
    }
}

pub struct PricingProvider {
    pricing_cache: HashMap<String, ModelPricing>,
}

impl PricingProvider {
    pub fn new() -> Self {
        let opus_legacy = ModelPricing::per_million(15.0, 75.0, 18.75, 1.5);
        let opus = ModelPricing::per_million(5.0, 25.0, 6.25, 0.5);
        let sonnet = ModelPricing::per_million(3.0, 15.0, 3.75, 0.3);
        let haiku_3 = ModelPricing::per_million(0.25, 1.25, 0.3, 0.03);
        let haiku_35 = ModelPricing::per_million(0.8, 4.0, 1.0, 0.08);
        let haiku_45 = ModelPricing::per_million(1.0, 5.0, 1.25, 0.1);

        let pricing_cache = [
            ("claude-3-opus-20240229", opus_legacy),
            ("claude-opus-4-20250514", opus_legacy),
            ("claude-opus-4-1-20250805", opus_legacy),
            ("claude-opus-4-5-20251101", opus),
            ("claude-3-sonnet-20240229", sonnet),
            ("claude-3-5-sonnet-20240620", sonnet),
            ("claude-3-5-sonnet-20241022", sonnet),
            ("claude-3-7-sonnet-20250219", sonnet),
            ("claude-sonnet-4-20250514", sonnet),
            ("claude-sonnet-4-5-20250929", sonnet),
            ("claude-3-haiku-20240307", haiku_3),
            ("claude-3-5-haiku-20241022", haiku_35),
            ("claude-haiku-4-5-20251001", haiku_45),
        ]
        .into_iter()
        .map(|(model, pricing)| (model.to_string(), pricing))
        .collect();

        Self { pricing_cache }
    }

    pub fn with_pricing(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.pricing_cache.insert(model.into(), pricing);
        self
    }

    /// Exact model id first, then the newest price for the model family.
    pub fn get_pricing(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.pricing_cache.get(model) {
            return Some(pricing);
        }

        let model = model.to_ascii_lowercase();
        let family = if model.contains("opus") {
            "claude-opus-4-5-20251101"
        } else if model.contains("sonnet") {
            "claude-sonnet-4-5-20250929"
        } else if model.contains("haiku") {
            "claude-haiku-4-5-20251001"
        } else {
            return None;
        };
        self.pricing_cache.get(family)
    }

    pub fn supported_models(&self) -> Vec<&String> {
        let mut models: Vec<_> = self.pricing_cache.keys().collect();
        models.sort();
        models
    }
}

impl CostOracle for PricingProvider {
    fn cost_for(&self, model: &str, tokens: &TokenCounts) -> Option<f64> {
        self.get_pricing(model).map(|p| p.calculate_cost(tokens))
    }
}

impl Default for PricingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_model_cost() {
        let provider = PricingProvider::new();
        let tokens = TokenCounts::new(1_000_000, 100_000, 0, 0);
        let cost = provider.cost_for("claude-sonnet-4-20250514", &tokens).unwrap();
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_family_fallback() {
        let provider = PricingProvider::new();
        let tokens = TokenCounts::new(1000, 0, 0, 0);
        assert!(provider.cost_for("claude-sonnet-9-20300101", &tokens).is_some());
        assert!(provider.cost_for("<synthetic>", &tokens).is_none());
    }

    #[test]
    fn test_cost_rounded_to_micro_dollars() {
        let pricing = ModelPricing::per_million(3.0, 15.0, 3.75, 0.3);
        let cost = pricing.calculate_cost(&TokenCounts::new(1, 1, 1, 1));
        assert_eq!(cost, 0.000022);
    }
}
