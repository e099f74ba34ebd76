//! Static model tables: prices, endpoints and the low-budget fallback set

/// Model used when the caller names none, and the forced downgrade target
pub const DEFAULT_MODEL: &str = "claude-3-haiku";

/// Models that are never downgraded
pub const CHEAP_MODELS: [&str; 3] = ["gpt-4o-mini", "claude-3-haiku", "gemini-pro"];

/// Below this remaining budget, expensive models are downgraded ($1.00)
pub const LOW_BUDGET_FLOOR_CENTS: i64 = 100;

/// Rough characters-per-token ratio used for input estimation
pub const CHARS_PER_TOKEN: u64 = 4;

/// Output tokens assumed when the caller sets no `max_tokens`
pub const DEFAULT_OUTPUT_TOKENS: u64 = 1000;

/// Price in cents per one million tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input: u64,
    pub output: u64,
}

const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input: 100,
    output: 300,
};

const MODEL_PRICING: &[(&str, ModelPricing)] = &[
    ("claude-3-opus", ModelPricing { input: 1500, output: 7500 }),
    ("claude-3-sonnet", ModelPricing { input: 300, output: 1500 }),
    ("claude-3-haiku", ModelPricing { input: 25, output: 125 }),
    ("claude-3.5-sonnet", ModelPricing { input: 300, output: 1500 }),
    ("gpt-4", ModelPricing { input: 3000, output: 6000 }),
    ("gpt-4-turbo", ModelPricing { input: 1000, output: 3000 }),
    ("gpt-4o", ModelPricing { input: 500, output: 1500 }),
    ("gpt-4o-mini", ModelPricing { input: 15, output: 60 }),
    ("gemini-pro", ModelPricing { input: 50, output: 150 }),
    ("gemini-1.5-pro", ModelPricing { input: 125, output: 375 }),
    ("mistral-large", ModelPricing { input: 400, output: 1200 }),
    ("mistral-medium", ModelPricing { input: 270, output: 810 }),
];

const ANTHROPIC_MESSAGES: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_CHAT: &str = "https://api.openai.com/v1/chat/completions";
const MISTRAL_CHAT: &str = "https://api.mistral.ai/v1/chat/completions";

const MODEL_ENDPOINTS: &[(&str, &str)] = &[
    ("claude-3-opus", ANTHROPIC_MESSAGES),
    ("claude-3-sonnet", ANTHROPIC_MESSAGES),
    ("claude-3-haiku", ANTHROPIC_MESSAGES),
    ("claude-3.5-sonnet", ANTHROPIC_MESSAGES),
    ("gpt-4", OPENAI_CHAT),
    ("gpt-4-turbo", OPENAI_CHAT),
    ("gpt-4o", OPENAI_CHAT),
    ("gpt-4o-mini", OPENAI_CHAT),
    (
        "gemini-pro",
        "https://generativelanguage.googleapis.com/v1/models/gemini-pro:generateContent",
    ),
    (
        "gemini-1.5-pro",
        "https://generativelanguage.googleapis.com/v1/models/gemini-1.5-pro:generateContent",
    ),
    ("mistral-large", MISTRAL_CHAT),
    ("mistral-medium", MISTRAL_CHAT),
];

/// Pricing row for a model, falling back to the default row
pub fn pricing_for(model: &str) -> ModelPricing {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Endpoint for a model; unknown models use the default model's endpoint
pub fn endpoint_for(model: &str) -> &'static str {
    MODEL_ENDPOINTS
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| MODEL_ENDPOINTS.iter().find(|(name, _)| *name == DEFAULT_MODEL))
        .map(|(_, endpoint)| *endpoint)
        .unwrap_or(ANTHROPIC_MESSAGES)
}

pub fn is_cheap_model(model: &str) -> bool {
    CHEAP_MODELS.contains(&model)
}

/// Pick the model to use: the requested one, unless the remaining budget is
/// under the floor and the request is not already a cheap model.
pub fn select_model(requested: Option<&str>, remaining_cents: i64) -> &str {
    let requested = requested.unwrap_or(DEFAULT_MODEL);
    if remaining_cents < LOW_BUDGET_FLOOR_CENTS && !is_cheap_model(requested) {
        return DEFAULT_MODEL;
    }
    requested
}

/// Estimate the token count of `text` at a fixed chars-per-token ratio
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Estimated cost in whole cents, rounded up.
///
/// Table prices are already cents per million tokens, so the product is
/// divided by one million and no dollars-to-cents factor applies.
pub fn estimate_cost_cents(model: &str, input_tokens: u64, output_tokens: u64) -> i64 {
    let pricing = pricing_for(model);
    let micro_cents = input_tokens
        .saturating_mul(pricing.input)
        .saturating_add(output_tokens.saturating_mul(pricing.output));
    i64::try_from(micro_cents.div_ceil(1_000_000)).unwrap_or(i64::MAX)
}
