use std::collections::BTreeMap;

use crate::constants::FLAT_CALL_FEE_CENTS;
use crate::models::{Provider, ProviderCostComparison, UsageEvent};

/// Default pay-as-you-go price per request in cents, keyed by model-name
/// prefix. Longest matching prefix wins.
const DEFAULT_MODEL_PRICE_CENTS: &[(&str, f64)] = &[
    ("gpt-5", 8.0),
    ("gpt-4.1", 5.0),
    ("gpt-4o-mini", 1.0),
    ("gpt-4o", 4.0),
    ("o3", 30.0),
    ("o4-mini", 4.0),
    ("claude-4-opus", 30.0),
    ("claude-4-sonnet", 6.0),
    ("claude-3-5-haiku", 1.0),
    ("gemini-2.5-pro", 5.0),
    ("gemini-2.5-flash", 1.0),
];

/// Which external provider a model name bills against. Models without a
/// recognized brand (Cursor's own models included) are excluded from the
/// comparison.
pub fn provider_for_model(model: &str) -> Option<Provider> {
    let m = model.trim().to_ascii_lowercase();
    const OPENAI: &[&str] = &["gpt", "o1", "o3", "o4", "codex"];
    const ANTHROPIC: &[&str] = &["claude"];
    const GEMINI: &[&str] = &["gemini"];

    if OPENAI.iter().any(|p| m.starts_with(p)) {
        return Some(Provider::OpenAi);
    }
    if ANTHROPIC.iter().any(|p| m.starts_with(p)) {
        return Some(Provider::Anthropic);
    }
    if GEMINI.iter().any(|p| m.starts_with(p)) {
        return Some(Provider::GoogleGemini);
    }
    None
}

fn longest_prefix_price(model: &str, table: &[(&str, f64)]) -> Option<f64> {
    table
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, cents)| *cents)
}

fn override_price(model: &str, overrides: &BTreeMap<String, f64>) -> Option<f64> {
    overrides
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, cents)| *cents)
}

/// Estimated pay-as-you-go cost of one event in cents, by priority:
/// configured override, default price table, recorded token cost, displayed
/// cost, flat per-call fee for token-based calls, zero.
pub fn payg_event_cents(ev: &UsageEvent, overrides: &BTreeMap<String, f64>) -> f64 {
    let model = ev.model.trim().to_ascii_lowercase();
    if let Some(cents) = override_price(&model, overrides) {
        return cents;
    }
    if let Some(cents) = longest_prefix_price(&model, DEFAULT_MODEL_PRICE_CENTS) {
        return cents;
    }
    if let Some(cents) = ev.token_usage.as_ref().and_then(|t| t.total_cents) {
        if cents > 0.0 {
            return cents;
        }
    }
    if let Some(cents) = ev.price_cents {
        if cents > 0 {
            return cents as f64;
        }
    }
    if ev.is_token_based_call {
        return FLAT_CALL_FEE_CENTS;
    }
    0.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Subscription-vs-PAYG comparison per external provider.
///
/// The monthly subscription (plus per-provider add-ons) is pro-rated over
/// the days spanned by the observed events and allocated across providers
/// in proportion to their estimated pay-as-you-go spend. Providers with no
/// attributable spend are omitted.
pub fn cost_comparisons(
    events: &[UsageEvent],
    overrides: &BTreeMap<String, f64>,
    subscription_monthly_usd: f64,
    provider_addons_usd: &BTreeMap<Provider, f64>,
) -> Vec<ProviderCostComparison> {
    let mut payg: BTreeMap<Provider, f64> = BTreeMap::new();
    let mut span_min: Option<u64> = None;
    let mut span_max: Option<u64> = None;

    for ev in events {
        if let Some(ms) = ev.occurred_at_ms() {
            span_min = Some(span_min.map_or(ms, |m| m.min(ms)));
            span_max = Some(span_max.map_or(ms, |m| m.max(ms)));
        }
        let Some(provider) = provider_for_model(&ev.model) else {
            continue;
        };
        *payg.entry(provider).or_insert(0.0) += payg_event_cents(ev, overrides);
    }

    payg.retain(|_, cents| *cents > 0.0);
    let total_payg: f64 = payg.values().sum();
    if payg.is_empty() || total_payg <= 0.0 {
        return Vec::new();
    }

    let (Some(start), Some(end)) = (span_min, span_max) else {
        return Vec::new();
    };
    let span_secs = end.saturating_sub(start) as f64 / 1000.0;
    let month_fraction = (span_secs / 86_400.0).ceil().max(1.0) / 30.0;
    let base_pool_cents = subscription_monthly_usd * 100.0 * month_fraction;

    let mut rows: Vec<ProviderCostComparison> = payg
        .iter()
        .map(|(&provider, &payg_cents)| {
            let addon_cents = provider_addons_usd.get(&provider).copied().unwrap_or(0.0)
                * 100.0
                * month_fraction;
            let allocated = base_pool_cents * (payg_cents / total_payg) + addon_cents;
            ProviderCostComparison {
                provider,
                payg_cents: round2(payg_cents),
                allocated_subscription_cents: round2(allocated),
                difference_cents: round2(allocated - payg_cents),
                period_start_unix_ms: start,
                period_end_unix_ms: end,
            }
        })
        .collect();
    rows.sort_by_key(|r| r.provider.display_name());
    rows
}
