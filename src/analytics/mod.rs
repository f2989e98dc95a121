//! Pure spend analytics: every function here is a plain transform of its
//! inputs, with no clocks, I/O or shared state, so the bucketing, forecast
//! and cost-allocation math is testable without any mocking.

pub mod buckets;
pub mod compare;
pub mod forecast;

use std::collections::BTreeMap;

use chrono::FixedOffset;

use crate::config::{AppConfig, Personalization};
use crate::models::{
    AggregationRow, BucketPreset, DashboardSnapshot, ForecastWarning, LiveMetrics, Provider,
    ProviderCostComparison, ProviderUsageTotal, UsageEvent,
};

/// Settings slice the engine needs, resolved once per refresh cycle.
#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub utc_offset: FixedOffset,
    pub currency: String,
    pub refresh_interval_minutes: u64,
    pub notification_threshold_percent: f64,
    pub subscription_monthly_usd: f64,
    pub provider_addons_usd: BTreeMap<Provider, f64>,
    pub model_price_overrides: BTreeMap<String, f64>,
}

impl AnalyticsSettings {
    pub fn from_config(cfg: &AppConfig, personalization: &Personalization) -> Self {
        let mut provider_addons_usd = BTreeMap::new();
        for (name, account) in &cfg.providers {
            if account.monthly_addon_usd <= 0.0 {
                continue;
            }
            if let Some(provider) = Provider::from_str(name) {
                provider_addons_usd.insert(provider, account.monthly_addon_usd);
            }
        }
        Self {
            utc_offset: personalization.utc_offset,
            currency: personalization.currency.clone(),
            refresh_interval_minutes: cfg.refresh_interval_minutes,
            notification_threshold_percent: cfg.notification_threshold_percent,
            subscription_monthly_usd: cfg.subscription.monthly_usd,
            provider_addons_usd,
            model_price_overrides: cfg.model_price_overrides.clone(),
        }
    }
}

pub struct AnalyticsInput<'a> {
    pub events: &'a [UsageEvent],
    pub provider_totals: &'a [ProviderUsageTotal],
    pub settings: &'a AnalyticsSettings,
    pub previous: Option<&'a DashboardSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyticsResult {
    pub aggregations: Vec<AggregationRow>,
    pub forecast_warnings: Vec<ForecastWarning>,
    pub live: LiveMetrics,
    pub cost_comparisons: Vec<ProviderCostComparison>,
}

const TIME_PRESETS: [BucketPreset; 4] = [
    BucketPreset::FiveHour,
    BucketPreset::Daily,
    BucketPreset::Weekly,
    BucketPreset::Monthly,
];

pub fn compute(input: &AnalyticsInput<'_>, now_ms: u64) -> AnalyticsResult {
    let settings = input.settings;

    let mut aggregations: Vec<AggregationRow> = Vec::new();
    for preset in TIME_PRESETS {
        aggregations.extend(buckets::rows_for_preset(
            input.events,
            settings.utc_offset,
            preset,
        ));
    }
    aggregations.extend(buckets::session_rows(input.events));
    // Provider totals ride along as rows with placeholder bounds so the
    // whole rollup stays one list.
    aggregations.extend(input.provider_totals.iter().map(|t| AggregationRow {
        preset: BucketPreset::ProviderTotals,
        start_unix_ms: 0,
        end_unix_ms: 0,
        request_count: t.request_count,
        spend_cents: t.spend_cents,
        provider: Some(t.provider),
    }));

    let previous_warning = input
        .previous
        .and_then(|snap| snap.forecast_warnings.first());
    let forecast_warnings = forecast::forecast_warning(
        input.events,
        settings.utc_offset,
        &settings.currency,
        settings.refresh_interval_minutes,
        settings.notification_threshold_percent,
        previous_warning,
        now_ms,
    )
    .into_iter()
    .collect();

    AnalyticsResult {
        aggregations,
        forecast_warnings,
        live: forecast::live_metrics(input.events, now_ms),
        cost_comparisons: compare::cost_comparisons(
            input.events,
            &settings.model_price_overrides,
            settings.subscription_monthly_usd,
            &settings.provider_addons_usd,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::unix_ms;

    fn mk_settings() -> AnalyticsSettings {
        AnalyticsSettings {
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            currency: "USD".to_string(),
            refresh_interval_minutes: 5,
            notification_threshold_percent: 80.0,
            subscription_monthly_usd: 20.0,
            provider_addons_usd: BTreeMap::new(),
            model_price_overrides: BTreeMap::new(),
        }
    }

    fn mk_total(provider: Provider, cents: f64) -> ProviderUsageTotal {
        ProviderUsageTotal {
            provider,
            spend_cents: cents,
            request_count: 3,
            currency: "USD".to_string(),
            last_synced_unix_ms: unix_ms(),
        }
    }

    #[test]
    fn zero_events_yield_only_provider_total_rows() {
        let settings = mk_settings();
        let totals = vec![mk_total(Provider::OpenAi, 120.0)];
        let input = AnalyticsInput {
            events: &[],
            provider_totals: &totals,
            settings: &settings,
            previous: None,
        };
        let result = compute(&input, 1_755_648_000_000);

        assert_eq!(result.aggregations.len(), 1);
        assert_eq!(result.aggregations[0].preset, BucketPreset::ProviderTotals);
        assert_eq!(result.aggregations[0].provider, Some(Provider::OpenAi));
        assert_eq!(result.aggregations[0].start_unix_ms, 0);
        assert!(result.forecast_warnings.is_empty());
        assert_eq!(result.live.burn_cents_per_hour, 0.0);
        assert!(result.cost_comparisons.is_empty());
    }

    #[test]
    fn events_produce_every_preset_and_one_warning() {
        let settings = mk_settings();
        let now = 1_755_648_000_000 + 12 * 3_600_000;
        let events = vec![
            UsageEvent {
                timestamp: (now - 10 * 60_000).to_string(),
                model: "claude-4-sonnet".to_string(),
                price_cents: Some(12),
                ..UsageEvent::default()
            },
            UsageEvent {
                timestamp: (now - 8 * 3_600_000).to_string(),
                model: "gpt-5".to_string(),
                price_cents: Some(8),
                ..UsageEvent::default()
            },
        ];
        let totals = vec![mk_total(Provider::Cursor, 20.0)];
        let input = AnalyticsInput {
            events: &events,
            provider_totals: &totals,
            settings: &settings,
            previous: None,
        };
        let result = compute(&input, now);

        let presets: Vec<BucketPreset> =
            result.aggregations.iter().map(|r| r.preset).collect();
        for expected in [
            BucketPreset::FiveHour,
            BucketPreset::Daily,
            BucketPreset::Weekly,
            BucketPreset::Monthly,
            BucketPreset::Session,
            BucketPreset::ProviderTotals,
        ] {
            assert!(presets.contains(&expected), "missing {expected:?}");
        }

        assert_eq!(result.forecast_warnings.len(), 1);
        // Both models attribute, so both providers appear.
        assert_eq!(result.cost_comparisons.len(), 2);
        // Only the 10-minute-old event is inside the live window.
        assert_eq!(result.live.request_count, 1);
        assert_eq!(result.live.burn_cents_per_hour, 12.0);
    }
}
