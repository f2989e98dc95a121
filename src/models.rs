use serde::{Deserialize, Serialize};

/// One billed action as the dashboard reports it.
///
/// `timestamp` is a millisecond epoch kept as the wire's decimal string; see
/// [`UsageEvent::occurred_at_ms`]. Two events are the same event iff every
/// field matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageEvent {
    pub timestamp: String,
    pub model: String,
    pub kind: String,
    pub requests_costs: f64,
    pub usage_based_costs: Option<String>,
    pub price_cents: Option<i64>,
    pub is_token_based_call: bool,
    pub token_usage: Option<TokenUsage>,
}

impl UsageEvent {
    /// Parsed occurrence time. `None` when the wire sent something that is
    /// not a non-negative integer; such events sort as oldest and never
    /// enter time-keyed aggregations.
    pub fn occurred_at_ms(&self) -> Option<u64> {
        self.timestamp.trim().parse::<u64>().ok()
    }

    /// Canonical cost in cents: the integer cents value when present,
    /// otherwise the token-derived total, otherwise zero.
    pub fn spend_cents(&self) -> f64 {
        if let Some(cents) = self.price_cents {
            return cents as f64;
        }
        self.token_usage
            .as_ref()
            .and_then(|t| t.total_cents)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cents: Option<f64>,
}

/// The persisted cache file: `{"watermark": ..., "events": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheState {
    pub watermark: Option<String>,
    pub events: Vec<UsageEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageSummary {
    pub billing_cycle_start: Option<String>,
    pub billing_cycle_end: Option<String>,
    pub membership_type: Option<String>,
    pub limit_type: Option<String>,
    pub team_id: Option<i64>,
    pub individual_usage: Option<IndividualUsage>,
}

impl UsageSummary {
    /// Plan requests used; absent sections read as zero.
    pub fn plan_used(&self) -> u64 {
        self.individual_usage
            .as_ref()
            .and_then(|u| u.plan.as_ref())
            .and_then(|p| p.used)
            .unwrap_or(0)
    }

    /// On-demand spend used; absent sections read as zero.
    pub fn on_demand_used(&self) -> f64 {
        self.individual_usage
            .as_ref()
            .and_then(|u| u.on_demand.as_ref())
            .and_then(|o| o.used)
            .unwrap_or(0.0)
    }

    pub fn is_team_plan(&self) -> bool {
        self.membership_type
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("team"))
            .unwrap_or(false)
    }

    pub fn is_enterprise(&self) -> bool {
        self.membership_type
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("enterprise"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndividualUsage {
    pub plan: Option<PlanUsage>,
    pub on_demand: Option<OnDemandUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanUsage {
    pub used: Option<u64>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub total_percent_used: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnDemandUsage {
    pub enabled: Option<bool>,
    pub used: Option<f64>,
    pub limit: Option<f64>,
}

/// Per-user editor analytics rows. Decoded and carried in the snapshot for
/// the UI; the core never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAnalytics {
    pub daily_metrics: Vec<DailyAnalyticsRow>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyAnalyticsRow {
    pub date: Option<String>,
    pub lines_added: Option<u64>,
    pub lines_deleted: Option<u64>,
    pub accepted_lines_added: Option<u64>,
    pub total_tabs_accepted: Option<u64>,
    pub composer_requests: Option<u64>,
    pub chat_requests: Option<u64>,
    pub agent_requests: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "cursor")]
    Cursor,
    #[serde(rename = "openAI")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "googleGemini")]
    GoogleGemini,
}

impl Provider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cursor" => Some(Self::Cursor),
            "openai" | "open_ai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "googlegemini" | "google_gemini" | "gemini" => Some(Self::GoogleGemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::OpenAi => "openAI",
            Self::Anthropic => "anthropic",
            Self::GoogleGemini => "googleGemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cursor => "Cursor",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::GoogleGemini => "Google Gemini",
        }
    }

    /// The external billing providers, i.e. everything except the
    /// subscription itself.
    pub fn external() -> [Provider; 3] {
        [Self::OpenAi, Self::Anthropic, Self::GoogleGemini]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsageTotal {
    pub provider: Provider,
    pub spend_cents: f64,
    pub request_count: u64,
    pub currency: String,
    pub last_synced_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketPreset {
    #[serde(rename = "5h")]
    FiveHour,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "session")]
    Session,
    #[serde(rename = "providerTotals")]
    ProviderTotals,
}

impl BucketPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiveHour => "5h",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Session => "session",
            Self::ProviderTotals => "providerTotals",
        }
    }
}

/// One bucket in a time-windowed rollup. `provider` is set only for
/// `providerTotals` rows, whose interval bounds are placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRow {
    pub preset: BucketPreset,
    pub start_unix_ms: u64,
    pub end_unix_ms: u64,
    pub request_count: u64,
    pub spend_cents: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastWarning {
    pub preset: BucketPreset,
    pub computed_at_unix_ms: u64,
    pub message: String,
    pub severity: Severity,
    pub projected_monthly_cents: f64,
    pub threshold_cents: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCostComparison {
    pub provider: Provider,
    pub payg_cents: f64,
    pub allocated_subscription_cents: f64,
    /// `allocated - payg`; positive when the subscription covers this
    /// usage for less than direct API billing would.
    pub difference_cents: f64,
    pub period_start_unix_ms: u64,
    pub period_end_unix_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMetrics {
    pub burn_cents_per_hour: f64,
    pub sparkline_usd: Vec<f64>,
    pub window_start_unix_ms: u64,
    pub window_end_unix_ms: u64,
    pub request_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
}

/// The merged result of one refresh cycle: what the UI observes and what
/// the store persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSnapshot {
    pub generated_at_unix_ms: u64,
    pub summary: Option<UsageSummary>,
    pub team_free_usage_cents: Option<i64>,
    pub events: Vec<UsageEvent>,
    pub user_analytics: Option<UserAnalytics>,
    pub provider_totals: Vec<ProviderUsageTotal>,
    pub aggregations: Vec<AggregationRow>,
    pub forecast_warnings: Vec<ForecastWarning>,
    pub live: LiveMetrics,
    pub cost_comparisons: Vec<ProviderCostComparison>,
    pub requests_today: u64,
    pub requests_yesterday: u64,
    /// Empty after a clean cycle; the last degraded slice's description
    /// otherwise. Refresh failures stay out of the user's way by default.
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_event(ts: &str, model: &str, cents: i64) -> UsageEvent {
        UsageEvent {
            timestamp: ts.to_string(),
            model: model.to_string(),
            kind: "usage".to_string(),
            requests_costs: 1.0,
            usage_based_costs: Some(format!("${:.2}", cents as f64 / 100.0)),
            price_cents: Some(cents),
            is_token_based_call: false,
            token_usage: None,
        }
    }

    #[test]
    fn cache_state_round_trips_through_its_json_shape() {
        let state = CacheState {
            watermark: Some("1755700000000".to_string()),
            events: vec![
                mk_event("1755700000000", "claude-4-sonnet", 12),
                mk_event("1755600000000", "gpt-5", 4),
            ],
        };
        let txt = serde_json::to_string(&state).unwrap();
        assert!(txt.starts_with(r#"{"watermark":"#));
        let back: CacheState = serde_json::from_str(&txt).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn event_decodes_from_wire_shape() {
        let ev: UsageEvent = serde_json::from_str(
            r#"{
              "timestamp": "1755700000000",
              "model": "claude-4-sonnet",
              "kind": "Included in Pro",
              "requestsCosts": 1.0,
              "usageBasedCosts": "-",
              "isTokenBasedCall": true,
              "tokenUsage": {
                "inputTokens": 1200,
                "outputTokens": 300,
                "cacheReadTokens": 9000,
                "cacheWriteTokens": 0,
                "totalCents": 3.5
              }
            }"#,
        )
        .unwrap();
        assert_eq!(ev.occurred_at_ms(), Some(1_755_700_000_000));
        assert_eq!(ev.spend_cents(), 3.5);
        assert_eq!(ev.token_usage.as_ref().unwrap().cache_read_tokens, 9000);
    }

    #[test]
    fn event_spend_prefers_canonical_cents() {
        let mut ev = mk_event("1", "m", 25);
        ev.token_usage = Some(TokenUsage {
            total_cents: Some(99.0),
            ..TokenUsage::default()
        });
        assert_eq!(ev.spend_cents(), 25.0);
        ev.price_cents = None;
        assert_eq!(ev.spend_cents(), 99.0);
    }

    #[test]
    fn malformed_timestamp_parses_as_none() {
        let ev = mk_event("not-a-number", "m", 1);
        assert_eq!(ev.occurred_at_ms(), None);
        assert_eq!(mk_event("-5", "m", 1).occurred_at_ms(), None);
    }

    #[test]
    fn summary_accessors_default_to_zero() {
        let s = UsageSummary::default();
        assert_eq!(s.plan_used(), 0);
        assert_eq!(s.on_demand_used(), 0.0);
        assert!(!s.is_team_plan());

        let s: UsageSummary = serde_json::from_str(
            r#"{"membershipType":"team","individualUsage":{"plan":{"used":41},"onDemand":{"used":2.5}}}"#,
        )
        .unwrap();
        assert_eq!(s.plan_used(), 41);
        assert_eq!(s.on_demand_used(), 2.5);
        assert!(s.is_team_plan());
        assert!(!s.is_enterprise());
    }

    #[test]
    fn provider_serde_uses_wire_spelling() {
        let txt = serde_json::to_string(&Provider::OpenAi).unwrap();
        assert_eq!(txt, r#""openAI""#);
        assert_eq!(Provider::from_str("openAI"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_str("nope"), None);
    }

    #[test]
    fn severity_orders_info_warning_critical() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
