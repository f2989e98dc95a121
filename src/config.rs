use std::collections::BTreeMap;
use std::path::Path;

use chrono::{FixedOffset, Offset};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_RETENTION_DAYS, DEFAULT_SUBSCRIPTION_USD_MONTHLY, REFRESH_INTERVAL_MINUTES,
};
use crate::models::{Credentials, Provider};
use crate::store::Store;

/// Bumped whenever an on-disk config needs a one-time rewrite.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// When true, timezone and currency come from the environment and the
    /// explicit fields below are ignored.
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            auto_detect: true,
            utc_offset_minutes: None,
            currency: default_currency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Monthly base plan price, used to apportion subscription cost across
    /// providers in the cost comparison.
    #[serde(default = "default_subscription_usd")]
    pub monthly_usd: f64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            monthly_usd: default_subscription_usd(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAccountConfig {
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional base URL override for the provider's usage API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_base_url: Option<String>,
    /// Extra monthly spend committed to this provider (seat add-ons and the
    /// like), counted into its subscription allocation.
    #[serde(default)]
    pub monthly_addon_usd: f64,
    /// Only read for one-time migration into the local store. New config
    /// writes omit it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Percentage of plan spend per refresh interval above which a burn
    /// warning fires. Doubling it makes the warning critical.
    #[serde(default = "default_threshold_percent")]
    pub notification_threshold_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_base_url: Option<String>,
    /// Manual team override for the team-free-usage endpoint; normally the
    /// id from the usage summary wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
    /// Only read for one-time migration into the local store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Only read for one-time migration into the local store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderAccountConfig>,
    /// Per-model price overrides in cents per request, keyed by model name
    /// prefix. Checked before the built-in price table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_price_overrides: BTreeMap<String, f64>,
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_subscription_usd() -> f64 {
    DEFAULT_SUBSCRIPTION_USD_MONTHLY
}

fn default_schema_version() -> u32 {
    1
}

fn default_refresh_interval() -> u64 {
    REFRESH_INTERVAL_MINUTES
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_threshold_percent() -> f64 {
    80.0
}

impl AppConfig {
    pub fn default_config() -> Self {
        let mut providers = BTreeMap::new();
        for provider in Provider::external() {
            providers.insert(
                provider.as_str().to_string(),
                ProviderAccountConfig {
                    display_name: provider.display_name().to_string(),
                    enabled: true,
                    usage_base_url: None,
                    monthly_addon_usd: 0.0,
                    api_key: String::new(),
                },
            );
        }

        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            refresh_interval_minutes: REFRESH_INTERVAL_MINUTES,
            retention_days: DEFAULT_RETENTION_DAYS,
            notification_threshold_percent: 80.0,
            dashboard_base_url: None,
            team_id: None,
            user_id: String::new(),
            access_token: String::new(),
            locale: LocaleConfig::default(),
            subscription: SubscriptionConfig::default(),
            providers,
            model_price_overrides: BTreeMap::new(),
        }
    }

    pub fn provider(&self, provider: Provider) -> Option<&ProviderAccountConfig> {
        self.providers.get(provider.as_str())
    }
}

pub fn load_or_init_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        let txt = std::fs::read_to_string(path)?;
        let cfg: AppConfig = toml::from_str(&txt)?;
        return Ok(cfg);
    }
    let cfg = AppConfig::default_config();
    persist_config(path, &cfg)?;
    Ok(cfg)
}

pub fn persist_config(path: &Path, cfg: &AppConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// One-time migrations. Returns true when the config changed and should be
/// rewritten by the caller.
///
/// v1 configs carried the session token and provider API keys inline; v2
/// moves them into the local store so the config file stays shareable.
pub fn migrate_config(cfg: &mut AppConfig, store: &Store) -> bool {
    if cfg.schema_version >= CURRENT_SCHEMA_VERSION {
        return false;
    }

    if !cfg.user_id.is_empty() && !cfg.access_token.is_empty() {
        let moved = store
            .put_credentials(&Credentials {
                user_id: std::mem::take(&mut cfg.user_id),
                access_token: std::mem::take(&mut cfg.access_token),
            })
            .is_ok();
        if !moved {
            log::warn!("could not migrate session credentials into the store");
        }
    } else {
        cfg.user_id.clear();
        cfg.access_token.clear();
    }

    for (name, provider) in cfg.providers.iter_mut() {
        if provider.api_key.is_empty() {
            continue;
        }
        let key = std::mem::take(&mut provider.api_key);
        if store.set_provider_key(name, &key).is_err() {
            log::warn!("could not migrate api key for {name} into the store");
        }
    }

    cfg.schema_version = CURRENT_SCHEMA_VERSION;
    true
}

/// Timezone and currency resolved from config and environment.
#[derive(Debug, Clone)]
pub struct Personalization {
    pub utc_offset: FixedOffset,
    pub currency: String,
}

pub fn resolve_personalization(cfg: &AppConfig) -> Personalization {
    if cfg.locale.auto_detect {
        let utc_offset = chrono::Local::now().offset().fix();
        let currency = detect_region()
            .and_then(|r| currency_for_region(&r))
            .map(str::to_string)
            .unwrap_or_else(|| cfg.locale.currency.clone());
        return Personalization {
            utc_offset,
            currency,
        };
    }

    let utc_offset = cfg
        .locale
        .utc_offset_minutes
        .and_then(|m| FixedOffset::east_opt(m * 60))
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap_or(chrono::Utc.fix()));
    Personalization {
        utc_offset,
        currency: cfg.locale.currency.clone(),
    }
}

/// Region code out of `LC_ALL`/`LANG`, e.g. `en_US.UTF-8` -> `US`.
fn detect_region() -> Option<String> {
    let raw = std::env::var("LC_ALL")
        .or_else(|_| std::env::var("LANG"))
        .ok()?;
    let locale = raw.split('.').next()?;
    let region = locale.split('_').nth(1)?;
    (!region.is_empty()).then(|| region.to_ascii_uppercase())
}

fn currency_for_region(region: &str) -> Option<&'static str> {
    let currency = match region {
        "US" => "USD",
        "GB" => "GBP",
        "JP" => "JPY",
        "CN" => "CNY",
        "KR" => "KRW",
        "IN" => "INR",
        "CA" => "CAD",
        "AU" => "AUD",
        "CH" => "CHF",
        "SE" => "SEK",
        "NO" => "NOK",
        "DK" => "DKK",
        "BR" => "BRL",
        "AT" | "BE" | "DE" | "ES" | "FI" | "FR" | "IE" | "IT" | "NL" | "PT" => "EUR",
        _ => return None,
    };
    Some(currency)
}
