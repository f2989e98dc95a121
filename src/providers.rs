use std::time::Duration;

use chrono::{SecondsFormat, TimeZone, Utc};
use futures_util::future::join_all;
use serde_json::Value;

use crate::config::AppConfig;
use crate::constants::{
    ANTHROPIC_API_BASE_URL, DASHBOARD_USER_AGENT, GEMINI_API_BASE_URL, HTTP_TIMEOUT_SECS,
    OPENAI_API_BASE_URL,
};
use crate::error::FetchError;
use crate::gateway::as_f64;
use crate::models::{Provider, ProviderUsageTotal};
use crate::store::{unix_ms, Store};

fn default_base(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => OPENAI_API_BASE_URL,
        Provider::Anthropic => ANTHROPIC_API_BASE_URL,
        Provider::GoogleGemini => GEMINI_API_BASE_URL,
        Provider::Cursor => "",
    }
}

/// Fetch spend totals for every enabled external provider that has an API
/// key in the store. Providers fail independently; a failed fetch is logged
/// and journaled, never propagated.
pub async fn fetch_provider_totals(
    cfg: &AppConfig,
    store: &Store,
    window_start_ms: u64,
    window_end_ms: u64,
) -> Vec<ProviderUsageTotal> {
    let client = match reqwest::Client::builder()
        .user_agent(DASHBOARD_USER_AGENT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            log::warn!("could not build the provider http client: {e}");
            return Vec::new();
        }
    };

    let mut tasks = Vec::new();
    for provider in Provider::external() {
        let enabled = cfg.provider(provider).map(|p| p.enabled).unwrap_or(false);
        if !enabled {
            continue;
        }
        let Some(key) = store.get_provider_key(provider.as_str()) else {
            continue;
        };
        let base = cfg
            .provider(provider)
            .and_then(|p| p.usage_base_url.clone())
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| default_base(provider).to_string());

        let client = client.clone();
        tasks.push(async move {
            let result = match provider {
                Provider::OpenAi => {
                    fetch_openai_cents(&client, &base, &key, window_start_ms, window_end_ms).await
                }
                Provider::Anthropic => {
                    fetch_anthropic_cents(&client, &base, &key, window_start_ms).await
                }
                Provider::GoogleGemini => fetch_gemini_cents(&client, &base, &key).await,
                // Cursor spend comes from the event cache, never from here.
                Provider::Cursor => Ok(0.0),
            };
            (provider, result)
        });
    }

    let mut totals = Vec::new();
    for (provider, result) in join_all(tasks).await {
        match result {
            Ok(spend_cents) => {
                totals.push(ProviderUsageTotal {
                    provider,
                    spend_cents,
                    request_count: 0,
                    currency: "USD".to_string(),
                    last_synced_unix_ms: unix_ms(),
                });
            }
            Err(e) => {
                log::warn!("{} usage fetch failed: {e}", provider.display_name());
                store.add_event(
                    provider.as_str(),
                    "error",
                    "provider.fetch_failed",
                    &e.to_string(),
                    Value::Null,
                );
            }
        }
    }
    totals.sort_by_key(|t| t.provider.display_name());
    totals
}

fn day_string(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Billing usage endpoint; `total_usage` is already in cents.
async fn fetch_openai_cents(
    client: &reqwest::Client,
    base: &str,
    key: &str,
    start_ms: u64,
    end_ms: u64,
) -> Result<f64, FetchError> {
    let url = format!(
        "{base}/dashboard/billing/usage?start_date={}&end_date={}",
        day_string(start_ms),
        day_string(end_ms)
    );
    let resp = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .send()
        .await
        .map_err(FetchError::from_reqwest)?;
    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(FetchError::from_status(status));
    }
    let j = resp
        .json::<Value>()
        .await
        .map_err(FetchError::from_reqwest)?;
    Ok(as_f64(j.get("total_usage")).unwrap_or(0.0))
}

/// Organization cost report; amounts are decimal USD strings per bucket.
async fn fetch_anthropic_cents(
    client: &reqwest::Client,
    base: &str,
    key: &str,
    start_ms: u64,
) -> Result<f64, FetchError> {
    let starting_at = Utc
        .timestamp_millis_opt(start_ms as i64)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    let url = format!("{base}/v1/organizations/cost_report?starting_at={starting_at}");
    let resp = client
        .get(url)
        .header("x-api-key", key)
        .header("anthropic-version", "2023-06-01")
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .send()
        .await
        .map_err(FetchError::from_reqwest)?;
    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(FetchError::from_status(status));
    }
    let j = resp
        .json::<Value>()
        .await
        .map_err(FetchError::from_reqwest)?;

    let mut usd = 0.0;
    if let Some(buckets) = j.get("data").and_then(|v| v.as_array()) {
        for bucket in buckets {
            if let Some(results) = bucket.get("results").and_then(|v| v.as_array()) {
                for row in results {
                    usd += as_f64(row.get("amount")).unwrap_or(0.0);
                }
            }
        }
    }
    Ok(usd * 100.0)
}

async fn fetch_gemini_cents(
    client: &reqwest::Client,
    base: &str,
    key: &str,
) -> Result<f64, FetchError> {
    let url = format!(
        "{base}/v1beta/billing/usage?key={}",
        urlencoding::encode(key)
    );
    let resp = client
        .get(url)
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .send()
        .await
        .map_err(FetchError::from_reqwest)?;
    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(FetchError::from_status(status));
    }
    let j = resp
        .json::<Value>()
        .await
        .map_err(FetchError::from_reqwest)?;
    Ok(as_f64(j.get("totalSpendCents"))
        .or_else(|| as_f64(j.get("totalUsage")))
        .unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_store_dir;

    async fn start_mock_server(anthropic_ok: bool) -> (String, tokio::task::JoinHandle<()>) {
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::{Json, Router};

        let app = Router::new()
            .route(
                "/dashboard/billing/usage",
                get(|| async move {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({ "total_usage": 1234.5 })),
                    )
                }),
            )
            .route(
                "/v1/organizations/cost_report",
                get(move || async move {
                    if !anthropic_ok {
                        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "data": [
                                { "results": [ { "amount": "1.25", "currency": "USD" } ] },
                                { "results": [ { "amount": "0.75", "currency": "USD" } ] }
                            ]
                        })),
                    )
                }),
            )
            .route(
                "/v1beta/billing/usage",
                get(|| async move {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({ "totalSpendCents": "42" })),
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{}:{}", addr.ip(), addr.port());
        let h = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (url, h)
    }

    fn mk_cfg(base: &str) -> AppConfig {
        let mut cfg = AppConfig::default_config();
        for (_, p) in cfg.providers.iter_mut() {
            p.usage_base_url = Some(base.to_string());
        }
        cfg
    }

    #[tokio::test]
    async fn totals_cover_credentialed_providers_only() {
        let (base, _h) = start_mock_server(true).await;
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store_dir(tmp.path().to_path_buf()).unwrap();
        store.set_provider_key("openAI", "sk-1").unwrap();
        store.set_provider_key("googleGemini", "g-1").unwrap();

        let totals = fetch_provider_totals(&mk_cfg(&base), &store, 0, 1_755_700_000_000).await;
        assert_eq!(totals.len(), 2);
        // Sorted by display name: Google Gemini before OpenAI.
        assert_eq!(totals[0].provider, Provider::GoogleGemini);
        assert_eq!(totals[0].spend_cents, 42.0);
        assert_eq!(totals[1].provider, Provider::OpenAi);
        assert_eq!(totals[1].spend_cents, 1234.5);
    }

    #[tokio::test]
    async fn failed_provider_is_dropped_not_fatal() {
        let (base, _h) = start_mock_server(false).await;
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store_dir(tmp.path().to_path_buf()).unwrap();
        store.set_provider_key("openAI", "sk-1").unwrap();
        store.set_provider_key("anthropic", "sk-2").unwrap();

        let totals = fetch_provider_totals(&mk_cfg(&base), &store, 0, 1_755_700_000_000).await;
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].provider, Provider::OpenAi);

        // The failure lands in the journal.
        let rows = store.list_recent_events(10);
        assert!(rows.iter().any(|r| {
            r.get("scope").and_then(|v| v.as_str()) == Some("anthropic")
                && r.get("code").and_then(|v| v.as_str()) == Some("provider.fetch_failed")
        }));
    }

    #[tokio::test]
    async fn disabled_provider_is_skipped() {
        let (base, _h) = start_mock_server(true).await;
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store_dir(tmp.path().to_path_buf()).unwrap();
        store.set_provider_key("openAI", "sk-1").unwrap();

        let mut cfg = mk_cfg(&base);
        if let Some(p) = cfg.providers.get_mut(Provider::OpenAi.as_str()) {
            p.enabled = false;
        }
        let totals = fetch_provider_totals(&cfg, &store, 0, 1_755_700_000_000).await;
        assert!(totals.is_empty());
    }

    #[tokio::test]
    async fn anthropic_amounts_sum_to_cents() {
        let (base, _h) = start_mock_server(true).await;
        let client = reqwest::Client::new();
        let cents = fetch_anthropic_cents(&client, &base, "sk-2", 0).await.unwrap();
        assert_eq!(cents, 200.0);
    }
}
