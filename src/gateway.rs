use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::constants::{
    DASHBOARD_BASE_URL, DASHBOARD_USER_AGENT, EVENTS_PAGE_SIZE, HTTP_TIMEOUT_SECS,
    TEAM_FREE_USAGE_PATH, USAGE_EVENTS_PATH, USAGE_SUMMARY_PATH, USER_ANALYTICS_PATH,
};
use crate::error::FetchError;
use crate::models::{Credentials, UsageEvent, UsageSummary, UserAnalytics};

/// One page of the filtered-usage-events endpoint.
pub struct EventsPage {
    pub events: Vec<UsageEvent>,
    pub total: u64,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventsResponse {
    usage_events_display: Vec<UsageEvent>,
    total_usage_events_count: u64,
}

/// Thin client for the dashboard's session-cookie API. Pure I/O; paging
/// decisions and caching live with the caller.
#[derive(Clone)]
pub struct UsageApiClient {
    http: reqwest::Client,
    base: String,
}

impl UsageApiClient {
    /// `base_override` points at a self-hosted dashboard or a test server.
    pub fn new(base_override: Option<&str>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(DASHBOARD_USER_AGENT)
            .build()?;
        let base = base_override
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DASHBOARD_BASE_URL.to_string());
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn session_cookie(creds: &Credentials) -> String {
        let token = format!("{}::{}", creds.user_id, creds.access_token);
        format!("WorkosCursorSessionToken={}", urlencoding::encode(&token))
    }

    fn with_session(
        &self,
        rb: reqwest::RequestBuilder,
        creds: &Credentials,
    ) -> reqwest::RequestBuilder {
        rb.header(reqwest::header::COOKIE, Self::session_cookie(creds))
            .header(reqwest::header::ORIGIN, self.base.clone())
            .header(reqwest::header::REFERER, format!("{}/dashboard", self.base))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, FetchError> {
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
        resp.json::<Value>().await.map_err(FetchError::from_reqwest)
    }

    pub async fn fetch_usage_summary(
        &self,
        creds: &Credentials,
    ) -> Result<UsageSummary, FetchError> {
        let url = format!("{}{USAGE_SUMMARY_PATH}", self.base);
        let resp = self
            .with_session(self.http.get(url), creds)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
        resp.json::<UsageSummary>()
            .await
            .map_err(FetchError::from_reqwest)
    }

    /// Fetch one page of usage events for `[start_ms, end_ms]`. Pages are
    /// 1-based and served newest-first.
    pub async fn fetch_usage_events_page(
        &self,
        creds: &Credentials,
        start_ms: u64,
        end_ms: u64,
        page: u32,
    ) -> Result<EventsPage, FetchError> {
        let url = format!("{}{USAGE_EVENTS_PATH}", self.base);
        // Millisecond bounds go over the wire as decimal strings.
        let body = serde_json::json!({
            "teamId": 0,
            "startDate": start_ms.to_string(),
            "endDate": end_ms.to_string(),
            "page": page,
            "pageSize": EVENTS_PAGE_SIZE,
        });
        let resp = self
            .with_session(self.http.post(url).json(&body), creds)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
        let parsed = resp
            .json::<EventsResponse>()
            .await
            .map_err(FetchError::from_reqwest)?;
        Ok(EventsPage {
            events: parsed.usage_events_display,
            total: parsed.total_usage_events_count,
        })
    }

    pub async fn fetch_user_analytics(
        &self,
        creds: &Credentials,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<UserAnalytics, FetchError> {
        let url = format!("{}{USER_ANALYTICS_PATH}", self.base);
        let body = serde_json::json!({
            "teamId": 0,
            "userId": 0,
            "startDate": start_ms.to_string(),
            "endDate": end_ms.to_string(),
        });
        let resp = self
            .with_session(self.http.post(url).json(&body), creds)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
        resp.json::<UserAnalytics>()
            .await
            .map_err(FetchError::from_reqwest)
    }

    pub async fn fetch_team_free_usage_cents(
        &self,
        creds: &Credentials,
        team_id: i64,
    ) -> Result<i64, FetchError> {
        let url = format!("{}{TEAM_FREE_USAGE_PATH}", self.base);
        let body = serde_json::json!({ "teamId": team_id });
        let resp = self
            .with_session(self.http.post(url).json(&body), creds)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let j = Self::read_json(resp).await?;
        let cents = as_f64(j.get("totalCents"))
            .or_else(|| as_f64(j.get("usageCents")))
            .or_else(|| as_f64(Some(&j)))
            .unwrap_or(0.0);
        Ok(cents.round() as i64)
    }
}

/// Lenient numeric read: providers interchangeably send numbers and
/// number-shaped strings.
pub(crate) fn as_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64()
        .or_else(|| v.as_i64().map(|n| n as f64))
        .or_else(|| v.as_u64().map(|n| n as f64))
        .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}
