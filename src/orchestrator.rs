use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, FixedOffset, TimeZone};
use parking_lot::{Mutex, RwLock};

use crate::analytics::{self, AnalyticsInput, AnalyticsSettings};
use crate::cache::UsageCache;
use crate::config::{resolve_personalization, AppConfig};
use crate::constants::{EVENTS_PAGE_SIZE, MAX_EVENT_SYNC_PAGES, PAUSED_POLL_SECS};
use crate::error::{FetchError, RefreshError, SyncError};
use crate::gateway::UsageApiClient;
use crate::models::{
    Credentials, DashboardSnapshot, Provider, ProviderUsageTotal, UsageEvent,
};
use crate::session::TrackerSession;
use crate::store::{unix_ms, Store};

/// What a `refresh_now` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed,
    /// Paused, or another cycle was already in flight. Never queued.
    Skipped,
}

/// Drives the periodic refresh cycle: fans out the remote fetches, feeds
/// the event sync through the cache, runs the analytics engine and
/// publishes the merged snapshot.
///
/// Cheap to clone; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    cfg: Arc<RwLock<AppConfig>>,
    store: Store,
    cache: UsageCache,
    client: UsageApiClient,
    session: TrackerSession,
    credentials: Arc<RwLock<Option<Credentials>>>,
    refreshing: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    loop_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

/// Resets the single-flight flag when the cycle ends, on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RefreshOrchestrator {
    pub fn new(
        cfg: AppConfig,
        store: Store,
        cache: UsageCache,
        client: UsageApiClient,
        session: TrackerSession,
    ) -> Self {
        let credentials = store.get_credentials();
        Self {
            cfg: Arc::new(RwLock::new(cfg)),
            store,
            cache,
            client,
            session,
            credentials: Arc::new(RwLock::new(credentials)),
            refreshing: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session(&self) -> &TrackerSession {
        &self.session
    }

    pub fn set_credentials(&self, creds: Credentials) -> Result<(), crate::error::StoreError> {
        self.store.put_credentials(&creds)?;
        *self.credentials.write() = Some(creds);
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.read().is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Skip upcoming cycles until `resume`. An in-flight cycle finishes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        log::info!("refresh paused");
    }

    /// Clear the pause flag and kick off one immediate cycle.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        log::info!("refresh resumed");
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.refresh_now().await {
                log::warn!("refresh after resume failed: {e}");
            }
        });
    }

    /// Publish persisted state, run one immediate cycle, then start the
    /// interval loop.
    pub fn start(&self) {
        // Warm the observable with the last persisted snapshot so the UI
        // has data before the first network cycle completes.
        if self.session.current().generated_at_unix_ms == 0 {
            if let Some(snapshot) = self.store.get_dashboard_snapshot() {
                self.session.publish(snapshot);
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.refresh_now().await {
                log::warn!("initial refresh failed: {e}");
            }
        });

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_loop().await });
        *self.loop_handle.lock() = Some(handle);
    }

    /// Stop the interval loop. An in-flight cycle is left to finish so the
    /// cache and snapshot are never torn mid-write.
    pub fn stop(&self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }

    async fn run_loop(self) {
        loop {
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(PAUSED_POLL_SECS)).await;
                continue;
            }
            let minutes = self.cfg.read().refresh_interval_minutes.max(1);
            tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
            if self.paused.load(Ordering::SeqCst) {
                continue;
            }
            // Each cycle runs as its own task: stopping the loop never
            // cancels a cycle that already started.
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.refresh_now().await {
                    log::warn!("scheduled refresh failed: {e}");
                }
            });
        }
    }

    /// Single-flight refresh. A concurrent call while a cycle is running,
    /// or any call while paused, is a no-op rather than being queued.
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, RefreshError> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(RefreshOutcome::Skipped);
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = FlightGuard(&self.refreshing);

        let started = std::time::Instant::now();
        let result = self.run_cycle().await;
        match &result {
            Ok(()) => {
                self.store.add_event(
                    "cycle",
                    "info",
                    "refresh.ok",
                    "refresh cycle completed",
                    serde_json::json!({ "elapsed_ms": started.elapsed().as_millis() as u64 }),
                );
            }
            Err(e) => {
                self.store.add_event(
                    "cycle",
                    "error",
                    "refresh.failed",
                    &e.to_string(),
                    serde_json::Value::Null,
                );
            }
        }
        result.map(|()| RefreshOutcome::Completed)
    }

    async fn run_cycle(&self) -> Result<(), RefreshError> {
        let Some(creds) = self.credentials.read().clone() else {
            return Err(RefreshError::NotSignedIn);
        };
        let cfg = self.cfg.read().clone();
        let personalization = resolve_personalization(&cfg);
        let now = unix_ms();
        let window_start = now.saturating_sub(cfg.retention_days as u64 * 86_400_000);
        let month_start = month_start_ms(personalization.utc_offset, now).unwrap_or(window_start);
        let previous = self.session.current();

        // Independent fetches fan out; the summary is awaited directly
        // because the whole cycle stands or falls with it.
        let events_task = tokio::spawn(sync_usage_events(
            self.client.clone(),
            self.cache.clone(),
            creds.clone(),
            cfg.retention_days,
            window_start,
            now,
        ));
        let analytics_task = {
            let client = self.client.clone();
            let creds = creds.clone();
            tokio::spawn(async move { client.fetch_user_analytics(&creds, window_start, now).await })
        };
        let totals_task = {
            let cfg = cfg.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                crate::providers::fetch_provider_totals(&cfg, &store, month_start, now).await
            })
        };

        let summary = match self.client.fetch_usage_summary(&creds).await {
            Ok(summary) => summary,
            Err(e) => {
                events_task.abort();
                analytics_task.abort();
                totals_task.abort();
                return Err(match e {
                    FetchError::SessionExpired(_) => RefreshError::SessionExpired,
                    other => RefreshError::Summary(other),
                });
            }
        };

        // First publish: the fresh summary over the previous cycle's
        // events and analytics, so the UI updates before the slow calls
        // land.
        let mut partial = previous.clone();
        partial.generated_at_unix_ms = now;
        partial.summary = Some(summary.clone());
        partial.last_error.clear();
        self.session.publish(partial);

        let team_free_usage_cents = if summary.is_team_plan() && !summary.is_enterprise() {
            match summary.team_id.or(cfg.team_id) {
                Some(team_id) => match self
                    .client
                    .fetch_team_free_usage_cents(&creds, team_id)
                    .await
                {
                    Ok(cents) => Some(cents),
                    Err(e) => {
                        log::warn!("team free usage fetch failed: {e}");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let mut degraded: Vec<String> = Vec::new();

        let events = match events_task.await {
            Ok(Ok(merged)) => merged,
            Ok(Err(SyncError::Cache(e))) => return Err(e.into()),
            Ok(Err(SyncError::Fetch(e))) => {
                self.store.add_event(
                    "events",
                    "error",
                    "sync.failed",
                    &e.to_string(),
                    serde_json::Value::Null,
                );
                degraded.push(format!("usage events sync failed: {e}"));
                Vec::new()
            }
            Err(e) => {
                degraded.push(format!("usage events task failed: {e}"));
                Vec::new()
            }
        };

        let user_analytics = match analytics_task.await {
            Ok(Ok(analytics)) => Some(analytics),
            Ok(Err(e)) => {
                self.store.add_event(
                    "analytics",
                    "error",
                    "fetch.failed",
                    &e.to_string(),
                    serde_json::Value::Null,
                );
                degraded.push(format!("user analytics fetch failed: {e}"));
                None
            }
            Err(e) => {
                degraded.push(format!("user analytics task failed: {e}"));
                None
            }
        };

        let mut provider_totals = totals_task.await.unwrap_or_default();

        // The cursor total is synthesized from the merged events rather
        // than fetched: the dashboard has no totals endpoint of its own.
        let cursor_total = ProviderUsageTotal {
            provider: Provider::Cursor,
            spend_cents: events.iter().map(UsageEvent::spend_cents).sum(),
            request_count: events.len() as u64,
            currency: personalization.currency.clone(),
            last_synced_unix_ms: now,
        };
        provider_totals.insert(0, cursor_total);

        let (requests_today, requests_yesterday) =
            requests_by_day(&events, personalization.utc_offset, now);

        let settings = AnalyticsSettings::from_config(&cfg, &personalization);
        let result = analytics::compute(
            &AnalyticsInput {
                events: &events,
                provider_totals: &provider_totals,
                settings: &settings,
                previous: Some(&previous),
            },
            now,
        );

        let snapshot = DashboardSnapshot {
            generated_at_unix_ms: unix_ms(),
            summary: Some(summary),
            team_free_usage_cents,
            events,
            user_analytics,
            provider_totals,
            aggregations: result.aggregations,
            forecast_warnings: result.forecast_warnings,
            live: result.live,
            cost_comparisons: result.cost_comparisons,
            requests_today,
            requests_yesterday,
            last_error: degraded.join("; "),
        };

        self.session.publish(snapshot.clone());
        // The snapshot stays published even if persisting it fails; the
        // next clean cycle rewrites the stored copy.
        self.store.put_dashboard_snapshot(&snapshot)?;
        Ok(())
    }
}

/// The cache sync protocol. Empty cache: bulk-fetch the window and
/// overwrite. Otherwise paginate newest-first, keeping events until one is
/// at or behind the watermark (string compare works: timestamps are
/// fixed-width decimal ms), the page comes back short, or the page cap is
/// hit; then append.
async fn sync_usage_events(
    client: UsageApiClient,
    cache: UsageCache,
    creds: Credentials,
    retention_days: u32,
    window_start_ms: u64,
    now_ms: u64,
) -> Result<Vec<UsageEvent>, SyncError> {
    if cache.is_empty() {
        let mut all: Vec<UsageEvent> = Vec::new();
        let mut page = 1u32;
        loop {
            let fetched = client
                .fetch_usage_events_page(&creds, window_start_ms, now_ms, page)
                .await?;
            let short = (fetched.events.len() as u32) < EVENTS_PAGE_SIZE;
            all.extend(fetched.events);
            if short || page >= MAX_EVENT_SYNC_PAGES {
                break;
            }
            page += 1;
        }
        let watermark = all.first().map(|ev| ev.timestamp.clone());
        cache.replace(all, watermark)?;
        return Ok(cache.events());
    }

    let watermark = cache.watermark();
    let mut fresh: Vec<UsageEvent> = Vec::new();
    let mut page = 1u32;
    'pages: loop {
        let fetched = client
            .fetch_usage_events_page(&creds, window_start_ms, now_ms, page)
            .await?;
        let page_len = fetched.events.len() as u32;
        for ev in fetched.events {
            if let Some(wm) = watermark.as_deref() {
                if ev.timestamp.as_str() <= wm {
                    break 'pages;
                }
            }
            fresh.push(ev);
        }
        if page_len < EVENTS_PAGE_SIZE || page >= MAX_EVENT_SYNC_PAGES {
            break;
        }
        page += 1;
    }

    Ok(cache.append(&fresh, retention_days, now_ms)?)
}

fn month_start_ms(offset: FixedOffset, now_ms: u64) -> Option<u64> {
    let dt = offset.timestamp_millis_opt(now_ms as i64).single()?;
    let first = dt.date_naive().with_day(1)?.and_hms_opt(0, 0, 0)?;
    let ms = offset.from_local_datetime(&first).single()?.timestamp_millis();
    Some(ms.max(0) as u64)
}

fn requests_by_day(events: &[UsageEvent], offset: FixedOffset, now_ms: u64) -> (u64, u64) {
    let Some(now_dt) = offset.timestamp_millis_opt(now_ms as i64).single() else {
        return (0, 0);
    };
    let today = now_dt.date_naive();
    let yesterday = today.pred_opt();

    let mut today_count = 0u64;
    let mut yesterday_count = 0u64;
    for ev in events {
        let Some(ms) = ev.occurred_at_ms() else {
            continue;
        };
        let Some(dt) = offset.timestamp_millis_opt(ms as i64).single() else {
            continue;
        };
        let date = dt.date_naive();
        if date == today {
            today_count += 1;
        } else if Some(date) == yesterday {
            yesterday_count += 1;
        }
    }
    (today_count, yesterday_count)
}
