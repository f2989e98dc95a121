pub const DASHBOARD_BASE_URL: &str = "https://cursor.com";
pub const USAGE_SUMMARY_PATH: &str = "/api/usage-summary";
pub const USAGE_EVENTS_PATH: &str = "/api/dashboard/get-filtered-usage-events";
pub const USER_ANALYTICS_PATH: &str = "/api/dashboard/get-user-analytics";
pub const TEAM_FREE_USAGE_PATH: &str = "/api/dashboard/get-team-free-usage";

pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com";
pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub const EVENTS_PAGE_SIZE: u32 = 100;
/// Safety bound against runaway pagination on servers that keep reporting
/// more pages than they serve.
pub const MAX_EVENT_SYNC_PAGES: u32 = 20;

pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// The dashboard rejects non-browser user agents.
pub const DASHBOARD_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";

pub const REFRESH_INTERVAL_MINUTES: u64 = 5;
/// While paused the loop re-checks on this shorter interval instead of the
/// full refresh interval.
pub const PAUSED_POLL_SECS: u64 = 30;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const SESSION_GAP_MINUTES: i64 = 30;
pub const LIVE_WINDOW_MINUTES: i64 = 60;

/// Fallback per-call fee in cents when no price source matches an event.
pub const FLAT_CALL_FEE_CENTS: f64 = 4.0;
pub const DEFAULT_SUBSCRIPTION_USD_MONTHLY: f64 = 20.0;
