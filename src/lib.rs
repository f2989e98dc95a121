//! Local usage and spend tracking for AI coding subscriptions.
//!
//! The crate syncs billed usage events from the subscription dashboard
//! into an on-disk cache, folds in spend reported by directly-billed
//! provider accounts, and derives rollups, burn forecasts and
//! subscription-versus-pay-as-you-go comparisons from the merged data.
//! Everything runs against local state; the network is touched only by
//! the refresh cycle in [`orchestrator::RefreshOrchestrator`].

pub mod analytics;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod store;

pub use cache::UsageCache;
pub use config::{load_or_init_config, migrate_config, persist_config, AppConfig};
pub use error::{CacheError, FetchError, RefreshError, StoreError, SyncError};
pub use gateway::UsageApiClient;
pub use models::{Credentials, DashboardSnapshot, Provider, UsageEvent};
pub use orchestrator::{RefreshOrchestrator, RefreshOutcome};
pub use session::TrackerSession;
pub use store::{open_store_dir, Store};
