use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::models::{Credentials, DashboardSnapshot};

pub fn unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Durable single-key persistence plus a bounded diagnostics journal.
///
/// Values are JSON blobs under flat keys; sled gives atomic single-key
/// read/write, which is all the snapshot and credential paths need.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    diag_seq: Arc<AtomicU64>,
}

const SNAPSHOT_KEY: &[u8] = b"snapshot:dashboard";
const CREDENTIALS_KEY: &[u8] = b"credentials";
const PROVIDER_KEY_PREFIX: &str = "provider_key:";
const DIAG_PREFIX: &[u8] = b"diag:";

impl Store {
    /// Newest journal rows kept after a prune; older rows rotate out.
    const MAX_DIAG_EVENTS: usize = 200;

    // Bump to invalidate old persisted journal shapes.
    const SCHEMA_VERSION: &'static [u8] = b"1";
    const SCHEMA_KEY: &'static [u8] = b"diag:schema_version";

    pub fn open(path: &Path) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        let store = Self {
            db,
            diag_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_schema();
        Ok(store)
    }

    fn ensure_schema(&self) {
        let cur = self
            .db
            .get(Self::SCHEMA_KEY)
            .ok()
            .flatten()
            .unwrap_or_default();
        if cur.as_ref() != Self::SCHEMA_VERSION {
            // Do not parse or migrate legacy journal rows; drop them.
            self.clear_diag();
            let _ = self.db.insert(Self::SCHEMA_KEY, Self::SCHEMA_VERSION);
            let _ = self.db.flush();
        }
    }

    fn clear_diag(&self) {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(DIAG_PREFIX)
            .filter_map(|res| res.ok())
            .map(|(k, _)| k)
            .filter(|k| k.as_ref() != Self::SCHEMA_KEY)
            .collect();
        for key in keys {
            let _ = self.db.remove(key);
        }
        let _ = self.db.flush();
    }

    pub fn put_dashboard_snapshot(&self, snapshot: &DashboardSnapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.db.insert(SNAPSHOT_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Missing or undecodable snapshots read as absent; the next clean
    /// cycle rewrites them.
    pub fn get_dashboard_snapshot(&self) -> Option<DashboardSnapshot> {
        let bytes = self.db.get(SNAPSHOT_KEY).ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn put_credentials(&self, creds: &Credentials) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(creds)?;
        self.db.insert(CREDENTIALS_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_credentials(&self) -> Option<Credentials> {
        let bytes = self.db.get(CREDENTIALS_KEY).ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn clear_credentials(&self) -> Result<(), StoreError> {
        self.db.remove(CREDENTIALS_KEY)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn set_provider_key(&self, provider: &str, key: &str) -> Result<(), StoreError> {
        let k = format!("{PROVIDER_KEY_PREFIX}{provider}");
        self.db.insert(k.as_bytes(), key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_provider_key(&self, provider: &str) -> Option<String> {
        let k = format!("{PROVIDER_KEY_PREFIX}{provider}");
        let bytes = self.db.get(k.as_bytes()).ok().flatten()?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    pub fn clear_provider_key(&self, provider: &str) -> Result<(), StoreError> {
        let k = format!("{PROVIDER_KEY_PREFIX}{provider}");
        self.db.remove(k.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Append one diagnostics row. Best-effort: journal writes never fail a
    /// refresh cycle.
    pub fn add_event(&self, scope: &str, level: &str, code: &str, message: &str, fields: Value) {
        let ts = unix_ms();
        let seq = self.diag_seq.fetch_add(1, Ordering::Relaxed);
        // 13-digit ms keeps sled's lexicographic key order chronological
        // until year 2286; the sequence breaks same-millisecond ties.
        let key = format!("diag:{ts:013}:{seq:06}");
        let fields = match fields {
            Value::Object(_) | Value::Null => fields,
            other => serde_json::json!({ "value": other }),
        };
        let row = serde_json::json!({
            "scope": scope,
            "level": level,
            "unix_ms": ts,
            "code": code,
            "message": message,
            "fields": fields,
        });
        let _ = self
            .db
            .insert(key.as_bytes(), serde_json::to_vec(&row).unwrap_or_default());
        self.prune_diag();
        let _ = self.db.flush();
    }

    fn prune_diag(&self) {
        // Keep only the newest MAX_DIAG_EVENTS rows; the schema key sorts
        // after every `diag:{digits}` key, so skip it explicitly.
        let boundary = self
            .db
            .scan_prefix(DIAG_PREFIX)
            .rev()
            .filter_map(|res| res.ok())
            .filter(|(k, _)| k.as_ref() != Self::SCHEMA_KEY)
            .nth(Self::MAX_DIAG_EVENTS);

        let Some((end_key, _)) = boundary else {
            return;
        };

        let start = DIAG_PREFIX.to_vec();
        let end = end_key.to_vec();

        let mut batch: Vec<sled::IVec> = Vec::with_capacity(256);
        for res in self.db.range(start..=end) {
            let Ok((k, _)) = res else {
                continue;
            };
            batch.push(k);
            if batch.len() >= 256 {
                for key in batch.drain(..) {
                    let _ = self.db.remove(key);
                }
            }
        }
        for key in batch.drain(..) {
            let _ = self.db.remove(key);
        }
    }

    pub fn list_recent_events(&self, limit: usize) -> Vec<Value> {
        self.db
            .scan_prefix(DIAG_PREFIX)
            .rev()
            .filter_map(|res| res.ok())
            .filter(|(k, _)| k.as_ref() != Self::SCHEMA_KEY)
            .filter_map(|(_, v)| serde_json::from_slice::<Value>(&v).ok())
            .take(limit)
            .collect()
    }
}

/// Open the store under `base`, recovering from a corrupted tree.
///
/// sled may panic if the on-disk database is corrupted (e.g. a blob was
/// deleted by hand). Move the broken tree aside and recreate rather than
/// crashing the whole app.
pub fn open_store_dir(base: PathBuf) -> anyhow::Result<Store> {
    std::fs::create_dir_all(&base)?;
    let path = base.join("sled");

    fn try_open(path: &Path) -> anyhow::Result<Store> {
        match std::panic::catch_unwind(|| Store::open(path)) {
            Ok(Ok(store)) => Ok(store),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow::anyhow!("sled panicked while opening the store")),
        }
    }

    match try_open(&path) {
        Ok(store) => Ok(store),
        Err(e) => {
            log::warn!("store open failed, recreating: {e}");
            let backup = base.join(format!("sled.corrupt.{}", unix_ms()));
            if path.exists() {
                if let Err(rename_err) = std::fs::rename(&path, &backup) {
                    log::warn!(
                        "failed to move corrupted store to {}: {rename_err}",
                        backup.display()
                    );
                    std::fs::remove_dir_all(&path)?;
                }
            }
            try_open(&path)
        }
    }
}
