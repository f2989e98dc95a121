use thiserror::Error;

/// A single remote call's failure, classified the way the refresh cycle
/// reacts to it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(reqwest::Error),
    /// 401/403 from the dashboard. The session cookie is no longer valid
    /// and the user has to sign in again.
    #[error("session expired (http {0})")]
    SessionExpired(u16),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("decode error: {0}")]
    Decode(reqwest::Error),
}

impl FetchError {
    /// Classify a reqwest error: body/JSON problems are decode failures,
    /// everything else is transport.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e)
        } else {
            Self::Network(e)
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::SessionExpired(status),
            other => Self::Status(other),
        }
    }

    /// Transient failures are retried silently on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Status(_) | Self::Decode(_))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sled::Error),
    #[error("store encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure inside the incremental event sync. Fetch failures degrade the
/// events portion of a cycle; cache persistence failures fail the cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Why a whole refresh cycle failed. Everything except session expiry is
/// retried silently at the next tick.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("not signed in")]
    NotSignedIn,
    /// Re-raised distinctly so callers can surface a "needs re-login"
    /// signal instead of silently retrying.
    #[error("session expired")]
    SessionExpired,
    /// The load-bearing usage-summary call failed for a transient reason.
    #[error("usage summary fetch failed: {0}")]
    Summary(FetchError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_maps_auth_codes_to_session_expiry() {
        assert!(matches!(
            FetchError::from_status(401),
            FetchError::SessionExpired(401)
        ));
        assert!(matches!(
            FetchError::from_status(403),
            FetchError::SessionExpired(403)
        ));
        assert!(matches!(FetchError::from_status(500), FetchError::Status(500)));
        assert!(!FetchError::SessionExpired(401).is_transient());
        assert!(FetchError::Status(502).is_transient());
    }
}
