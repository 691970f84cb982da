//! Session state: credentials, persisted tokens and the blackout set.
//!
//! The token chain itself (the ordered exchanges that end in a usable
//! stream URL) lives in [`chain`]; this module owns the state those
//! exchanges read and write. Only the two longest-lived links persist to
//! disk: the device id (durable) and the stream access token (with its
//! expiry). Everything else is re-derived in memory on demand.

pub mod chain;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::fetch::Fetcher;

const CREDENTIALS_FILE: &str = "credentials.json";
const SESSION_FILE: &str = "session.json";

/// Long-lived, user-supplied account credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A value with an absolute validity deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiring<T> {
    pub value: T,
    pub expiry: DateTime<Utc>,
}

impl<T> Expiring<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expiry: Utc::now() + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expiry
    }
}

/// The durable slice of session state, persisted as `session.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub device_id: Option<String>,
    pub stream_access_token: Option<Expiring<String>>,
    #[serde(default)]
    pub blackouts: Vec<String>,
}

/// In-memory links of the token chain, shortest-lived first.
#[derive(Default)]
pub(crate) struct TokenChain {
    pub device_assertion: Option<Expiring<String>>,
    pub device_access_token: Option<Expiring<String>>,
    pub authn_session_token: Option<Expiring<String>>,
    pub okta_access_token: Option<Expiring<String>>,
    pub entitlement_token: Option<Expiring<String>>,
}

/// Owns credential and token state and performs stream URL resolution.
pub struct SessionManager {
    pub(crate) fetcher: Arc<Fetcher>,
    /// Separate client with redirects disabled; the okta authorize step
    /// reads its token out of the redirect Location header.
    pub(crate) auth_client: reqwest::Client,
    data_dir: PathBuf,
    credentials: Mutex<Option<Credentials>>,
    pub(crate) chain: Mutex<TokenChain>,
    pub(crate) record: Mutex<SessionRecord>,
    pub(crate) stream_urls: DashMap<String, Expiring<String>>,
}

impl SessionManager {
    /// Load session state from the data directory. `bootstrap` credentials
    /// (from flags) are persisted on first use; an existing credentials
    /// file always wins.
    pub fn load(
        data_dir: impl Into<PathBuf>,
        fetcher: Arc<Fetcher>,
        bootstrap: Option<Credentials>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let cred_path = data_dir.join(CREDENTIALS_FILE);
        let credentials = match fs::read_to_string(&cred_path) {
            Ok(body) => Some(serde_json::from_str(&body)?),
            Err(_) => {
                if let Some(creds) = &bootstrap {
                    fs::write(&cred_path, serde_json::to_vec_pretty(creds)?)?;
                }
                bootstrap
            }
        };

        let record = fs::read_to_string(data_dir.join(SESSION_FILE))
            .ok()
            .and_then(|body| serde_json::from_str(&body).ok())
            .unwrap_or_default();

        let auth_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            fetcher,
            auth_client,
            data_dir,
            credentials: Mutex::new(credentials),
            chain: Mutex::new(TokenChain::default()),
            record: Mutex::new(record),
            stream_urls: DashMap::new(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.lock().is_some()
    }

    /// Credentials, or the fatal configuration error every chain step
    /// propagates when they are missing.
    pub(crate) fn credentials(&self) -> Result<Credentials> {
        self.credentials.lock().clone().ok_or_else(|| {
            GatewayError::Config(
                "no credentials on file; start once with --username/--password".to_string(),
            )
        })
    }

    pub fn is_blacked_out(&self, media_id: &str) -> bool {
        self.record
            .lock()
            .blackouts
            .iter()
            .any(|m| m == media_id)
    }

    pub(crate) fn record_blackout(&self, media_id: &str) {
        {
            let mut record = self.record.lock();
            if record.blackouts.iter().any(|m| m == media_id) {
                return;
            }
            record.blackouts.push(media_id.to_string());
        }
        if let Err(e) = self.save_record() {
            tracing::warn!("Failed to persist blackout for {}: {}", media_id, e);
        }
    }

    pub fn blackout_count(&self) -> usize {
        self.record.lock().blackouts.len()
    }

    /// Forget everything: credentials, persisted session, in-memory chain,
    /// blackouts and resolved URLs. The operator's way out of a recorded
    /// blackout.
    pub fn logout(&self) -> Result<()> {
        let _ = fs::remove_file(self.data_dir.join(CREDENTIALS_FILE));
        let _ = fs::remove_file(self.data_dir.join(SESSION_FILE));
        *self.credentials.lock() = None;
        *self.chain.lock() = TokenChain::default();
        *self.record.lock() = SessionRecord::default();
        self.stream_urls.clear();
        Ok(())
    }

    pub(crate) fn save_record(&self) -> Result<()> {
        let body = serde_json::to_vec_pretty(&*self.record.lock())?;
        let path = self.data_dir.join(SESSION_FILE);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, creds: Option<Credentials>) -> SessionManager {
        let fetcher = Arc::new(Fetcher::new().unwrap());
        SessionManager::load(dir.path(), fetcher, creds).unwrap()
    }

    fn creds() -> Credentials {
        Credentials {
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_bootstrap_credentials_persist() {
        let dir = TempDir::new().unwrap();
        let session = manager(&dir, Some(creds()));
        assert!(session.has_credentials());
        drop(session);

        // A fresh load without bootstrap flags still finds them.
        let session = manager(&dir, None);
        assert!(session.has_credentials());
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let dir = TempDir::new().unwrap();
        let session = manager(&dir, None);
        assert!(matches!(
            session.credentials(),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_blackout_roundtrip() {
        let dir = TempDir::new().unwrap();
        let session = manager(&dir, None);
        assert!(!session.is_blacked_out("m1"));

        session.record_blackout("m1");
        session.record_blackout("m1");
        assert!(session.is_blacked_out("m1"));
        assert_eq!(session.blackout_count(), 1);

        // Blackouts survive a restart.
        drop(session);
        let session = manager(&dir, None);
        assert!(session.is_blacked_out("m1"));
    }

    #[test]
    fn test_logout_clears_state() {
        let dir = TempDir::new().unwrap();
        let session = manager(&dir, Some(creds()));
        session.record_blackout("m1");
        session.logout().unwrap();

        assert!(!session.has_credentials());
        assert!(!session.is_blacked_out("m1"));
        assert!(!dir.path().join(CREDENTIALS_FILE).exists());
        assert!(!dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_expiring_validity() {
        let fresh = Expiring::new("t".to_string(), Duration::minutes(5));
        assert!(fresh.is_valid());

        let stale = Expiring {
            value: "t".to_string(),
            expiry: Utc::now() - Duration::seconds(1),
        };
        assert!(!stale.is_valid());
    }
}
