//! The token exchange chain.
//!
//! Stream URL resolution walks, lazily and only as far as needed:
//! device assertion -> device access token -> device id ->
//! authn session token -> okta access token -> entitlement token ->
//! stream access token -> stream URL lookup. Every link is reused while
//! unexpired; an expired link is re-derived from the first invalid one,
//! never from scratch. An upstream auth rejection invalidates the
//! immediately prior token and re-derives it exactly once.

use chrono::Duration;
use serde_json::{json, Value};

use crate::error::{GatewayError, Result};
use crate::session::{Expiring, SessionManager};

const DEVICES_URL: &str = "https://us.edge.bamgrid.com/devices";
const TOKEN_URL: &str = "https://us.edge.bamgrid.com/token";
const SESSION_URL: &str = "https://us.edge.bamgrid.com/session";
const AUTHN_URL: &str = "https://ids.mlb.com/api/v1/authn";
const AUTHORIZE_URL: &str = "https://ids.mlb.com/oauth2/aus1m088yK07noBfh356/v1/authorize";
const ENTITLEMENT_URL: &str = "https://media-entitlement.mlb.com/api/v3/jwt";
const PLAYBACK_URL_PREFIX: &str = "https://edge.svcs.mlb.com/media";
const PLAYBACK_SCENARIO: &str = "browser~csai";

const PLATFORM_API_KEY: &str =
    "ZGlzbmV5JmJyb3dzZXImMS4wLjA.Cu56AgSfBTDag5NiRA81oLHkDZfu5L3CKadnefEAY84";
const OKTA_CLIENT_ID: &str = "0oa3e1nutA1HLzAKG356";
const OKTA_REDIRECT_URI: &str = "https://www.mlb.com/login";

/// Fallback validity when an exchange response omits `expires_in`.
const DEFAULT_TOKEN_TTL: Duration = Duration::minutes(10);
const ASSERTION_TTL: Duration = Duration::minutes(5);
const AUTHN_TTL: Duration = Duration::minutes(15);
const ENTITLEMENT_TTL: Duration = Duration::minutes(15);
const STREAM_URL_TTL: Duration = Duration::minutes(5);

/// Outcome of one stream lookup attempt: either a URL or a recoverable
/// auth rejection that warrants regenerating the prior token.
enum Lookup {
    Url(String),
    AuthRejected,
}

impl SessionManager {
    /// Resolve the playable stream URL for a media id, walking the token
    /// chain as far as necessary.
    pub async fn resolve_stream_url(&self, media_id: &str) -> Result<String> {
        if self.is_blacked_out(media_id) {
            return Err(GatewayError::Blackout(media_id.to_string()));
        }

        if let Some(entry) = self.stream_urls.get(media_id) {
            if entry.is_valid() {
                return Ok(entry.value.clone());
            }
        }

        let url = match self.stream_lookup(media_id).await? {
            Lookup::Url(url) => url,
            Lookup::AuthRejected => {
                // One retry: drop the stream access token and re-derive it.
                tracing::info!("Stream lookup rejected; regenerating stream access token");
                self.record.lock().stream_access_token = None;
                self.save_record()?;
                match self.stream_lookup(media_id).await? {
                    Lookup::Url(url) => url,
                    Lookup::AuthRejected => {
                        return Err(GatewayError::Upstream(
                            "stream lookup rejected twice".to_string(),
                        ))
                    }
                }
            }
        };

        self.stream_urls.insert(
            media_id.to_string(),
            Expiring::new(url.clone(), STREAM_URL_TTL),
        );
        Ok(url)
    }

    async fn stream_lookup(&self, media_id: &str) -> Result<Lookup> {
        let token = self.stream_access_token().await?;
        let url = format!(
            "{}/{}/scenarios/{}",
            PLAYBACK_URL_PREFIX, media_id, PLAYBACK_SCENARIO
        );

        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .get(&url)
                    .bearer_auth(&token)
                    .header("Accept", "application/vnd.media-service+json; version=2"),
            )
            .await?;

        if auth_rejected(resp.status()) {
            return Ok(Lookup::AuthRejected);
        }

        let body: Value = resp.json().await?;

        if let Some(errors) = body.get("errors").and_then(|v| v.as_array()) {
            if !errors.is_empty() {
                let codes: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.get("code")
                            .and_then(|c| c.as_str())
                            .unwrap_or("unknown")
                            .to_string()
                    })
                    .collect();
                if codes.iter().any(|c| c.to_ascii_lowercase().contains("blackout")) {
                    tracing::warn!("Media {} is blacked out; recording", media_id);
                    self.record_blackout(media_id);
                    return Err(GatewayError::Blackout(media_id.to_string()));
                }
                return Err(GatewayError::NoMatch(codes.join(", ")));
            }
        }

        let url = body
            .pointer("/stream/complete")
            .or_else(|| body.pointer("/stream/slide"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GatewayError::Malformed("stream lookup response carries no URL".to_string())
            })?;

        Ok(Lookup::Url(url.to_string()))
    }

    /// Final chain link, persisted to disk with its expiry.
    async fn stream_access_token(&self) -> Result<String> {
        if let Some(token) = self.record.lock().stream_access_token.as_ref() {
            if token.is_valid() {
                return Ok(token.value.clone());
            }
        }

        let entitlement = self.entitlement_token().await?;
        let (token, ttl) = match self.exchange_entitlement(&entitlement).await? {
            Some(pair) => pair,
            None => {
                // Auth rejected: invalidate the prior link and try once more.
                tracing::info!("Entitlement exchange rejected; regenerating entitlement token");
                self.chain.lock().entitlement_token = None;
                let entitlement = self.entitlement_token().await?;
                self.exchange_entitlement(&entitlement).await?.ok_or_else(|| {
                    GatewayError::Upstream("entitlement exchange rejected twice".to_string())
                })?
            }
        };

        self.record.lock().stream_access_token = Some(Expiring::new(token.clone(), ttl));
        self.save_record()?;
        Ok(token)
    }

    /// One attempt at exchanging the entitlement token. `None` means the
    /// exchange was rejected for auth reasons.
    async fn exchange_entitlement(&self, entitlement: &str) -> Result<Option<(String, Duration)>> {
        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .post(TOKEN_URL)
                    .bearer_auth(PLATFORM_API_KEY)
                    .form(&[
                        (
                            "grant_type",
                            "urn:ietf:params:oauth:grant-type:token-exchange",
                        ),
                        ("platform", "browser"),
                        ("subject_token", entitlement),
                        (
                            "subject_token_type",
                            "urn:bamtech:params:oauth:token-type:account",
                        ),
                    ]),
            )
            .await?;

        if auth_rejected(resp.status()) {
            return Ok(None);
        }

        let body: Value = resp.json().await?;
        let token = required_str(&body, "access_token")?;
        Ok(Some((token, ttl_from(&body))))
    }

    async fn entitlement_token(&self) -> Result<String> {
        if let Some(token) = valid(&self.chain.lock().entitlement_token) {
            return Ok(token);
        }

        let token = match self.fetch_entitlement().await? {
            Some(token) => token,
            None => {
                // Auth rejected: invalidate the prior link and try once more.
                tracing::info!("Entitlement request rejected; regenerating okta access token");
                self.chain.lock().okta_access_token = None;
                self.fetch_entitlement().await?.ok_or_else(|| {
                    GatewayError::Upstream("entitlement request rejected twice".to_string())
                })?
            }
        };

        self.chain.lock().entitlement_token =
            Some(Expiring::new(token.clone(), ENTITLEMENT_TTL));
        Ok(token)
    }

    /// One attempt at fetching the entitlement JWT. `None` means the
    /// request was rejected for auth reasons.
    async fn fetch_entitlement(&self) -> Result<Option<String>> {
        let device_id = self.device_id().await?;
        let access = self.okta_access_token().await?;

        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .get(ENTITLEMENT_URL)
                    .query(&[
                        ("os", "windows"),
                        ("did", device_id.as_str()),
                        ("appname", "mlbtv_web"),
                    ])
                    .bearer_auth(&access)
                    .header("x-api-key", OKTA_CLIENT_ID),
            )
            .await?;

        if auth_rejected(resp.status()) {
            return Ok(None);
        }

        // The entitlement endpoint returns the JWT as a bare text body.
        let token = resp.text().await?;
        if token.is_empty() {
            return Err(GatewayError::Malformed(
                "entitlement endpoint returned empty body".to_string(),
            ));
        }
        Ok(Some(token))
    }

    async fn okta_access_token(&self) -> Result<String> {
        if let Some(token) = valid(&self.chain.lock().okta_access_token) {
            return Ok(token);
        }

        let session_token = self.authn_session_token().await?;

        // The authorize endpoint answers with a 302 whose Location fragment
        // carries the access token, so this request must not follow
        // redirects.
        let resp = self
            .fetcher
            .send(self.auth_client.get(AUTHORIZE_URL).query(&[
                ("client_id", OKTA_CLIENT_ID),
                ("redirect_uri", OKTA_REDIRECT_URI),
                ("response_type", "id_token token"),
                ("response_mode", "okta_post_message"),
                ("scope", "openid email"),
                ("state", "state"),
                ("nonce", "nonce"),
                ("sessionToken", session_token.as_str()),
            ]))
            .await?;

        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                GatewayError::Malformed("authorize response carries no redirect".to_string())
            })?;

        let (token, ttl) = parse_fragment_token(location).ok_or_else(|| {
            GatewayError::Malformed("authorize redirect carries no access token".to_string())
        })?;

        self.chain.lock().okta_access_token = Some(Expiring::new(token.clone(), ttl));
        Ok(token)
    }

    async fn authn_session_token(&self) -> Result<String> {
        if let Some(token) = valid(&self.chain.lock().authn_session_token) {
            return Ok(token);
        }

        let creds = self.credentials()?;
        let resp = self
            .fetcher
            .send(self.fetcher.client().post(AUTHN_URL).json(&json!({
                "username": creds.username,
                "password": creds.password,
                "options": {
                    "multiOptionalFactorEnroll": false,
                    "warnBeforePasswordExpired": true,
                },
            })))
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Upstream(
                "login rejected; check the stored credentials".to_string(),
            ));
        }

        let body: Value = resp.json().await?;
        let token = required_str(&body, "sessionToken")?;

        self.chain.lock().authn_session_token =
            Some(Expiring::new(token.clone(), AUTHN_TTL));
        Ok(token)
    }

    /// Device id is durable: derived once, persisted, reused forever.
    async fn device_id(&self) -> Result<String> {
        if let Some(id) = self.record.lock().device_id.clone() {
            return Ok(id);
        }

        let access = self.device_access_token().await?;
        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .post(SESSION_URL)
                    .bearer_auth(&access)
                    .header("Accept", "application/json"),
            )
            .await?;

        let body: Value = resp.json().await?;
        let id = body
            .pointer("/device/id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Malformed("session response carries no device id".to_string()))?
            .to_string();

        self.record.lock().device_id = Some(id.clone());
        self.save_record()?;
        Ok(id)
    }

    async fn device_access_token(&self) -> Result<String> {
        if let Some(token) = valid(&self.chain.lock().device_access_token) {
            return Ok(token);
        }

        let assertion = self.device_assertion().await?;
        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .post(TOKEN_URL)
                    .bearer_auth(PLATFORM_API_KEY)
                    .form(&[
                        (
                            "grant_type",
                            "urn:ietf:params:oauth:grant-type:token-exchange",
                        ),
                        ("platform", "browser"),
                        ("subject_token", assertion.as_str()),
                        (
                            "subject_token_type",
                            "urn:bamtech:params:oauth:token-type:device",
                        ),
                    ]),
            )
            .await?;

        let body: Value = resp.json().await?;
        let token = required_str(&body, "access_token")?;

        self.chain.lock().device_access_token =
            Some(Expiring::new(token.clone(), ttl_from(&body)));
        Ok(token)
    }

    async fn device_assertion(&self) -> Result<String> {
        if let Some(assertion) = valid(&self.chain.lock().device_assertion) {
            return Ok(assertion);
        }

        let resp = self
            .fetcher
            .send(
                self.fetcher
                    .client()
                    .post(DEVICES_URL)
                    .bearer_auth(PLATFORM_API_KEY)
                    .json(&json!({
                        "applicationRuntime": "firefox",
                        "attributes": {},
                        "deviceFamily": "browser",
                        "deviceProfile": "windows",
                    })),
            )
            .await?;

        let body: Value = resp.json().await?;
        let assertion = required_str(&body, "assertion")?;

        self.chain.lock().device_assertion =
            Some(Expiring::new(assertion.clone(), ASSERTION_TTL));
        Ok(assertion)
    }
}

/// Whether a response status is an auth rejection worth one retry of the
/// immediately prior chain link.
fn auth_rejected(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
}

/// Clone out a chain link if it is still valid.
fn valid(link: &Option<Expiring<String>>) -> Option<String> {
    link.as_ref()
        .filter(|t| t.is_valid())
        .map(|t| t.value.clone())
}

fn required_str(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::Malformed(format!("response missing `{}`", key)))
}

fn ttl_from(body: &Value) -> Duration {
    body.get("expires_in")
        .and_then(|v| v.as_i64())
        .map(Duration::seconds)
        .unwrap_or(DEFAULT_TOKEN_TTL)
}

/// Extract `access_token` and `expires_in` from a redirect URL fragment of
/// the form `https://host/path#access_token=...&expires_in=3600&...`.
fn parse_fragment_token(location: &str) -> Option<(String, Duration)> {
    let fragment = location.split_once('#')?.1;
    let mut token = None;
    let mut ttl = DEFAULT_TOKEN_TTL;

    for pair in fragment.split('&') {
        let (key, value) = pair.split_once('=')?;
        match key {
            "access_token" => {
                token = Some(urlencoding::decode(value).ok()?.into_owned());
            }
            "expires_in" => {
                if let Ok(secs) = value.parse::<i64>() {
                    ttl = Duration::seconds(secs);
                }
            }
            _ => {}
        }
    }

    token.map(|t| (t, ttl))
}
