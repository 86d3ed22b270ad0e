//! FritzBox web interface session manager
//!
//! Implements the login_sid.lua challenge/response flow:
//! 1. GET login_sid.lua - obtain the challenge nonce
//! 2. POST username + computed response - obtain the session id (SID)
//! 3. authenticated data.lua / REST requests carrying the SID
//!
//! The SID is cached and reused until the box invalidates it or
//! [`FritzSession::close`] is called. All methods take `&mut self`, so two
//! overlapping logins on the same session are unrepresentable.

use md5::{Digest, Md5};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fritz::tunnel::{self, TunnelMap};

const API_LOGIN: &str = "/login_sid.lua";
const API_DATA: &str = "/data.lua";
const API_VPN_CONNECTION: &str = "/api/v0/generic/vpn/connection";

/// The box answers with this sentinel SID when authentication failed.
const INVALID_SID: &str = "0000000000000000";

/// Timeout applied to data and toggle requests. The login exchange itself
/// inherits the client default.
const DATA_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the box needs to apply a toggle before the state is re-read.
const SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("login page returned HTTP {status}")]
    LoginPage { status: StatusCode },

    #[error("data endpoint returned HTTP {status}")]
    DataPage { status: StatusCode },

    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("no challenge in login response")]
    ChallengeMissing,

    #[error("login rejected: invalid session id (retry blocked for {block_time}s)")]
    InvalidSid { block_time: u64 },
}

impl SessionError {
    /// True for failures caused by bad credentials or a rejected login,
    /// as opposed to transport or protocol trouble.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::ChallengeMissing | SessionError::InvalidSid { .. }
        )
    }
}

/// Scheme used to reach the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn from_name(name: &str) -> Option<Protocol> {
        match name {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            _ => None,
        }
    }
}

// XML shape of login_sid.lua responses. Unknown children (Rights, Users)
// are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename = "SessionInfo")]
struct SessionInfoXml {
    #[serde(rename = "SID")]
    sid: String,
    #[serde(rename = "Challenge", default)]
    challenge: Option<String>,
    #[serde(rename = "BlockTime", default)]
    block_time: Option<u64>,
}

/// Compute the login response for a challenge.
///
/// The box expects `"{challenge}-{md5_hex(utf16le("{challenge}-{password}"))}"`.
/// The UTF-16LE round-trip is an AVM quirk inherited from the Windows-era
/// web interface.
pub fn challenge_response(challenge: &str, password: &str) -> String {
    let secret = format!("{challenge}-{password}");
    let utf16le: Vec<u8> = secret.encode_utf16().flat_map(u16::to_le_bytes).collect();

    let mut hasher = Md5::new();
    hasher.update(&utf16le);
    let hash: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

    format!("{challenge}-{hash}")
}

/// Statuses on the secure scheme that indicate the box only serves the
/// insecure one (no TLS listener, or a proxy in between rejecting it).
fn scheme_unsupported(status: StatusCode) -> bool {
    matches!(status.as_u16(), 400 | 404 | 502 | 503)
}

/// One authenticated session against a single FritzBox host.
pub struct FritzSession {
    host: String,
    protocol: Protocol,
    username: String,
    password: String,
    client: Option<Client>,
    sid: Option<String>,
}

impl FritzSession {
    pub fn new(host: &str, username: &str, password: &str, protocol: Protocol) -> Self {
        Self {
            host: host.to_string(),
            protocol,
            username: username.to_string(),
            password: password.to_string(),
            client: None,
            sid: None,
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.host)
    }

    // Lazily build the transport. Certificate validation is off: the box is
    // a LAN device with a self-signed certificate. Client handles are
    // reference-counted, so the clone is cheap.
    fn client(&mut self) -> Result<Client, SessionError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Get an authenticated SID, logging in if necessary.
    ///
    /// Idempotent: a cached SID on a live transport is returned as-is.
    /// The remote side invalidates idle sessions; callers observe that as a
    /// failed data request, after which the next call here re-authenticates.
    pub async fn acquire_session(&mut self) -> Result<String, SessionError> {
        if self.client.is_some() {
            if let Some(sid) = &self.sid {
                return Ok(sid.clone());
            }
        }

        let info = self.get_login_challenge().await?;
        let challenge = info.challenge.ok_or(SessionError::ChallengeMissing)?;
        debug!("Got login challenge: {}", challenge);

        let response = challenge_response(&challenge, &self.password);
        let login_url = format!("{}{}", self.base_url(), API_LOGIN);
        let client = self.client()?;
        let params = [
            ("username", self.username.as_str()),
            ("response", response.as_str()),
        ];

        let resp = client.post(&login_url).form(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::LoginPage { status });
        }

        let body = resp.text().await?;
        let info: SessionInfoXml = quick_xml::de::from_str(&body)?;

        if info.sid == INVALID_SID {
            return Err(SessionError::InvalidSid {
                block_time: info.block_time.unwrap_or(0),
            });
        }

        info!("Authenticated as {} against {}", self.username, self.host);
        self.sid = Some(info.sid.clone());
        Ok(info.sid)
    }

    // GET the login page and parse the challenge. A failed secure attempt
    // may downgrade the scheme once, after which the loop retries; any
    // further failure propagates.
    async fn get_login_challenge(&mut self) -> Result<SessionInfoXml, SessionError> {
        loop {
            let url = format!("{}{}", self.base_url(), API_LOGIN);
            debug!("Requesting login challenge from {}", url);

            let resp = self.client()?.get(&url).send().await?;
            let status = resp.status();
            if status.is_success() {
                let body = resp.text().await?;
                return Ok(quick_xml::de::from_str(&body)?);
            }

            if self.downgrade_scheme(status) {
                continue;
            }

            return Err(SessionError::LoginPage { status });
        }
    }

    // Downgrade to http when the secure scheme is answered with a status
    // saying it is not served. Flips at most once per session: once on
    // http, the check never matches again, so the caller retries exactly
    // once before failing.
    fn downgrade_scheme(&mut self, status: StatusCode) -> bool {
        if self.protocol != Protocol::Https || !scheme_unsupported(status) {
            return false;
        }
        warn!(
            "Login page returned HTTP {} over https, retrying over http",
            status
        );
        self.protocol = Protocol::Http;
        true
    }

    /// Fetch the current WireGuard connection list, keyed by connection key.
    ///
    /// An unexpected response shape yields an empty map rather than an
    /// error; the cached SID is dropped in that case because the usual
    /// cause is an expired session.
    pub async fn fetch_tunnels(&mut self) -> Result<TunnelMap, SessionError> {
        let sid = self.acquire_session().await?;

        let data_url = format!("{}{}", self.base_url(), API_DATA);
        let params = [
            ("sid", sid.as_str()),
            ("xhr", "1"),
            ("xhrId", "all"),
            ("lang", "de"),
            ("page", "shareWireguard"),
            ("no_sidrenew", ""),
        ];

        let resp = self
            .client()?
            .post(&data_url)
            .form(&params)
            .timeout(DATA_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            self.sid = None;
            return Err(SessionError::DataPage { status });
        }

        let body: Value = resp.json().await?;
        match tunnel::parse_box_connections(&body) {
            Some(tunnels) => {
                debug!("Fetched {} VPN connections", tunnels.len());
                Ok(tunnels)
            }
            None => {
                warn!("No boxConnections in data.lua response, dropping cached SID");
                self.sid = None;
                Ok(TunnelMap::new())
            }
        }
    }

    /// Switch a tunnel on or off and verify the change took effect.
    ///
    /// Returns `Ok(true)` when the re-read state matches `desired_active`
    /// (or it already did, in which case no write is issued), `Ok(false)`
    /// for unknown keys, rejected writes and failed verification. Only
    /// transport-level errors propagate.
    pub async fn set_tunnel_state(
        &mut self,
        key: &str,
        desired_active: bool,
    ) -> Result<bool, SessionError> {
        let tunnels = self.fetch_tunnels().await?;
        let Some(target) = tunnels.get(key) else {
            warn!("Unknown tunnel key '{}', nothing toggled", key);
            return Ok(false);
        };

        if target.active == desired_active {
            debug!(
                "Tunnel '{}' already {}",
                target.name,
                if desired_active { "active" } else { "inactive" }
            );
            return Ok(true);
        }

        let uid = target.uid.clone();
        let name = target.name.clone();

        let sid = self.acquire_session().await?;
        let api_url = format!("{}{}/{}", self.base_url(), API_VPN_CONNECTION, uid);
        let activated = if desired_active { "1" } else { "0" };
        let request_body = serde_json::json!({ "activated": activated });

        let resp = self
            .client()?
            .put(&api_url)
            .header("Authorization", format!("AVM-SID {sid}"))
            .json(&request_body)
            .timeout(DATA_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text: String = text.chars().take(200).collect();
            error!("Toggling '{}' rejected: HTTP {}, {}", name, status, text);
            return Ok(false);
        }

        debug!("Toggle of '{}' accepted, waiting for the box to apply it", name);
        tokio::time::sleep(SETTLE_DELAY).await;

        let tunnels = self.fetch_tunnels().await?;
        let verified = tunnels
            .get(key)
            .is_some_and(|t| t.active == desired_active);
        if verified {
            info!(
                "Tunnel '{}' is now {}",
                name,
                if desired_active { "active" } else { "inactive" }
            );
        } else {
            warn!("Toggle of '{}' did not stick, state unchanged", name);
        }
        Ok(verified)
    }

    /// Release the transport and forget the SID. Idempotent.
    pub fn close(&mut self) {
        self.client = None;
        self.sid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_response_golden() {
        // Fixed vector, checked byte-for-byte
        assert_eq!(
            challenge_response("abc", "pw"),
            "abc-4a0f280efc67b6072d194ec0752b0258"
        );
    }

    #[test]
    fn test_challenge_response_avm_documented_example() {
        // From the AVM session-id technical note (non-ASCII password)
        assert_eq!(
            challenge_response("1234567z", "äbc"),
            "1234567z-9e224a41eeefa284df7bb0f26c2913e2"
        );
    }

    #[test]
    fn test_parse_session_info_with_challenge() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
            <SessionInfo>
                <SID>0000000000000000</SID>
                <Challenge>1234567z</Challenge>
                <BlockTime>0</BlockTime>
                <Rights></Rights>
            </SessionInfo>"#;

        let info: SessionInfoXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(info.sid, INVALID_SID);
        assert_eq!(info.challenge.as_deref(), Some("1234567z"));
        assert_eq!(info.block_time, Some(0));
    }

    #[test]
    fn test_parse_session_info_without_challenge() {
        let xml = "<SessionInfo><SID>89abcdef01234567</SID></SessionInfo>";
        let info: SessionInfoXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(info.sid, "89abcdef01234567");
        assert!(info.challenge.is_none());
        assert!(info.block_time.is_none());
    }

    #[test]
    fn test_scheme_unsupported_statuses() {
        for code in [400, 404, 502, 503] {
            assert!(scheme_unsupported(StatusCode::from_u16(code).unwrap()));
        }
        for code in [401, 403, 500] {
            assert!(!scheme_unsupported(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(SessionError::ChallengeMissing.is_auth_failure());
        assert!(SessionError::InvalidSid { block_time: 32 }.is_auth_failure());
        assert!(
            !SessionError::LoginPage {
                status: StatusCode::NOT_FOUND
            }
            .is_auth_failure()
        );
        assert!(
            !SessionError::DataPage {
                status: StatusCode::FORBIDDEN
            }
            .is_auth_failure()
        );
    }

    #[test]
    fn test_downgrade_retries_insecure_exactly_once() {
        let mut session = FritzSession::new("fritz.box", "admin", "pw", Protocol::Https);
        assert_eq!(session.base_url(), "https://fritz.box");

        // 404 over https: flip to http and retry
        assert!(session.downgrade_scheme(StatusCode::NOT_FOUND));
        assert_eq!(session.protocol, Protocol::Http);
        assert_eq!(session.base_url(), "http://fritz.box");

        // 404 again, now on the insecure scheme: no further fallback,
        // the caller propagates LoginPage
        assert!(!session.downgrade_scheme(StatusCode::NOT_FOUND));
        assert_eq!(session.base_url(), "http://fritz.box");
    }

    #[test]
    fn test_no_downgrade_on_unrelated_statuses() {
        let mut session = FritzSession::new("fritz.box", "admin", "pw", Protocol::Https);
        assert!(!session.downgrade_scheme(StatusCode::UNAUTHORIZED));
        assert!(!session.downgrade_scheme(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(session.base_url(), "https://fritz.box");
    }

    #[test]
    fn test_protocol_from_name() {
        assert_eq!(Protocol::from_name("http"), Some(Protocol::Http));
        assert_eq!(Protocol::from_name("https"), Some(Protocol::Https));
        assert_eq!(Protocol::from_name("ftp"), None);
    }
}
