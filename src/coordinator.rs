//! Poller/controller for one FritzBox host
//!
//! Wraps a [`FritzSession`] behind a small trait seam, classifies failures,
//! and drives the notification side-channel: one notification per
//! authentication-failure episode, one dismissal on recovery. The caller
//! (the `watch` command, or any other scheduler) invokes [`VpnCoordinator::refresh`]
//! on a fixed cadence; cycles never overlap because the coordinator is
//! driven through `&mut self`.

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::fritz::session::{FritzSession, SessionError};
use crate::fritz::tunnel::TunnelMap;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);

/// Generic "update failed" error surfaced to the scheduler, always
/// carrying the root cause.
#[derive(Error, Debug)]
#[error("VPN data update failed: {source}")]
pub struct UpdateError {
    #[from]
    source: SessionError,
}

impl UpdateError {
    pub fn is_auth_failure(&self) -> bool {
        self.source.is_auth_failure()
    }
}

/// Sink for authentication-failure alerts.
///
/// `tag` is stable per host so the sink can replace or dismiss an earlier
/// alert for the same box.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str, tag: &str);
    fn dismiss(&self, tag: &str);
}

/// Where the coordinator gets its tunnel data. Implemented by
/// [`FritzSession`]; tests substitute a scripted fake.
#[allow(async_fn_in_trait)]
pub trait TunnelSource {
    async fn fetch_tunnels(&mut self) -> Result<TunnelMap, SessionError>;
    async fn set_tunnel_state(
        &mut self,
        key: &str,
        desired_active: bool,
    ) -> Result<bool, SessionError>;
    fn close(&mut self) {}
}

impl TunnelSource for FritzSession {
    async fn fetch_tunnels(&mut self) -> Result<TunnelMap, SessionError> {
        FritzSession::fetch_tunnels(self).await
    }

    async fn set_tunnel_state(
        &mut self,
        key: &str,
        desired_active: bool,
    ) -> Result<bool, SessionError> {
        FritzSession::set_tunnel_state(self, key, desired_active).await
    }

    fn close(&mut self) {
        FritzSession::close(self);
    }
}

/// Per-host poller with sticky authentication-failure state.
pub struct VpnCoordinator<S, N> {
    source: S,
    notifier: N,
    tag: String,
    poll_interval: Duration,
    auth_alerted: bool,
}

impl<S: TunnelSource, N: Notifier> VpnCoordinator<S, N> {
    pub fn new(source: S, notifier: N, host: &str, poll_interval: Duration) -> Self {
        Self {
            source,
            notifier,
            tag: format!("fritz-vpn-auth-{host}"),
            poll_interval: clamp_interval(poll_interval),
            auth_alerted: false,
        }
    }

    /// Polling cadence, already clamped to the supported range.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetch a fresh tunnel snapshot.
    ///
    /// A success clears a previously raised authentication alert (exactly
    /// one dismissal per episode). Failures are classified, possibly
    /// raise the alert, and are wrapped into [`UpdateError`].
    pub async fn refresh(&mut self) -> Result<TunnelMap, UpdateError> {
        match self.source.fetch_tunnels().await {
            Ok(tunnels) => {
                self.clear_auth_alert();
                Ok(tunnels)
            }
            Err(err) => {
                self.classify_failure(&err);
                Err(err.into())
            }
        }
    }

    /// Toggle a tunnel, with the same classification/notification wrapping
    /// as [`VpnCoordinator::refresh`].
    pub async fn toggle(&mut self, key: &str, desired_active: bool) -> Result<bool, UpdateError> {
        match self.source.set_tunnel_state(key, desired_active).await {
            Ok(ok) => Ok(ok),
            Err(err) => {
                self.classify_failure(&err);
                Err(err.into())
            }
        }
    }

    pub fn close(&mut self) {
        self.source.close();
    }

    // Raise the sticky alert at most once per failure episode. Polling
    // continues on the same cadence, trying to recover each cycle.
    fn classify_failure(&mut self, err: &SessionError) {
        if !err.is_auth_failure() {
            return;
        }
        if self.auth_alerted {
            return;
        }
        self.auth_alerted = true;
        error!("Authentication failure: {}", err);
        self.notifier.notify(
            "FritzBox VPN",
            &format!("Authentication failed: {err}. Check username and password."),
            &self.tag,
        );
    }

    fn clear_auth_alert(&mut self) {
        if self.auth_alerted {
            self.auth_alerted = false;
            info!("Authentication recovered");
            self.notifier.dismiss(&self.tag);
        }
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}
