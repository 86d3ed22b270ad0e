//! fritz-vpn - Monitor and switch WireGuard VPN tunnels on a FritzBox
//!
//! This crate authenticates against a FritzBox router's web management
//! interface, polls it for the state of configured WireGuard tunnels, and
//! can flip a tunnel on or off with post-write verification.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML)
//! - `fritz`: Session manager and tunnel model (login_sid.lua protocol)
//! - `coordinator`: Poller/controller with auth-failure notification state
//! - `notify`: Desktop notification sinks
//!
//! # Usage
//!
//! ```bash
//! fritz-vpn init        # write a config skeleton
//! fritz-vpn status      # one-shot tunnel listing
//! fritz-vpn watch       # poll and report state changes
//! fritz-vpn on <name>   # activate a tunnel, verified
//! ```

pub mod config;
pub mod coordinator;
pub mod fritz;
pub mod notify;

pub use config::Config;
pub use coordinator::{Notifier, TunnelSource, UpdateError, VpnCoordinator};
pub use fritz::session::{FritzSession, Protocol, SessionError};
pub use fritz::tunnel::{Tunnel, TunnelMap};
