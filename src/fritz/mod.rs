/// FritzBox web interface protocol implementation
///
/// This module provides the authenticated session against the box
/// (challenge/response login, data fetch, tunnel toggle) and the tunnel
/// data model parsed out of data.lua responses.
pub mod session;
pub mod tunnel;

pub use session::{FritzSession, Protocol, SessionError};
pub use tunnel::{Tunnel, TunnelMap};
