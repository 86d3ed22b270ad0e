//! VPN tunnel data model and data.lua response parsing
//!
//! The FritzBox reports its WireGuard connections inside a deeply nested
//! JSON structure at `data.init.boxConnections`, keyed by a router-assigned
//! connection key. That key is stable across polls and is the join key
//! callers use to diff successive snapshots.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Snapshot of one configured VPN tunnel.
///
/// `active` is the administrative flag (tunnel enabled on the box),
/// `connected` reports whether the peer is actually established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunnel {
    /// Router-assigned connection key, stable across polls
    pub key: String,
    /// Internal identifier used for write requests
    pub uid: String,
    /// Display name configured on the box
    pub name: String,
    pub active: bool,
    pub connected: bool,
}

/// One full refresh cycle worth of tunnels, keyed by connection key.
pub type TunnelMap = HashMap<String, Tunnel>;

// Shape of a single boxConnections entry. Flags default to false because
// the box omits them for freshly created connections.
#[derive(Debug, Deserialize)]
struct TunnelEntry {
    name: String,
    uid: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    connected: bool,
}

impl Tunnel {
    /// Human-readable status combining the administrative and link flags.
    pub fn status(&self) -> &'static str {
        match (self.active, self.connected) {
            (true, true) => "connected",
            (true, false) => "active_not_connected",
            (false, _) => "inactive",
        }
    }
}

/// Extract the tunnel map from a data.lua response body.
///
/// Returns `None` when `data.init.boxConnections` is absent or not an
/// object — the caller treats that as "no tunnels" (the usual cause is an
/// expired session, where the box answers with a login stub instead).
/// Entries that fail to deserialize are skipped with a warning so one
/// malformed connection cannot hide the rest.
pub fn parse_box_connections(body: &Value) -> Option<TunnelMap> {
    let connections = body.pointer("/data/init/boxConnections")?.as_object()?;

    let mut tunnels = TunnelMap::with_capacity(connections.len());
    for (key, value) in connections {
        match serde_json::from_value::<TunnelEntry>(value.clone()) {
            Ok(entry) => {
                tunnels.insert(
                    key.clone(),
                    Tunnel {
                        key: key.clone(),
                        uid: entry.uid,
                        name: entry.name,
                        active: entry.active,
                        connected: entry.connected,
                    },
                );
            }
            Err(err) => {
                warn!("Skipping malformed connection entry '{}': {}", key, err);
            }
        }
    }

    Some(tunnels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_body() -> Value {
        json!({
            "pid": "shareWireguard",
            "data": {
                "init": {
                    "boxConnections": {
                        "con0": {
                            "name": "Homeoffice",
                            "uid": "landevice1000",
                            "active": true,
                            "connected": true,
                            "remoteIp": "203.0.113.7"
                        },
                        "con1": {
                            "name": "Phone",
                            "uid": "landevice1001",
                            "active": false,
                            "connected": false
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_box_connections() {
        let tunnels = parse_box_connections(&sample_body()).unwrap();
        assert_eq!(tunnels.len(), 2);

        let home = &tunnels["con0"];
        assert_eq!(home.key, "con0");
        assert_eq!(home.uid, "landevice1000");
        assert_eq!(home.name, "Homeoffice");
        assert!(home.active);
        assert!(home.connected);

        let phone = &tunnels["con1"];
        assert!(!phone.active);
        assert!(!phone.connected);
    }

    #[test]
    fn test_missing_path_is_none() {
        assert!(parse_box_connections(&json!({"pid": "logout"})).is_none());
        assert!(parse_box_connections(&json!({"data": {"init": {}}})).is_none());
        assert!(parse_box_connections(&json!({"data": {"init": {"boxConnections": 42}}})).is_none());
    }

    #[test]
    fn test_missing_flags_default_to_false() {
        let body = json!({
            "data": {"init": {"boxConnections": {
                "con9": {"name": "Fresh", "uid": "landevice1"}
            }}}
        });
        let tunnels = parse_box_connections(&body).unwrap();
        assert!(!tunnels["con9"].active);
        assert!(!tunnels["con9"].connected);
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let body = json!({
            "data": {"init": {"boxConnections": {
                "good": {"name": "Ok", "uid": "landevice1", "active": true},
                "bad": {"uid": "landevice2"}
            }}}
        });
        let tunnels = parse_box_connections(&body).unwrap();
        assert_eq!(tunnels.len(), 1);
        assert!(tunnels.contains_key("good"));
    }

    #[test]
    fn test_status_text() {
        let mut t = Tunnel {
            key: "con0".into(),
            uid: "landevice1".into(),
            name: "X".into(),
            active: true,
            connected: true,
        };
        assert_eq!(t.status(), "connected");
        t.connected = false;
        assert_eq!(t.status(), "active_not_connected");
        t.active = false;
        assert_eq!(t.status(), "inactive");
    }
}
