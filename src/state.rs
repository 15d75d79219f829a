// state.rs

use std::fmt;

use crate::*;

/// Longest client identifier every MQTT 3.1 broker must accept.
pub const MAX_CLIENT_ID_LEN: usize = 23;

pub type ClientId = heapless::String<MAX_CLIENT_ID_LEN>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Attached,
    /// Was attached, a drop was detected and a reconnect has been issued.
    Degraded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Stable per-device identity taken from the station MAC address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    mac: [u8; 6],
}

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        DeviceIdentity { mac }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// `AA:BB:CC:DD:EE:FF`, as sent in the `mac` payload field.
    pub fn mac_colon(&self) -> String {
        let m = self.mac;
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5],
        )
    }

    /// `AABBCCDDEEFF`, as used in topics and the client identifier.
    pub fn mac_stripped(&self) -> String {
        self.mac.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// `<prefix>-<mac>` capped at [`MAX_CLIENT_ID_LEN`].
    ///
    /// The prefix is shortened when needed so the unique MAC part always
    /// survives; the result only depends on the inputs.
    pub fn client_id(&self, prefix: &str) -> ClientId {
        let mac = self.mac_stripped();
        let room = MAX_CLIENT_ID_LEN - mac.len() - 1;
        let prefix: String = prefix.chars().filter(char::is_ascii).take(room).collect();

        let mut id = ClientId::new();
        if !prefix.is_empty() {
            let _ = id.push_str(&prefix);
            let _ = id.push('-');
        }
        let _ = id.push_str(&mac);
        id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mac_colon())
    }
}

/// Every topic string a device uses, built once from its identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub reading: String,
    pub config_request: String,
    pub config_response: String,
    pub config_update: String,
}

impl Topics {
    pub fn new(base: &str, identity: &DeviceIdentity) -> Self {
        let root = format!("{}/{}", base.trim_end_matches('/'), identity.mac_stripped());
        Topics {
            reading: format!("{root}/Temperatura"),
            config_request: format!("{root}/config/request"),
            config_response: format!("{root}/config/response"),
            config_update: format!("{root}/config/update"),
        }
    }

    /// Topics the device subscribes to when the configuration channel is on.
    pub fn inbound(&self) -> [&str; 2] {
        [&self.config_response, &self.config_update]
    }
}

/// Display-oriented snapshot of the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub link: LinkState,
    pub session: SessionState,
    pub sensor_ok: bool,
    pub offline: bool,
    pub uptime_s: u64,
}


// EOF
