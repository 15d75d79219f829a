// config.rs

use std::{net, str::FromStr};

use crate::*;

const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ATTACH_POLL_MS: u64 = 500;
const DEFAULT_HEALTH_CHECK_MS: u64 = 300_000;
const DEFAULT_RECONNECT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_CHANGE_THRESHOLD: f32 = 0.2;
const DEFAULT_RESTART_DELAY_MS: u32 = 3_000;

/// What to do when the bounded initial attach runs out of time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachPolicy {
    /// Restart the device after the timeout.
    FailFast,
    /// Stay offline, retry from the health check only, and hold back
    /// sampling and messaging until the link comes up.
    #[default]
    DegradedContinue,
}

impl FromStr for AttachPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" | "fail-fast" | "failfast" => Ok(AttachPolicy::FailFast),
            "degraded" | "offline" | "degraded-continue" => Ok(AttachPolicy::DegradedContinue),
            other => anyhow::bail!("unknown attach policy {other:?}"),
        }
    }
}

/// Fixed IPv4 settings to request instead of DHCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddress {
    pub addr: net::Ipv4Addr,
    pub mask: u8,
    pub gw: net::Ipv4Addr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,

    pub v4dhcp: bool,
    pub v4addr: net::Ipv4Addr,
    pub v4mask: u8,
    pub v4gw: net::Ipv4Addr,

    pub attach_policy: AttachPolicy,
    pub attach_timeout_ms: u64,
    pub attach_poll_ms: u64,
    pub health_check_ms: u64,

    pub mqtt_url: String,
    pub topic_base: String,
    pub client_prefix: String,
    pub reconnect_cooldown_ms: u64,

    pub sample_interval_ms: u64,
    pub change_threshold: f32,

    pub remote_config: bool,
    pub request_config_on_connect: bool,

    pub restart_delay_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: option_env!("WIFI_SSID").unwrap_or("internet").into(),
            wifi_pass: option_env!("WIFI_PASS").unwrap_or("password").into(),

            v4dhcp: true,
            v4addr: net::Ipv4Addr::new(0, 0, 0, 0),
            v4mask: 0,
            v4gw: net::Ipv4Addr::new(0, 0, 0, 0),

            attach_policy: env_or_default("ATTACH_POLICY", option_env!("ATTACH_POLICY")),
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
            attach_poll_ms: DEFAULT_ATTACH_POLL_MS,
            health_check_ms: DEFAULT_HEALTH_CHECK_MS,

            mqtt_url: option_env!("MQTT_URL")
                .unwrap_or("mqtt://mqtt.local:1883")
                .into(),
            topic_base: option_env!("MQTT_TOPIC").unwrap_or("ACS_Control").into(),
            client_prefix: "ESP32".into(),
            reconnect_cooldown_ms: DEFAULT_RECONNECT_COOLDOWN_MS,

            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            change_threshold: option_env!("CHANGE_THRESHOLD")
                .unwrap_or("-")
                .parse()
                .unwrap_or(DEFAULT_CHANGE_THRESHOLD),

            remote_config: option_env!("REMOTE_CONFIG")
                .unwrap_or("-")
                .parse()
                .unwrap_or(false),
            request_config_on_connect: true,

            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

fn env_or_default<T>(name: &str, value: Option<&str>) -> T
where
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    match value.map(str::parse::<T>) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            warn!("{name}: {e}, using default");
            T::default()
        }
        None => T::default(),
    }
}

impl NodeConfig {
    /// Static addressing request, `None` when DHCP is configured.
    pub fn static_address(&self) -> Option<StaticAddress> {
        if self.v4dhcp {
            None
        } else {
            Some(StaticAddress {
                addr: self.v4addr,
                mask: self.v4mask,
                gw: self.v4gw,
            })
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            ssid: self.wifi_ssid.clone(),
            pass: self.wifi_pass.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_policy_parsing() {
        assert_eq!("restart".parse::<AttachPolicy>().unwrap(), AttachPolicy::FailFast);
        assert_eq!(" Fail-Fast ".parse::<AttachPolicy>().unwrap(), AttachPolicy::FailFast);
        assert_eq!(
            "offline".parse::<AttachPolicy>().unwrap(),
            AttachPolicy::DegradedContinue
        );
        assert!("sometimes".parse::<AttachPolicy>().is_err());
    }

    #[test]
    fn bad_policy_falls_back_to_default() {
        let p: AttachPolicy = env_or_default("ATTACH_POLICY", Some("nope"));
        assert_eq!(p, AttachPolicy::DegradedContinue);
        let p: AttachPolicy = env_or_default("ATTACH_POLICY", None);
        assert_eq!(p, AttachPolicy::DegradedContinue);
    }

    #[test]
    fn static_address_only_without_dhcp() {
        let mut c = NodeConfig::default();
        assert!(c.static_address().is_none());
        c.v4dhcp = false;
        c.v4addr = net::Ipv4Addr::new(192, 168, 3, 50);
        c.v4mask = 24;
        c.v4gw = net::Ipv4Addr::new(192, 168, 3, 1);
        let s = c.static_address().unwrap();
        assert_eq!(s.addr, net::Ipv4Addr::new(192, 168, 3, 50));
        assert_eq!(s.mask, 24);
    }
}

// EOF
