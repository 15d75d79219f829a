// mqtt.rs

use std::collections::VecDeque;

use crate::*;

/// Broker connect failure, numbered like the classic Arduino MQTT client
/// states: negative codes are transport level, positive ones are CONNACK
/// return codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("connection timeout")]
    ConnectionTimeout,
    #[error("connection lost")]
    ConnectionLost,
    #[error("connect failed")]
    ConnectFailed,
    #[error("disconnected")]
    Disconnected,
    #[error("bad protocol version")]
    BadProtocol,
    #[error("client id rejected")]
    BadClientId,
    #[error("server unavailable")]
    Unavailable,
    #[error("bad credentials")]
    BadCredentials,
    #[error("not authorized")]
    Unauthorized,
    #[error("unknown error {0}")]
    Unknown(i32),
}

impl ConnectError {
    pub fn code(self) -> i32 {
        match self {
            ConnectError::ConnectionTimeout => -4,
            ConnectError::ConnectionLost => -3,
            ConnectError::ConnectFailed => -2,
            ConnectError::Disconnected => -1,
            ConnectError::BadProtocol => 1,
            ConnectError::BadClientId => 2,
            ConnectError::Unavailable => 3,
            ConnectError::BadCredentials => 4,
            ConnectError::Unauthorized => 5,
            ConnectError::Unknown(c) => c,
        }
    }

    /// `None` for 0, which means "connected".
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => return None,
            -4 => ConnectError::ConnectionTimeout,
            -3 => ConnectError::ConnectionLost,
            -2 => ConnectError::ConnectFailed,
            -1 => ConnectError::Disconnected,
            1 => ConnectError::BadProtocol,
            2 => ConnectError::BadClientId,
            3 => ConnectError::Unavailable,
            4 => ConnectError::BadCredentials,
            5 => ConnectError::Unauthorized,
            c => ConnectError::Unknown(c),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("no broker session")]
    NotConnected,
    #[error("publish rejected by transport")]
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Client side of the broker connection.
///
/// Every call must return promptly; `connect` is a single bounded attempt.
pub trait BrokerTransport {
    fn connect(&mut self, client_id: &str) -> Result<(), ConnectError>;
    fn disconnect(&mut self);
    fn is_connected(&mut self) -> bool;
    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
    /// Messages received since the last call, oldest first.
    fn poll(&mut self) -> VecDeque<Inbound>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    ConnectFailed(ConnectError),
    Lost,
    Message(Inbound),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub topic_base: String,
    pub client_prefix: String,
    pub cooldown_ms: u64,
    pub subscribe_config: bool,
    pub request_config: bool,
}

impl From<&NodeConfig> for SessionConfig {
    fn from(c: &NodeConfig) -> Self {
        SessionConfig {
            topic_base: c.topic_base.clone(),
            client_prefix: c.client_prefix.clone(),
            cooldown_ms: c.reconnect_cooldown_ms,
            subscribe_config: c.remote_config,
            request_config: c.remote_config && c.request_config_on_connect,
        }
    }
}

struct Binding {
    identity: DeviceIdentity,
    client_id: ClientId,
    topics: Topics,
}

pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    cooldown: Interval,
    binding: Option<Binding>,
    last_error: Option<ConnectError>,
}

impl<T: BrokerTransport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Session {
            transport,
            cooldown: Interval::immediate(config.cooldown_ms),
            config,
            state: SessionState::Disconnected,
            binding: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<ConnectError> {
        self.last_error
    }

    /// Topics, available once an identity has been bound.
    pub fn topics(&self) -> Option<&Topics> {
        self.binding.as_ref().map(|b| &b.topics)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.client_id.as_str())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Derive the client id and topics. Nothing is sent before this.
    pub fn bind(&mut self, identity: DeviceIdentity) {
        if self.binding.as_ref().is_some_and(|b| b.identity == identity) {
            return;
        }
        let client_id = identity.client_id(&self.config.client_prefix);
        let topics = Topics::new(&self.config.topic_base, &identity);
        info!("MQTT client id {client_id}");
        info!("MQTT topics: {topics:?}");
        self.binding = Some(Binding {
            identity,
            client_id,
            topics,
        });
    }

    pub fn tick(&mut self, now_ms: u64, link: LinkState) -> Vec<SessionEvent> {
        if link != LinkState::Attached {
            if self.state == SessionState::Connected {
                warn!("MQTT session dropped with the link.");
                self.transport.disconnect();
                self.state = SessionState::Disconnected;
                return vec![SessionEvent::Lost];
            }
            return Vec::new();
        }

        if self.state == SessionState::Connected {
            if self.transport.is_connected() {
                return self
                    .transport
                    .poll()
                    .into_iter()
                    .map(SessionEvent::Message)
                    .collect();
            }
            warn!("MQTT connection closed.");
            self.transport.disconnect();
            self.state = SessionState::Disconnected;
            return vec![SessionEvent::Lost];
        }

        let Some(binding) = self.binding.as_ref() else {
            return Vec::new();
        };
        if !self.cooldown.poll(now_ms) {
            return Vec::new();
        }

        info!("MQTT connecting as {}...", binding.client_id);
        self.state = SessionState::Connecting;
        match self.transport.connect(&binding.client_id) {
            Ok(()) => {
                info!("MQTT connected.");
                self.state = SessionState::Connected;
                self.last_error = None;
                self.after_connect();
                vec![SessionEvent::Connected]
            }
            Err(e) => {
                warn!("MQTT connect failed, code {}: {e}", e.code());
                self.state = SessionState::Disconnected;
                self.last_error = Some(e);
                vec![SessionEvent::ConnectFailed(e)]
            }
        }
    }

    fn after_connect(&mut self) {
        let Some(binding) = self.binding.as_ref() else {
            return;
        };
        if self.config.subscribe_config {
            for topic in binding.topics.inbound() {
                match self.transport.subscribe(topic) {
                    Ok(()) => info!("MQTT subscribed to {topic}"),
                    Err(e) => warn!("MQTT subscribe {topic} failed: {e:#}"),
                }
            }
        }
        if self.config.request_config {
            let topic = binding.topics.config_request.clone();
            let payload = config_request_payload(&binding.identity);
            if let Err(e) = self.publish(&topic, payload.as_bytes()) {
                warn!("MQTT config request failed: {e}");
            }
        }
    }

    /// One publish attempt, only while the session is up. Never retried here.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if self.state != SessionState::Connected {
            return Err(PublishError::NotConnected);
        }
        match self.transport.publish(topic, payload) {
            Ok(()) => {
                debug!("MQTT sent {topic}");
                Ok(())
            }
            Err(e) => {
                error!("MQTT send error: {e:#}");
                Err(PublishError::Rejected)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wifi::tests::MAC;

    #[derive(Default)]
    pub struct ScriptedBroker {
        pub connect_results: VecDeque<Result<(), ConnectError>>,
        pub connect_calls: Vec<String>,
        pub connected: bool,
        pub fail_publish: bool,
        pub published: Vec<(String, String)>,
        pub subscribed: Vec<String>,
        pub inbox: VecDeque<Inbound>,
        pub disconnects: u32,
    }

    impl BrokerTransport for ScriptedBroker {
        fn connect(&mut self, client_id: &str) -> Result<(), ConnectError> {
            self.connect_calls.push(client_id.to_string());
            let res = self.connect_results.pop_front().unwrap_or(Ok(()));
            self.connected = res.is_ok();
            res
        }
        fn disconnect(&mut self) {
            self.disconnects += 1;
            self.connected = false;
        }
        fn is_connected(&mut self) -> bool {
            self.connected
        }
        fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
            self.subscribed.push(topic.to_string());
            Ok(())
        }
        fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
            if self.fail_publish {
                anyhow::bail!("outbox full");
            }
            self.published
                .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
            Ok(())
        }
        fn poll(&mut self) -> VecDeque<Inbound> {
            std::mem::take(&mut self.inbox)
        }
    }

    fn config(remote: bool) -> SessionConfig {
        SessionConfig {
            topic_base: "ACS_Control".into(),
            client_prefix: "ESP32".into(),
            cooldown_ms: 5_000,
            subscribe_config: remote,
            request_config: remote,
        }
    }

    fn bound(broker: ScriptedBroker, remote: bool) -> Session<ScriptedBroker> {
        let mut s = Session::new(broker, config(remote));
        s.bind(DeviceIdentity::from_mac(MAC));
        s
    }

    #[test]
    fn error_codes_round_trip_through_table() {
        for code in [-4, -3, -2, -1, 1, 2, 3, 4, 5, 42] {
            assert_eq!(ConnectError::from_code(code).unwrap().code(), code);
        }
        assert_eq!(ConnectError::from_code(0), None);
        assert_eq!(ConnectError::from_code(4).unwrap().to_string(), "bad credentials");
    }

    #[test]
    fn no_connect_without_link_or_identity() {
        let mut s = Session::new(ScriptedBroker::default(), config(false));
        assert!(s.tick(0, LinkState::Attached).is_empty());
        s.bind(DeviceIdentity::from_mac(MAC));
        for link in [LinkState::Disconnected, LinkState::Connecting, LinkState::Degraded] {
            assert!(s.tick(0, link).is_empty());
        }
        assert!(s.transport().connect_calls.is_empty());
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn failed_connect_respects_cooldown() {
        let mut broker = ScriptedBroker::default();
        broker.connect_results.push_back(Err(ConnectError::Unavailable));
        let mut s = bound(broker, false);

        assert_eq!(
            s.tick(0, LinkState::Attached),
            vec![SessionEvent::ConnectFailed(ConnectError::Unavailable)]
        );
        assert_eq!(s.last_error(), Some(ConnectError::Unavailable));
        for now in (10..5_000).step_by(10) {
            assert!(s.tick(now, LinkState::Attached).is_empty());
        }
        assert_eq!(s.transport().connect_calls.len(), 1);

        assert_eq!(s.tick(5_000, LinkState::Attached), vec![SessionEvent::Connected]);
        assert_eq!(s.transport().connect_calls, vec!["ESP32-246F28ABCDEF"; 2]);
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn connect_subscribes_and_requests_config() {
        let mut s = bound(ScriptedBroker::default(), true);
        s.tick(0, LinkState::Attached);
        assert_eq!(
            s.transport().subscribed,
            vec![
                "ACS_Control/246F28ABCDEF/config/response",
                "ACS_Control/246F28ABCDEF/config/update"
            ]
        );
        assert_eq!(
            s.transport().published,
            vec![(
                "ACS_Control/246F28ABCDEF/config/request".to_string(),
                r#"{"mac":"24:6F:28:AB:CD:EF"}"#.to_string()
            )]
        );
    }

    #[test]
    fn plain_variant_does_not_subscribe() {
        let mut s = bound(ScriptedBroker::default(), false);
        s.tick(0, LinkState::Attached);
        assert!(s.transport().subscribed.is_empty());
        assert!(s.transport().published.is_empty());
    }

    #[test]
    fn connected_tick_pumps_inbound() {
        let mut s = bound(ScriptedBroker::default(), true);
        s.tick(0, LinkState::Attached);
        let msg = Inbound {
            topic: "ACS_Control/246F28ABCDEF/config/update".into(),
            payload: br#"{"temp_min":19}"#.to_vec(),
        };
        s.transport_mut().inbox.push_back(msg.clone());
        assert_eq!(s.tick(10, LinkState::Attached), vec![SessionEvent::Message(msg)]);
    }

    #[test]
    fn publish_only_while_connected() {
        let mut s = bound(ScriptedBroker::default(), false);
        assert_eq!(s.publish("t", b"x"), Err(PublishError::NotConnected));
        assert!(s.transport().published.is_empty());

        s.tick(0, LinkState::Attached);
        assert_eq!(s.publish("t", b"x"), Ok(()));

        s.transport_mut().fail_publish = true;
        assert_eq!(s.publish("t", b"y"), Err(PublishError::Rejected));
        assert_eq!(s.transport().published.len(), 1);
    }

    #[test]
    fn drop_is_detected_and_reported_once() {
        let mut s = bound(ScriptedBroker::default(), false);
        s.tick(0, LinkState::Attached);
        s.transport_mut().connected = false;
        let before = s.transport().disconnects;
        assert_eq!(s.tick(10, LinkState::Attached), vec![SessionEvent::Lost]);
        assert_eq!(s.state(), SessionState::Disconnected);
        // the stale client is torn down so only the cooldown retries
        assert_eq!(s.transport().disconnects, before + 1);
        assert_eq!(s.publish("t", b"x"), Err(PublishError::NotConnected));
        // cooldown since the last attempt at t=0 has not elapsed yet
        assert!(s.tick(20, LinkState::Attached).is_empty());
        assert_eq!(s.tick(5_000, LinkState::Attached), vec![SessionEvent::Connected]);
    }

    #[test]
    fn link_loss_ends_session() {
        let mut s = bound(ScriptedBroker::default(), false);
        s.tick(0, LinkState::Attached);
        assert_eq!(s.tick(10, LinkState::Degraded), vec![SessionEvent::Lost]);
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(!s.transport().connected);
    }
}

// EOF
