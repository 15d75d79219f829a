// node.rs

use crate::*;

/// Conditions that stop the node before the loop starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("temperature sensor not detected")]
    SensorAbsent,
    #[error("WiFi attach timed out")]
    LinkTimeout,
}

impl BootError {
    /// Short text for the restart banner.
    pub fn reason(self) -> &'static str {
        match self {
            BootError::SensorAbsent => "Sensor fail",
            BootError::LinkTimeout => "WiFi fail",
        }
    }
}

/// The cooperative loop. Owns every manager; nothing else touches their
/// state, so no locking is needed as long as `tick` is only ever called
/// from one place.
pub struct Node<C, L, B, S, D> {
    config: NodeConfig,
    clock: C,
    display: D,
    network: Network<L>,
    session: Session<B>,
    sampler: Sampler<S>,
    throttle: Throttle,
    remote: RemoteConfig,
    offline: bool,
    sensor_ok: bool,
    boot_ms: u64,
    shown: Option<StatusFlags>,
}

impl<C, L, B, S, D> Node<C, L, B, S, D>
where
    C: Clock,
    L: LinkDriver,
    B: BrokerTransport,
    S: SensorDriver,
    D: StatusDisplay,
{
    pub fn new(
        config: NodeConfig,
        clock: C,
        link: L,
        broker: B,
        sensor: S,
        kind: SensorKind,
        display: D,
    ) -> Self {
        let boot_ms = clock.now_ms();
        Node {
            network: Network::new(link, config.health_check_ms),
            session: Session::new(broker, SessionConfig::from(&config)),
            sampler: Sampler::new(sensor, kind, config.sample_interval_ms),
            throttle: Throttle::new(config.change_threshold),
            remote: RemoteConfig::default(),
            offline: false,
            sensor_ok: true,
            boot_ms,
            shown: None,
            config,
            clock,
            display,
        }
    }

    /// Sensor check and bounded initial attach. The only blocking step.
    pub fn boot(&mut self) -> Result<(), BootError> {
        info!("termonode v{FW_VERSION} starting, policy {:?}", self.config.attach_policy);

        if !self.sampler.is_present() {
            error!("No {:?} sensor detected.", self.sampler.kind());
            self.sensor_ok = false;
            self.display.show_error(Fault::SensorMissing);
            return Err(BootError::SensorAbsent);
        }
        info!("Sensor {:?} OK.", self.sampler.kind());

        let credentials = self.config.credentials();
        let static_addr = self.config.static_address();
        let outcome = self.network.attach(
            &credentials,
            static_addr.as_ref(),
            self.config.attach_timeout_ms,
            self.config.attach_poll_ms,
            &mut self.clock,
            &mut self.display,
        );

        match outcome {
            AttachOutcome::Attached(identity) => {
                self.session.bind(identity);
            }
            AttachOutcome::TimedOut => {
                self.display.show_error(Fault::LinkTimeout);
                match self.config.attach_policy {
                    AttachPolicy::FailFast => return Err(BootError::LinkTimeout),
                    AttachPolicy::DegradedContinue => {
                        error!("WiFi not connected. Offline mode.");
                        self.offline = true;
                        self.display.show_error(Fault::Offline);
                    }
                }
            }
        }
        self.refresh_status();
        Ok(())
    }

    /// One pass of the loop: link, then session, then sampling.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        match self.network.health_check(now, &mut self.display) {
            Some(LinkEvent::Restored(identity)) => {
                self.session.bind(identity);
                if self.offline {
                    info!("Leaving offline mode.");
                    self.offline = false;
                }
            }
            Some(LinkEvent::Lost) => self.throttle.force_republish(),
            None => {}
        }

        if self.offline {
            self.refresh_status();
            return;
        }

        for event in self.session.tick(now, self.network.state()) {
            match event {
                SessionEvent::Connected => {}
                SessionEvent::ConnectFailed(e) => self.display.show_error(Fault::Broker(e)),
                SessionEvent::Lost => self.throttle.force_republish(),
                SessionEvent::Message(msg) => self.on_message(&msg),
            }
        }

        if let Some(result) = self.sampler.poll(now) {
            self.on_sample(result);
        }

        self.refresh_status();
    }

    /// External request to resend the next reading even if unchanged.
    pub fn force_refresh(&mut self) {
        info!("Forced refresh requested.");
        self.throttle.force_republish();
    }

    fn on_message(&mut self, msg: &Inbound) {
        if !self.config.remote_config {
            debug!("Ignoring message on {}", msg.topic);
            return;
        }
        let Some(topics) = self.session.topics() else {
            return;
        };
        match self.remote.handle(topics, msg) {
            Ok(_) => {}
            Err(ConfigError::Topic(t)) => debug!("Ignoring message on {t}"),
            Err(e) => {
                warn!("Config message dropped: {e}");
                self.display.show_error(Fault::ConfigDecode);
            }
        }
    }

    fn on_sample(&mut self, result: Result<Reading, SampleError>) {
        let reading = match result {
            Ok(r) => r,
            Err(e) => {
                self.sensor_ok = false;
                self.display.show_error(Fault::Sensor(e));
                self.throttle.force_republish();
                return;
            }
        };
        self.sensor_ok = true;
        self.display.show_reading(reading.temperature, reading.humidity);

        let (Some(identity), Some(topic)) = (
            self.network.identity(),
            self.session.topics().map(|t| t.reading.clone()),
        ) else {
            return;
        };
        let session = &mut self.session;
        let decision = self.throttle.consider(&reading, &identity, |json| {
            session.publish(&topic, json.as_bytes())
        });
        if decision == Decision::Failed && session.state() == SessionState::Connected {
            self.display.show_error(Fault::Publish);
        }
    }

    pub fn status(&self) -> StatusFlags {
        StatusFlags {
            link: self.network.state(),
            session: self.session.state(),
            sensor_ok: self.sensor_ok,
            offline: self.offline,
            uptime_s: self.clock.now_ms().saturating_sub(self.boot_ms) / 1000,
        }
    }

    fn refresh_status(&mut self) {
        let status = self.status();
        let key = StatusFlags { uptime_s: 0, ..status };
        if self.shown != Some(key) {
            self.shown = Some(key);
            self.display.show_status(status);
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn remote_config(&self) -> &RemoteConfig {
        &self.remote
    }

    pub fn last_published(&self) -> Option<LastPublished> {
        self.throttle.last_published()
    }

    pub fn network(&self) -> &Network<L> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network<L> {
        &mut self.network
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<B> {
        &mut self.session
    }

    pub fn sampler_mut(&mut self) -> &mut Sampler<S> {
        &mut self.sampler
    }

    pub fn display(&self) -> &D {
        &self.display
    }
}


// EOF
