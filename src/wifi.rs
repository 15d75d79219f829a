// wifi.rs

use crate::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub pass: String,
}

/// Radio/IP driver underneath the attachment manager.
pub trait LinkDriver {
    /// Ask for fixed IPv4 settings. An error means the driver rejected them
    /// and stays on DHCP.
    fn set_static(&mut self, addr: &StaticAddress) -> anyhow::Result<()>;
    /// Start associating with the access point. Returns immediately.
    fn begin(&mut self, credentials: &Credentials) -> anyhow::Result<()>;
    /// Station associated and holding an address.
    fn is_up(&mut self) -> bool;
    fn disconnect(&mut self);
    /// Start a new association with the last credentials. Returns immediately.
    fn reconnect(&mut self);
    fn mac(&self) -> [u8; 6];
    /// End-to-end reachability check for links the driver still reports up.
    fn probe(&mut self) -> bool {
        true
    }
}

#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(DeviceIdentity),
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Restored(DeviceIdentity),
    Lost,
}

pub struct Network<D> {
    driver: D,
    state: LinkState,
    identity: Option<DeviceIdentity>,
    health: Interval,
}

impl<D: LinkDriver> Network<D> {
    pub fn new(driver: D, health_check_ms: u64) -> Self {
        Network {
            driver,
            state: LinkState::Disconnected,
            identity: None,
            health: Interval::starting_at(health_check_ms, 0),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Bounded initial attach: polls the driver every `poll_ms` until it
    /// reports the link up or `timeout_ms` has elapsed.
    pub fn attach<C, S>(
        &mut self,
        credentials: &Credentials,
        static_addr: Option<&StaticAddress>,
        timeout_ms: u64,
        poll_ms: u64,
        clock: &mut C,
        display: &mut S,
    ) -> AttachOutcome
    where
        C: Clock,
        S: StatusDisplay,
    {
        info!("WiFi connecting to {:?}...", credentials.ssid);
        self.state = LinkState::Connecting;

        if let Some(addr) = static_addr {
            if let Err(e) = self.driver.set_static(addr) {
                warn!("Static IP {} rejected ({e:#}), using DHCP", addr.addr);
            }
        }
        if let Err(e) = self.driver.begin(credentials) {
            error!("WiFi start failed: {e:#}");
        }

        let poll_ms = poll_ms.max(1);
        let max = timeout_ms.div_ceil(poll_ms).min(u32::MAX as u64) as u32;
        let start = clock.now_ms();
        let mut attempt = 0u32;

        loop {
            if self.driver.is_up() {
                let identity = self.on_attached(clock.now_ms());
                info!("WiFi connected after {attempt} polls.");
                return AttachOutcome::Attached(identity);
            }
            if clock.now_ms().saturating_sub(start) >= timeout_ms {
                error!("WiFi not connected after {timeout_ms} ms.");
                self.state = LinkState::Disconnected;
                self.health.reset(clock.now_ms());
                return AttachOutcome::TimedOut;
            }
            clock.sleep_ms(poll_ms);
            attempt = attempt.saturating_add(1);
            display.show_connecting(attempt.min(max), max);
        }
    }

    /// Periodic link supervision. Does nothing until the health-check
    /// interval has elapsed.
    pub fn health_check<S: StatusDisplay>(&mut self, now_ms: u64, display: &mut S) -> Option<LinkEvent> {
        if !self.health.poll(now_ms) {
            return None;
        }

        let up = self.driver.is_up() && (self.state != LinkState::Attached || self.driver.probe());
        match (up, self.state) {
            (true, LinkState::Attached) => None,
            (true, _) => {
                let identity = self.on_attached(now_ms);
                info!("WiFi link restored.");
                Some(LinkEvent::Restored(identity))
            }
            (false, prev) => {
                warn!("WiFi link down ({prev:?}), reconnecting...");
                self.state = match prev {
                    LinkState::Attached | LinkState::Degraded => LinkState::Degraded,
                    _ => LinkState::Connecting,
                };
                display.show_error(Fault::LinkLost);
                // a half-open link is only cleared by an explicit drop
                self.driver.disconnect();
                self.driver.reconnect();
                (prev == LinkState::Attached).then_some(LinkEvent::Lost)
            }
        }
    }

    fn on_attached(&mut self, now_ms: u64) -> DeviceIdentity {
        let identity = DeviceIdentity::from_mac(self.driver.mac());
        info!("WiFi attached, device {identity}");
        self.identity = Some(identity);
        self.state = LinkState::Attached;
        self.health.reset(now_ms);
        identity
    }
}


// EOF
