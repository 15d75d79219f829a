// esp.rs

use std::{
    collections::VecDeque,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    time::Instant,
};

use embedded_svc::mqtt::client::QoS;
use embedded_svc::wifi::{ClientConfiguration, Configuration};
use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pull};
use esp_idf_svc::{
    ipv4,
    mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration},
    netif::{self, EspNetif},
    ping,
    wifi::EspWifi,
};
use one_wire_bus::{Address, OneWire, SearchState};

use crate::*;

const MQTT_CONNECT_WAIT: std::time::Duration = std::time::Duration::from_secs(3);
const MQTT_KEEPALIVE: std::time::Duration = std::time::Duration::from_secs(25);

/// Millisecond clock since boot.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        FreeRtos::delay_ms(ms.min(u32::MAX as u64) as u32);
    }
}

/// Show the reason, give the user time to read it, then reboot.
pub fn restart_with_reason<D: StatusDisplay>(display: &mut D, reason: &'static str, delay_ms: u32) -> ! {
    error!("Restarting. Reason: {reason}");
    display.show_error(Fault::Restart(reason));
    FreeRtos::delay_ms(delay_ms);
    esp_idf_hal::reset::restart();
}

pub struct EspLink {
    wifi: EspWifi<'static>,
    mac: [u8; 6],
}

impl EspLink {
    pub fn new(wifi: EspWifi<'static>) -> anyhow::Result<Self> {
        let mac = wifi.sta_netif().get_mac()?;
        Ok(EspLink { wifi, mac })
    }

    fn gateway(&self) -> anyhow::Result<(u32, std::net::Ipv4Addr)> {
        let netif = self.wifi.sta_netif();
        let ip_info = netif.get_ip_info()?;
        Ok((netif.get_index(), ip_info.subnet.gateway))
    }
}

impl LinkDriver for EspLink {
    fn set_static(&mut self, addr: &StaticAddress) -> anyhow::Result<()> {
        let ipv4_config = ipv4::ClientConfiguration::Fixed(ipv4::ClientSettings {
            ip: addr.addr,
            subnet: ipv4::Subnet {
                gateway: addr.gw,
                mask: ipv4::Mask(addr.mask),
            },
            dns: None,
            secondary_dns: None,
        });
        let net_if = EspNetif::new_with_conf(&netif::NetifConfiguration {
            ip_configuration: ipv4::Configuration::Client(ipv4_config),
            ..netif::NetifConfiguration::wifi_default_client()
        })?;
        self.wifi.swap_netif_sta(net_if)?;
        info!("Static IP {} requested.", addr.addr);
        Ok(())
    }

    fn begin(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        info!("WiFi setting credentials...");
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("ssid too long"))?,
                password: credentials
                    .pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("password too long"))?,
                ..Default::default()
            }))?;

        info!("WiFi driver starting...");
        self.wifi.start()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_up(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi disconnect: {e:?}");
        }
    }

    fn reconnect(&mut self) {
        if let Err(e) = self.wifi.connect() {
            warn!("WiFi connect: {e:?}");
        }
    }

    fn mac(&self) -> [u8; 6] {
        self.mac
    }

    fn probe(&mut self) -> bool {
        let (if_idx, gw) = match self.gateway() {
            Ok(g) => g,
            Err(e) => {
                error!("No gateway to ping: {e:#}");
                return false;
            }
        };
        let conf = ping::Configuration {
            count: 3,
            interval: std::time::Duration::from_secs(1),
            timeout: std::time::Duration::from_secs(1),
            data_size: 64,
            tos: 0,
        };
        info!("Starting ping {gw} (if_idx {if_idx})");
        match ping::EspPing::new(if_idx).ping(gw, &conf) {
            Ok(res) => {
                info!("Pinger result: {res:?}");
                res.received > 0
            }
            Err(e) => {
                error!("Ping failed: {e:?}");
                false
            }
        }
    }
}

enum BrokerMsg {
    Connected,
    Disconnected,
    Error(String),
    Received(Inbound),
}

/// esp-mqtt client driven from the main loop. Its callback runs on the
/// esp-mqtt task and only forwards events through a channel.
pub struct EspBroker {
    url: String,
    client: Option<EspMqttClient<'static>>,
    events: Option<Receiver<BrokerMsg>>,
    connected: bool,
    inbox: VecDeque<Inbound>,
}

impl EspBroker {
    pub fn new(url: &str) -> Self {
        EspBroker {
            url: url.to_string(),
            client: None,
            events: None,
            connected: false,
            inbox: VecDeque::new(),
        }
    }

    fn handle(&mut self, msg: BrokerMsg) {
        match msg {
            BrokerMsg::Connected => self.connected = true,
            BrokerMsg::Disconnected => self.connected = false,
            BrokerMsg::Error(e) => warn!("MQTT event error: {e}"),
            BrokerMsg::Received(m) => self.inbox.push_back(m),
        }
    }

    fn drain(&mut self) {
        while let Some(msg) = self.events.as_ref().and_then(|rx| rx.try_recv().ok()) {
            self.handle(msg);
        }
    }
}

impl BrokerTransport for EspBroker {
    fn connect(&mut self, client_id: &str) -> Result<(), ConnectError> {
        self.disconnect();

        let (tx, rx) = mpsc::channel();
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            keep_alive_interval: Some(MQTT_KEEPALIVE),
            ..Default::default()
        };
        let client = EspMqttClient::new_cb(&self.url, &conf, move |event| {
            let msg = match event.payload() {
                EventPayload::Connected(_) => BrokerMsg::Connected,
                EventPayload::Disconnected => BrokerMsg::Disconnected,
                EventPayload::Error(e) => BrokerMsg::Error(format!("{e:?}")),
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    ..
                } => BrokerMsg::Received(Inbound {
                    topic: topic.to_string(),
                    payload: data.to_vec(),
                }),
                _ => return,
            };
            let _ = tx.send(msg);
        })
        .map_err(|e| {
            error!("MQTT client init failed: {e:?}");
            ConnectError::ConnectFailed
        })?;
        self.client = Some(client);

        // bounded wait for the CONNACK
        let deadline = Instant::now() + MQTT_CONNECT_WAIT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(BrokerMsg::Connected) => {
                    self.connected = true;
                    self.events = Some(rx);
                    return Ok(());
                }
                Ok(BrokerMsg::Received(m)) => self.inbox.push_back(m),
                Ok(BrokerMsg::Disconnected) => {
                    self.client = None;
                    return Err(ConnectError::ConnectFailed);
                }
                Ok(BrokerMsg::Error(e)) => {
                    warn!("MQTT connect error: {e}");
                    self.client = None;
                    return Err(ConnectError::ConnectFailed);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.client = None;
                    return Err(ConnectError::ConnectionTimeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.client = None;
                    return Err(ConnectError::ConnectionLost);
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.events = None;
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.drain();
        self.connected && self.client.is_some()
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        let Some(client) = self.client.as_mut() else {
            anyhow::bail!("no client");
        };
        client.subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let Some(client) = self.client.as_mut() else {
            anyhow::bail!("no client");
        };
        client.publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    fn poll(&mut self) -> VecDeque<Inbound> {
        self.drain();
        std::mem::take(&mut self.inbox)
    }
}

/// Single DS18B20 on a 1-wire bus. Failed reads report the Dallas
/// "disconnected" value so validation rejects them.
pub struct Ds18b20Probe {
    bus: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    delay: Ets,
}

impl Ds18b20Probe {
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin_drv = PinDriver::input_output_od(pin)?;
        pin_drv.set_pull(Pull::Up)?;
        let bus = OneWire::new(pin_drv).map_err(|e| anyhow::anyhow!("1-wire init: {e:?}"))?;
        Ok(Ds18b20Probe {
            bus,
            address: None,
            delay: Ets,
        })
    }

    fn scan(&mut self) -> Option<Address> {
        let mut found = None;
        let mut count = 0u32;
        let mut st: SearchState;
        let mut state = None;

        loop {
            match self.bus.device_search(state, false, &mut self.delay) {
                Ok(None) => break,
                Ok(Some((a, s))) => {
                    count += 1;
                    if found.is_none() && a.family_code() == ds18b20::FAMILY_CODE {
                        found = Some(a);
                    }
                    st = s;
                    state = Some(&st);
                }
                Err(e) => {
                    warn!("1-wire scan error: {e:?}");
                    break;
                }
            }
        }
        info!("1-wire devices: {count}, probe {found:?}");
        found
    }
}

impl SensorDriver for Ds18b20Probe {
    fn is_present(&mut self) -> bool {
        self.address = self.scan();
        self.address.is_some()
    }

    fn read(&mut self) -> RawSample {
        let missing = RawSample {
            temperature: DS18B20_DISCONNECTED,
            humidity: None,
        };
        let Some(address) = self.address.or_else(|| self.scan()) else {
            return missing;
        };
        self.address = Some(address);

        let sensor = match ds18b20::Ds18b20::new::<esp_idf_sys::EspError>(address) {
            Ok(s) => s,
            Err(e) => {
                warn!("Bad DS18B20 address {address:?}: {e:?}");
                self.address = None;
                return missing;
            }
        };
        if let Err(e) = ds18b20::start_simultaneous_temp_measurement(&mut self.bus, &mut self.delay) {
            warn!("DS18B20 conversion: {e:?}");
            self.address = None;
            return missing;
        }
        ds18b20::Resolution::Bits12.delay_for_measurement_time(&mut FreeRtos);

        match sensor.read_data(&mut self.bus, &mut self.delay) {
            Ok(data) => RawSample {
                temperature: data.temperature,
                humidity: None,
            },
            Err(e) => {
                warn!("DS18B20 read: {e:?}");
                self.address = None;
                missing
            }
        }
    }
}

/// DHT22 temperature/humidity sensor on a single open-drain pin.
#[cfg(feature = "dht")]
pub struct DhtProbe {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

#[cfg(feature = "dht")]
impl DhtProbe {
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(DhtProbe { pin, delay: Ets })
    }
}

#[cfg(feature = "dht")]
impl SensorDriver for DhtProbe {
    fn is_present(&mut self) -> bool {
        // the sensor needs about a second after power-up
        FreeRtos::delay_ms(1500);
        !self.read().temperature.is_nan()
    }

    fn read(&mut self) -> RawSample {
        if let Err(e) = self.pin.set_high() {
            warn!("DHT line high: {e:?}");
        }
        match dht_sensor::dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(r) => RawSample {
                temperature: r.temperature,
                humidity: Some(r.relative_humidity),
            },
            Err(e) => {
                warn!("DHT read: {e:?}");
                RawSample {
                    temperature: f32::NAN,
                    humidity: Some(f32::NAN),
                }
            }
        }
    }
}

// EOF
