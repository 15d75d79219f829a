// display.rs

use crate::*;

/// Conditions rendered as an error banner on the local display.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("Sensor missing")]
    SensorMissing,
    #[error("Sensor error: {0}")]
    Sensor(SampleError),
    #[error("WiFi failed")]
    LinkTimeout,
    #[error("WiFi lost")]
    LinkLost,
    #[error("Offline mode")]
    Offline,
    #[error("MQTT: {0}")]
    Broker(ConnectError),
    #[error("Publish failed")]
    Publish,
    #[error("Bad config msg")]
    ConfigDecode,
    #[error("Restarting: {0}")]
    Restart(&'static str),
}

impl Fault {
    /// Short numeric code for displays too small for the banner text.
    pub fn code(&self) -> u8 {
        match self {
            Fault::SensorMissing => 10,
            Fault::Sensor(_) => 11,
            Fault::LinkTimeout => 20,
            Fault::LinkLost => 21,
            Fault::Offline => 22,
            Fault::Broker(_) => 30,
            Fault::Publish => 31,
            Fault::ConfigDecode => 40,
            Fault::Restart(_) => 90,
        }
    }
}

/// Render commands accepted by the local status display.
///
/// Nothing in the core depends on whether rendering worked.
pub trait StatusDisplay {
    fn show_connecting(&mut self, attempt: u32, max: u32);
    fn show_error(&mut self, fault: Fault);
    fn show_reading(&mut self, temperature: f32, humidity: Option<f32>);
    fn show_status(&mut self, status: StatusFlags);
}

/// Display that renders to the log, for boards without a screen.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show_connecting(&mut self, attempt: u32, max: u32) {
        info!("[display] WiFi {attempt}/{max}");
    }

    fn show_error(&mut self, fault: Fault) {
        error!("[display] E{:02} {fault}", fault.code());
    }

    fn show_reading(&mut self, temperature: f32, humidity: Option<f32>) {
        match humidity {
            Some(h) => info!("[display] {temperature:.1}C {h:.1}%"),
            None => info!("[display] {temperature:.1}C"),
        }
    }

    fn show_status(&mut self, status: StatusFlags) {
        info!(
            "[display] wifi={:?} mqtt={:?} sensor={} up={}s",
            status.link,
            status.session,
            if status.sensor_ok { "ok" } else { "err" },
            status.uptime_s
        );
    }
}


// EOF
