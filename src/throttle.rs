// throttle.rs

use crate::*;

/// JSON document sent on the reading topic.
#[derive(Clone, Debug, Serialize)]
pub struct ReadingPayload<'a> {
    pub mac: &'a str,
    pub temperatura: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humedad: Option<f32>,
}

impl ReadingPayload<'_> {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Last values that actually went out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LastPublished {
    pub temperature: f32,
    pub humidity: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Within the hysteresis band of the last published value.
    Unchanged,
    Published,
    /// Publish attempted and failed; the value stays eligible.
    Failed,
}

pub struct Throttle {
    threshold: i32,
    last: Option<LastPublished>,
}

impl Throttle {
    /// `threshold` in measurement units; 0 publishes on any change of the
    /// rounded value.
    pub fn new(threshold: f32) -> Self {
        // readings are whole tenths, so round up to the next reachable step
        let steps = (threshold.abs() * 10.0 - 1e-3).ceil().max(0.0) as i32;
        Throttle {
            threshold: steps,
            last: None,
        }
    }

    pub fn last_published(&self) -> Option<LastPublished> {
        self.last
    }

    /// Make the next valid reading eligible whatever its value.
    pub fn force_republish(&mut self) {
        if self.last.take().is_some() {
            info!("Next reading will be republished.");
        }
    }

    pub fn is_eligible(&self, reading: &Reading) -> bool {
        let Some(last) = self.last else {
            return true;
        };
        self.moved(last.temperature, reading.temperature)
            || match (last.humidity, reading.humidity) {
                (Some(a), Some(b)) => self.moved(a, b),
                (None, None) => false,
                _ => true,
            }
    }

    fn moved(&self, from: f32, to: f32) -> bool {
        let delta = (tenths(to) - tenths(from)).abs();
        if self.threshold == 0 {
            delta != 0
        } else {
            delta >= self.threshold
        }
    }

    /// Publish `reading` through `publish` when it moved enough. The last
    /// published value only changes when `publish` reports success.
    pub fn consider<F>(&mut self, reading: &Reading, identity: &DeviceIdentity, publish: F) -> Decision
    where
        F: FnOnce(&str) -> Result<(), PublishError>,
    {
        if !self.is_eligible(reading) {
            info!("Temperature unchanged, not publishing.");
            return Decision::Unchanged;
        }

        let mac = identity.mac_colon();
        let payload = ReadingPayload {
            mac: &mac,
            temperatura: reading.temperature,
            humedad: reading.humidity,
        };
        let json = match payload.to_json() {
            Ok(j) => j,
            Err(e) => {
                error!("Cannot encode reading: {e}");
                return Decision::Failed;
            }
        };

        match publish(&json) {
            Ok(()) => {
                info!("JSON published: {json}");
                self.last = Some(LastPublished {
                    temperature: reading.temperature,
                    humidity: reading.humidity,
                });
                Decision::Published
            }
            Err(e) => {
                warn!("Reading not published: {e}");
                Decision::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::tests::MAC;

    fn reading(t: f32) -> Reading {
        Reading {
            temperature: t,
            humidity: None,
            timestamp_ms: 0,
        }
    }

    fn send(t: &mut Throttle, r: Reading, sent: &mut Vec<String>) -> Decision {
        t.consider(&r, &DeviceIdentity::from_mac(MAC), |json| {
            sent.push(json.to_string());
            Ok(())
        })
    }

    #[test]
    fn hysteresis_scenario() {
        let mut t = Throttle::new(0.2);
        let mut sent = Vec::new();

        assert_eq!(send(&mut t, reading(round1(21.43)), &mut sent), Decision::Published);
        assert_eq!(sent, vec![r#"{"mac":"24:6F:28:AB:CD:EF","temperatura":21.4}"#]);
        assert_eq!(t.last_published().unwrap().temperature, 21.4);

        assert_eq!(send(&mut t, reading(21.5), &mut sent), Decision::Unchanged);
        assert_eq!(t.last_published().unwrap().temperature, 21.4);

        assert_eq!(send(&mut t, reading(21.7), &mut sent), Decision::Published);
        assert_eq!(t.last_published().unwrap().temperature, 21.7);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn exact_threshold_is_eligible() {
        let mut t = Throttle::new(0.2);
        let mut sent = Vec::new();
        send(&mut t, reading(21.4), &mut sent);
        // 21.6 - 21.4 is not exactly 0.2 in binary floating point
        assert_eq!(send(&mut t, reading(21.6), &mut sent), Decision::Published);
        assert_eq!(send(&mut t, reading(21.4), &mut sent), Decision::Published);
    }

    #[test]
    fn fractional_threshold_rounds_up() {
        let mut t = Throttle::new(0.12);
        let mut sent = Vec::new();
        assert_eq!(send(&mut t, reading(20.0), &mut sent), Decision::Published);
        assert_eq!(send(&mut t, reading(20.1), &mut sent), Decision::Unchanged);
        assert_eq!(send(&mut t, reading(20.2), &mut sent), Decision::Published);

        let mut t = Throttle::new(0.25);
        send(&mut t, reading(20.0), &mut sent);
        assert_eq!(send(&mut t, reading(20.2), &mut sent), Decision::Unchanged);
        assert_eq!(send(&mut t, reading(19.7), &mut sent), Decision::Published);
    }

    #[test]
    fn zero_threshold_means_any_change() {
        let mut t = Throttle::new(0.0);
        let mut sent = Vec::new();
        assert_eq!(send(&mut t, reading(20.0), &mut sent), Decision::Published);
        assert_eq!(send(&mut t, reading(20.0), &mut sent), Decision::Unchanged);
        assert_eq!(send(&mut t, reading(20.1), &mut sent), Decision::Published);
    }

    #[test]
    fn failed_publish_keeps_value_eligible() {
        let mut t = Throttle::new(0.2);
        let id = DeviceIdentity::from_mac(MAC);
        let r = reading(22.0);

        let d = t.consider(&r, &id, |_| Err(PublishError::NotConnected));
        assert_eq!(d, Decision::Failed);
        assert!(t.last_published().is_none());
        assert!(t.is_eligible(&r));

        assert_eq!(t.consider(&r, &id, |_| Ok(())), Decision::Published);
        assert_eq!(t.consider(&r, &id, |_| Err(PublishError::Rejected)), Decision::Unchanged);
        assert_eq!(t.last_published().unwrap().temperature, 22.0);
    }

    #[test]
    fn forced_republish_sends_identical_value() {
        let mut t = Throttle::new(0.2);
        let mut sent = Vec::new();
        send(&mut t, reading(21.7), &mut sent);
        t.force_republish();
        assert!(t.last_published().is_none());
        assert_eq!(send(&mut t, reading(21.7), &mut sent), Decision::Published);
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn humidity_change_alone_is_enough() {
        let mut t = Throttle::new(0.2);
        let mut sent = Vec::new();
        let mut r = reading(21.4);
        r.humidity = Some(55.2);
        send(&mut t, r, &mut sent);
        assert_eq!(
            sent[0],
            r#"{"mac":"24:6F:28:AB:CD:EF","temperatura":21.4,"humedad":55.2}"#
        );

        r.humidity = Some(55.3);
        assert_eq!(send(&mut t, r, &mut sent), Decision::Unchanged);
        r.humidity = Some(56.0);
        assert_eq!(send(&mut t, r, &mut sent), Decision::Published);
    }
}

// EOF
