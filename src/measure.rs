// measure.rs

use crate::*;

/// Value the Dallas driver reports for a probe that stopped answering.
pub const DS18B20_DISCONNECTED: f32 = -127.0;
pub const DS18B20_MIN: f32 = -50.0;
pub const DS18B20_MAX: f32 = 125.0;

/// One raw conversion as the driver produced it. NaN marks a failed read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawSample {
    pub temperature: f32,
    pub humidity: Option<f32>,
}

pub trait SensorDriver {
    /// Checked once at boot.
    fn is_present(&mut self) -> bool;
    /// One blocking read cycle.
    fn read(&mut self) -> RawSample;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    /// 1-wire digital probe.
    Ds18b20,
    /// Temperature + relative humidity.
    Dht,
    /// Anything else; only NaN is rejected.
    Generic,
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("not a number")]
    NotANumber,
    #[error("probe disconnected")]
    Disconnected,
    #[error("{0:.1}C out of range")]
    OutOfRange(f32),
    #[error("{0:.1}% out of range")]
    HumidityOutOfRange(f32),
}

impl SensorKind {
    pub fn validate(self, raw: RawSample) -> Result<RawSample, SampleError> {
        let t = raw.temperature;
        if t.is_nan() {
            return Err(SampleError::NotANumber);
        }
        match self {
            SensorKind::Ds18b20 => {
                if t == DS18B20_DISCONNECTED {
                    return Err(SampleError::Disconnected);
                }
                if !(DS18B20_MIN..DS18B20_MAX).contains(&t) {
                    return Err(SampleError::OutOfRange(t));
                }
            }
            SensorKind::Dht => match raw.humidity {
                None => return Err(SampleError::NotANumber),
                Some(h) if h.is_nan() => return Err(SampleError::NotANumber),
                Some(h) if !(0.0..=100.0).contains(&h) => {
                    return Err(SampleError::HumidityOutOfRange(h))
                }
                Some(_) => {}
            },
            SensorKind::Generic => {
                if raw.humidity.is_some_and(f32::is_nan) {
                    return Err(SampleError::NotANumber);
                }
            }
        }
        Ok(raw)
    }
}

/// A validated sample, already rounded to one decimal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: Option<f32>,
    pub timestamp_ms: u64,
}

pub struct Sampler<S> {
    driver: S,
    kind: SensorKind,
    timer: Interval,
}

impl<S: SensorDriver> Sampler<S> {
    pub fn new(driver: S, kind: SensorKind, interval_ms: u64) -> Self {
        Sampler {
            driver,
            kind,
            timer: Interval::immediate(interval_ms),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn driver_mut(&mut self) -> &mut S {
        &mut self.driver
    }

    pub fn is_present(&mut self) -> bool {
        self.driver.is_present()
    }

    /// Samples when the interval has elapsed, `None` otherwise.
    pub fn poll(&mut self, now_ms: u64) -> Option<Result<Reading, SampleError>> {
        self.timer.poll(now_ms).then(|| self.sample(now_ms))
    }

    /// Exactly one read cycle, validated and rounded.
    pub fn sample(&mut self, now_ms: u64) -> Result<Reading, SampleError> {
        let raw = self.driver.read();
        match self.kind.validate(raw) {
            Ok(ok) => {
                let reading = Reading {
                    temperature: round1(ok.temperature),
                    humidity: ok.humidity.map(round1),
                    timestamp_ms: now_ms,
                };
                info!("Temperature: {:.1} C", reading.temperature);
                Ok(reading)
            }
            Err(e) => {
                warn!("Sensor read rejected: {e} ({raw:?})");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct ScriptedSensor {
        pub present: bool,
        pub samples: VecDeque<RawSample>,
        pub reads: u32,
    }

    impl ScriptedSensor {
        pub fn with_temps(temps: &[f32]) -> Self {
            ScriptedSensor {
                present: true,
                samples: temps
                    .iter()
                    .map(|&t| RawSample {
                        temperature: t,
                        humidity: None,
                    })
                    .collect(),
                reads: 0,
            }
        }
    }

    impl SensorDriver for ScriptedSensor {
        fn is_present(&mut self) -> bool {
            self.present
        }
        fn read(&mut self) -> RawSample {
            self.reads += 1;
            self.samples.pop_front().unwrap_or(RawSample {
                temperature: f32::NAN,
                humidity: None,
            })
        }
    }

    fn raw(t: f32, h: Option<f32>) -> RawSample {
        RawSample {
            temperature: t,
            humidity: h,
        }
    }

    #[test]
    fn probe_range_edges() {
        let k = SensorKind::Ds18b20;
        assert!(k.validate(raw(-50.0, None)).is_ok());
        assert!(k.validate(raw(124.9, None)).is_ok());
        assert_eq!(k.validate(raw(125.0, None)), Err(SampleError::OutOfRange(125.0)));
        assert_eq!(k.validate(raw(-50.1, None)), Err(SampleError::OutOfRange(-50.1)));
        assert_eq!(k.validate(raw(-127.0, None)), Err(SampleError::Disconnected));
        assert_eq!(k.validate(raw(f32::NAN, None)), Err(SampleError::NotANumber));
    }

    #[test]
    fn humidity_sensor_checks_both_values() {
        let k = SensorKind::Dht;
        assert!(k.validate(raw(21.0, Some(55.0))).is_ok());
        assert_eq!(k.validate(raw(21.0, Some(f32::NAN))), Err(SampleError::NotANumber));
        assert_eq!(k.validate(raw(21.0, None)), Err(SampleError::NotANumber));
        assert_eq!(
            k.validate(raw(21.0, Some(101.0))),
            Err(SampleError::HumidityOutOfRange(101.0))
        );
        // no probe range for this family
        assert!(k.validate(raw(-60.0, Some(10.0))).is_ok());
    }

    #[test]
    fn generic_only_rejects_nan() {
        assert!(SensorKind::Generic.validate(raw(500.0, None)).is_ok());
        assert!(SensorKind::Generic.validate(raw(f32::NAN, None)).is_err());
    }

    #[test]
    fn sample_rounds_to_one_decimal() {
        let mut s = Sampler::new(
            ScriptedSensor {
                present: true,
                samples: [raw(21.43, Some(55.26))].into(),
                reads: 0,
            },
            SensorKind::Dht,
            60_000,
        );
        let r = s.sample(7).unwrap();
        assert_eq!(r.temperature, 21.4);
        assert_eq!(r.humidity, Some(55.3));
        assert_eq!(r.timestamp_ms, 7);
    }

    #[test]
    fn poll_reads_once_per_interval() {
        let mut s = Sampler::new(
            ScriptedSensor::with_temps(&[20.0, 20.5]),
            SensorKind::Ds18b20,
            60_000,
        );
        assert_eq!(s.poll(0).unwrap().unwrap().temperature, 20.0);
        for now in (100..60_000).step_by(100) {
            assert!(s.poll(now).is_none());
        }
        assert_eq!(s.driver_mut().reads, 1);
        assert_eq!(s.poll(60_000).unwrap().unwrap().temperature, 20.5);
    }
}

// EOF
