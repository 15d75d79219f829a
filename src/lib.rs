// lib.rs

pub use log::*;
pub use serde::{Deserialize, Serialize};

mod config;
pub use config::*;

mod state;
pub use state::*;

mod display;
pub use display::*;

mod wifi;
pub use wifi::*;

mod mqtt;
pub use mqtt::*;

mod measure;
pub use measure::*;

mod throttle;
pub use throttle::*;

mod remote;
pub use remote::*;

mod node;
pub use node::*;

#[cfg(target_os = "espidf")]
pub mod esp;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Monotonic millisecond time source shared by every manager.
///
/// `sleep_ms` is only used by the bounded initial attach; everything else
/// compares elapsed time against its own interval.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&mut self, ms: u64);
}

/// Elapsed-time gate owned by a single manager.
#[derive(Clone, Copy, Debug, Default)]
pub struct Interval {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl Interval {
    /// Gate that fires on the first poll, then every `period_ms`.
    pub fn immediate(period_ms: u64) -> Self {
        Interval {
            period_ms,
            last_ms: None,
        }
    }

    /// Gate that first fires `period_ms` after `now_ms`.
    pub fn starting_at(period_ms: u64, now_ms: u64) -> Self {
        Interval {
            period_ms,
            last_ms: Some(now_ms),
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        }
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }

    /// `is_due` followed by `reset` when it fired.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.reset(now_ms);
            true
        } else {
            false
        }
    }
}

/// Round to one decimal place.
pub fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// Value expressed in whole tenths, used for all change comparisons.
pub fn tenths(value: f32) -> i32 {
    (value * 10.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_fires_immediately_then_waits() {
        let mut iv = Interval::immediate(1000);
        assert!(iv.poll(0));
        assert!(!iv.poll(10));
        assert!(!iv.poll(999));
        assert!(iv.poll(1000));
        assert!(!iv.poll(1500));
    }

    #[test]
    fn interval_starting_at_waits_first() {
        let mut iv = Interval::starting_at(5000, 0);
        assert!(!iv.poll(4990));
        assert!(iv.poll(5000));
    }

    #[test]
    fn rounding_to_one_decimal() {
        assert_eq!(round1(21.43), 21.4);
        assert_eq!(round1(21.46), 21.5);
        assert_eq!(round1(-3.04), -3.0);
        assert_eq!(tenths(21.4), 214);
        assert_eq!(tenths(-0.2), -2);
    }
}

// EOF
