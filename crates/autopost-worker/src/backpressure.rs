//! Admission backpressure: holds dispatch back while system resource usage
//! sits above a high watermark.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing;

use autopost_core::config::BackpressureConfig;

/// Source of the current resource usage, as a fraction in 0..=1.
pub trait ResourceProbe: Send + Sync + fmt::Debug {
    fn usage(&self) -> f64;
}

/// Usage value set from outside (a metrics poller, a test).
#[derive(Debug, Clone, Default)]
pub struct SharedUsage(Arc<AtomicU64>);

impl SharedUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, usage: f64) {
        self.0.store(usage.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl ResourceProbe for SharedUsage {
    fn usage(&self) -> f64 {
        self.get()
    }
}

/// Hysteresis gate in front of the dispatcher.
///
/// Engages when usage reaches the high watermark and releases once it falls
/// below the low watermark. An executor reporting resource exhaustion also
/// closes the gate for the configured cooldown.
#[derive(Debug)]
pub struct AdmissionGate {
    enabled: bool,
    high_watermark: f64,
    low_watermark: f64,
    cooldown: Duration,
    throttled: bool,
    cooldown_until: Option<Instant>,
}

impl AdmissionGate {
    pub fn new(config: &BackpressureConfig) -> Self {
        Self {
            enabled: config.enabled,
            high_watermark: config.high_watermark,
            low_watermark: config.low_watermark,
            cooldown: config.cooldown(),
            throttled: false,
            cooldown_until: None,
        }
    }

    /// Decide whether another job may start.
    pub fn admit(&mut self, usage: f64, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        if let Some(until) = self.cooldown_until {
            if now < until {
                return false;
            }
            self.cooldown_until = None;
            tracing::info!("Resource cooldown elapsed, admission resumed");
        }

        if self.throttled {
            if usage < self.low_watermark {
                self.throttled = false;
                tracing::info!(
                    "Resource usage {:.2} below low watermark {:.2}, admission resumed",
                    usage,
                    self.low_watermark
                );
                return true;
            }
            return false;
        }

        if usage >= self.high_watermark {
            self.throttled = true;
            tracing::warn!(
                "Resource usage {:.2} reached high watermark {:.2}, holding admission",
                usage,
                self.high_watermark
            );
            return false;
        }

        true
    }

    /// Close the gate for the cooldown period.
    pub fn engage_cooldown(&mut self, now: Instant) -> Instant {
        let until = now + self.cooldown;
        self.cooldown_until = Some(self.cooldown_until.map_or(until, |prev| prev.max(until)));
        tracing::warn!("Resource exhaustion reported, holding admission for {:?}", self.cooldown);
        until
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Check if admission is currently held.
    pub fn is_engaged(&self, now: Instant) -> bool {
        self.throttled || self.cooldown_until.is_some_and(|until| now < until)
    }
}
