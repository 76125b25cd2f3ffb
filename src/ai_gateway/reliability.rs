use std::time::Duration;

use crate::ai_gateway::{error::GatewayError, types::ReliabilityConfig};

/// Attempt budget, sampling schedule and retry eligibility for one gateway.
#[derive(Debug, Clone)]
pub struct ReliabilityLayer {
    config: ReliabilityConfig,
}

impl ReliabilityLayer {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { config }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms.max(1))
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Temperature for zero-based `attempt`: stepped down from `base` and
    /// clamped into the configured range.
    pub fn temperature_for_attempt(&self, base: f32, attempt: u32) -> f32 {
        let (low, high) = if self.config.min_temperature <= self.config.max_temperature {
            (self.config.min_temperature, self.config.max_temperature)
        } else {
            (self.config.max_temperature, self.config.min_temperature)
        };

        (base - attempt as f32 * self.config.temperature_step).clamp(low, high)
    }

    /// Only safety rejections are retried, and only while attempts remain.
    pub fn can_retry(&self, err: &GatewayError, attempt: u32) -> bool {
        err.is_safety_rejection() && attempt.saturating_add(1) < self.max_attempts()
    }
}
