//! Per-model rate limit profiles

use std::collections::HashMap;
use std::time::Duration;

use provider::ModelId;

/// Fraction of a ceiling a key may use before it counts as "hot".
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.85;

/// Requests per window for a model when no profile is configured.
pub const DEFAULT_REQUESTS_PER_WINDOW: u32 = 15;

/// Minimum pause between scheduled tasks.
pub const DEFAULT_FLOOR_DELAY: Duration = Duration::from_millis(4_000);

/// Rate ceiling for one external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitProfile {
    pub requests_per_window: u32,
}

/// Read-only rate configuration shared by the selector and scheduler.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub window: Duration,
    pub default_profile: RateLimitProfile,
    pub per_model: HashMap<ModelId, RateLimitProfile>,
    pub safety_margin: f64,
    pub floor_delay: Duration,
}

impl RateLimits {
    pub fn new(window: Duration, default_requests_per_window: u32) -> Self {
        Self {
            window,
            default_profile: RateLimitProfile {
                requests_per_window: default_requests_per_window,
            },
            per_model: HashMap::new(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            floor_delay: DEFAULT_FLOOR_DELAY,
        }
    }

    pub fn with_model(mut self, model: ModelId, requests_per_window: u32) -> Self {
        self.per_model
            .insert(model, RateLimitProfile { requests_per_window });
        self
    }

    pub fn with_safety_margin(mut self, safety_margin: f64) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_floor_delay(mut self, floor_delay: Duration) -> Self {
        self.floor_delay = floor_delay;
        self
    }

    /// Profile for `model`, falling back to the default profile.
    pub fn profile_for(&self, model: ModelId) -> RateLimitProfile {
        self.per_model
            .get(&model)
            .copied()
            .unwrap_or(self.default_profile)
    }

    pub fn ceiling_for(&self, model: ModelId) -> u32 {
        self.profile_for(model).requests_per_window
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), DEFAULT_REQUESTS_PER_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_model_uses_default_profile() {
        let limits = RateLimits::default().with_model(ModelId::Gemini20Flash, 30);
        assert_eq!(limits.ceiling_for(ModelId::Gemini20Flash), 30);
        assert_eq!(
            limits.ceiling_for(ModelId::Gemini20FlashExp),
            DEFAULT_REQUESTS_PER_WINDOW
        );
    }

    #[test]
    fn defaults_match_free_tier_pacing() {
        let limits = RateLimits::default();
        assert_eq!(limits.window, Duration::from_secs(60));
        assert_eq!(limits.safety_margin, 0.85);
        assert_eq!(limits.floor_delay, Duration::from_millis(4_000));
    }
}
