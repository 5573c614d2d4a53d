// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{MAX_DELAY_SECONDS, MAX_THROTTLE, THROTTLE_BASE};
use std::time::Duration;

/// Consecutive-failure pressure applied to outbound deliveries.
///
/// Each failed send raises the level by one, each successful send lowers it by one. The delay
/// grows exponentially with the level and is capped at [`MAX_DELAY_SECONDS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    level: u32,
}

impl Throttle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn record_success(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn record_failure(&mut self) {
        self.level = (self.level + 1).min(MAX_THROTTLE);
    }

    /// Delay to wait before the next send, zero when there is no pressure.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(delay_ms(self.level))
    }
}

/// `round(min(1.05^level - 1, 100) * 1000)`
#[must_use]
pub fn delay_ms(level: u32) -> u64 {
    if level == 0 {
        return 0;
    }
    let exponent = i32::try_from(level).unwrap_or(i32::MAX);
    let seconds = (THROTTLE_BASE.powi(exponent) - 1.0).min(MAX_DELAY_SECONDS);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (seconds * 1000.0).round() as u64;
    millis
}
