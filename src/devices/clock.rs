/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

/// Source of a peripheral's functional clock.
pub trait ClockProvider {
    /// Current clock rate in Hz.
    fn rate_hz(&self) -> u32;
}

/// A clock running at a fixed rate, for boards that never reprogram it.
#[derive(Debug, Copy, Clone)]
pub struct FixedClock(pub u32);

impl ClockProvider for FixedClock {
    fn rate_hz(&self) -> u32 {
        self.0
    }
}
