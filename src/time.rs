/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Timer primitives.
//!
//! Drivers that poll hardware take a time manager explicitly and compute deadlines from its
//! monotonic uptime. The globally registered one only stamps log lines.

use {
    crate::sync::{interface::Mutex, SpinLock},
    core::time::Duration,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Timekeeping interfaces.
pub mod interface {
    use core::time::Duration;

    /// Time management functions.
    pub trait TimeManager {
        /// The timer's resolution.
        fn resolution(&self) -> Duration;

        /// The uptime since power-on of the device.
        ///
        /// This includes time consumed by firmware and bootloaders. Must never go backwards.
        fn uptime(&self) -> Duration;

        /// Spin for a given duration.
        fn spin_for(&self, duration: Duration);
    }
}

/// Reports zero uptime. Default source of log timestamps until a real timer is registered.
pub struct NullTimeManager;

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static NULL_TIME_MANAGER: NullTimeManager = NullTimeManager;

static TIME_MANAGER: SpinLock<&'static (dyn interface::TimeManager + Sync)> =
    SpinLock::new(&NULL_TIME_MANAGER);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Register the timer used for log timestamps.
pub fn register_time_manager(new_manager: &'static (dyn interface::TimeManager + Sync)) {
    TIME_MANAGER.lock(|manager| *manager = new_manager);
}

/// Return a reference to the registered time manager.
pub fn time_manager() -> &'static dyn interface::TimeManager {
    TIME_MANAGER.lock(|manager| *manager)
}

impl interface::TimeManager for NullTimeManager {
    fn resolution(&self) -> Duration {
        Duration::ZERO
    }

    fn uptime(&self) -> Duration {
        Duration::ZERO
    }

    fn spin_for(&self, _duration: Duration) {}
}

#[cfg(feature = "std")]
pub use hosted::StdTimeManager;

#[cfg(feature = "std")]
mod hosted {
    use {
        super::interface,
        core::time::Duration,
        std::{sync::OnceLock, time::Instant},
    };

    /// Monotonic time manager for hosted builds, counting from its first use.
    pub struct StdTimeManager {
        epoch: OnceLock<Instant>,
    }

    impl StdTimeManager {
        pub const fn new() -> Self {
            Self {
                epoch: OnceLock::new(),
            }
        }
    }

    impl Default for StdTimeManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl interface::TimeManager for StdTimeManager {
        fn resolution(&self) -> Duration {
            Duration::from_nanos(1)
        }

        fn uptime(&self) -> Duration {
            self.epoch.get_or_init(Instant::now).elapsed()
        }

        fn spin_for(&self, duration: Duration) {
            let start = Instant::now();
            while start.elapsed() < duration {
                core::hint::spin_loop();
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
