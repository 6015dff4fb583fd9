/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Driver-model glue: the `DeviceDriver` contract and a fixed-capacity registry that brings
//! registered drivers up in order.

use {
    crate::{
        info,
        sync::{interface::Mutex, SpinLock},
    },
    snafu::{ensure, Snafu},
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// A board registers the pin controller and the SPI bus controllers.
const NUM_DRIVERS: usize = 4;

struct DriverManagerInner {
    next_index: usize,
    descriptors: [Option<DeviceDriverDescriptor>; NUM_DRIVERS],
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub mod interface {
    pub trait DeviceDriver {
        /// Return a compatibility string for identifying the driver.
        fn compatible(&self) -> &'static str;

        /// Called by the platform to bring up the device.
        /// The default implementation does nothing.
        ///
        /// # Safety
        ///
        /// - During init, drivers might do things with system-wide impact.
        unsafe fn init(&self) -> Result<(), &'static str> {
            Ok(())
        }
    }
}

/// Runs after a driver's `init()`, typically to route its pins.
pub type DeviceDriverPostInitCallback = unsafe fn() -> Result<(), &'static str>;

#[derive(Copy, Clone)]
pub struct DeviceDriverDescriptor {
    device_driver: &'static (dyn interface::DeviceDriver + Sync),
    post_init_callback: Option<DeviceDriverPostInitCallback>,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DriverError {
    #[snafu(display("No room for driver {compatible}"))]
    TooManyDrivers { compatible: &'static str },
    #[snafu(display("Error initializing driver {compatible}: {reason}"))]
    Init {
        compatible: &'static str,
        reason: &'static str,
    },
    #[snafu(display("Error in post-init callback of {compatible}: {reason}"))]
    PostInit {
        compatible: &'static str,
        reason: &'static str,
    },
}

pub struct DriverManager {
    inner: SpinLock<DriverManagerInner>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl DeviceDriverDescriptor {
    pub fn new(
        device_driver: &'static (dyn interface::DeviceDriver + Sync),
        post_init_callback: Option<DeviceDriverPostInitCallback>,
    ) -> Self {
        Self {
            device_driver,
            post_init_callback,
        }
    }
}

impl DriverManager {
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(DriverManagerInner {
                next_index: 0,
                descriptors: [None; NUM_DRIVERS],
            }),
        }
    }

    pub fn register_driver(&self, descriptor: DeviceDriverDescriptor) -> Result<(), DriverError> {
        self.inner.lock(|inner| {
            ensure!(
                inner.next_index < NUM_DRIVERS,
                TooManyDriversSnafu {
                    compatible: descriptor.device_driver.compatible()
                }
            );
            inner.descriptors[inner.next_index] = Some(descriptor);
            inner.next_index += 1;
            Ok(())
        })
    }

    /// Registered descriptors, in registration order. Copied out so that no driver code runs
    /// under the registry lock.
    fn descriptors(&self) -> [Option<DeviceDriverDescriptor>; NUM_DRIVERS] {
        self.inner.lock(|inner| inner.descriptors)
    }

    /// Initialize every driver, then run its post-init callback. Stops at the first failure.
    ///
    /// # Safety
    ///
    /// - During init, drivers might do things with system-wide impact.
    pub unsafe fn init_drivers(&self) -> Result<(), DriverError> {
        for descriptor in self.descriptors().iter().flatten() {
            let compatible = descriptor.device_driver.compatible();

            descriptor
                .device_driver
                .init()
                .map_err(|reason| DriverError::Init { compatible, reason })?;

            if let Some(callback) = descriptor.post_init_callback {
                callback().map_err(|reason| DriverError::PostInit { compatible, reason })?;
            }
        }
        Ok(())
    }

    /// Log every registered driver.
    pub fn enumerate(&self) {
        for (i, descriptor) in self.descriptors().iter().flatten().enumerate() {
            info!("      {}. {}", i + 1, descriptor.device_driver.compatible());
        }
    }
}

impl Default for DriverManager {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
