/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Renesas RZ/A1H pin function controller and SPI bus controller drivers.
//!
//! The drivers program memory-mapped register blocks directly. Any memory of the
//! right size can stand in for a block, which is how the test suite drives them.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::nonstandard_macro_braces)] // https://github.com/shepmaster/snafu/issues/296

#[macro_use]
pub mod macros;

pub mod console;
pub mod devices;
pub mod drivers;
pub mod platform;
pub mod sync;
pub mod time;

pub use platform::rza1::device_driver::{pfc, spibsc};
