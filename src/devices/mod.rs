/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Interfaces between device drivers and the code that drives them.

pub mod clock;
pub mod spi;

pub use {clock::ClockProvider, spi::SpiMaster};
