/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! RZ/A1 on-chip peripheral drivers.

pub mod common;
pub mod pfc;
pub mod spibsc;

pub use {pfc::PinController, spibsc::Spibsc};
