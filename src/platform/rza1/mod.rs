/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Renesas RZ/A1H (R7S721001) support.

pub mod device_driver;
pub mod memory;
pub mod rsk;

/// See the RZ/A1H Group User's Manual: Hardware, section "Address Space".
pub struct Rza1Host;

impl Rza1Host {
    /// Name of the SoC this code is built for.
    pub const fn soc_name() -> &'static str {
        "RZ/A1H"
    }

    /// Size of each SPIBSC register window.
    pub const fn spibsc_window_size() -> usize {
        0x100
    }
}
