/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

/// Physical memory map. Peripherals are identity mapped.
pub mod map {
    pub mod mmio {
        /// Pin function controller, ports 1 to 11 (and the data registers of port 0).
        pub const PFC_BASE: usize = 0xfcfe_3000;
        /// Separate mode-control window for the input-only port 0.
        pub const PFC_P0_BASE: usize = 0xfcfe_7b00;
        /// SPI multi-I/O bus controller, channel 0.
        pub const SPIBSC0_BASE: usize = 0x3fef_a000;
        /// SPI multi-I/O bus controller, channel 1.
        pub const SPIBSC1_BASE: usize = 0x3fef_b000;
    }
}
