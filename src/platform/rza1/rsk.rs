/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Pin routing for the Renesas Starter Kit+ board.
//!
//! Feed a table to [`PinController::apply`](super::device_driver::PinController::apply).

use super::device_driver::pfc::{Direction, Pin, PinConfig, PinMode};

/// Evaluated at compile time, so a bad table entry fails the build.
const fn pin(port: usize, bit: usize) -> Pin {
    match Pin::from_port_bit(port, bit) {
        Some(pin) => pin,
        None => panic!("pin does not exist"),
    }
}

const fn peripheral(port: usize, bit: usize, mode: PinMode) -> PinConfig {
    PinConfig::new(pin(port, bit), mode, Direction::Pipc)
}

const fn i2c(port: usize, bit: usize) -> PinConfig {
    peripheral(port, bit, PinMode::Alt1).bidirectional()
}

static I2C_PINS: [[PinConfig; 2]; 4] = [
    [i2c(1, 0), i2c(1, 1)], // SCL0, SDA0
    [i2c(1, 2), i2c(1, 3)], // SCL1, SDA1
    [i2c(1, 4), i2c(1, 5)], // SCL2, SDA2
    [i2c(1, 6), i2c(1, 7)], // SCL3, SDA3
];

/// SCL and SDA of RIIC `channel`.
pub fn i2c_pins(channel: usize) -> Option<&'static [PinConfig; 2]> {
    I2C_PINS.get(channel)
}

/// SD card slot on SDHI channel 0.
pub const SDHI0_PINS: [PinConfig; 8] = [
    peripheral(4, 8, PinMode::Alt3),                  // SD_CD_0
    peripheral(4, 9, PinMode::Alt3),                  // SD_WP_0
    peripheral(4, 10, PinMode::Alt3).bidirectional(), // SD_D1_0
    peripheral(4, 11, PinMode::Alt3).bidirectional(), // SD_D0_0
    peripheral(4, 12, PinMode::Alt3),                 // SD_CLK_0
    peripheral(4, 13, PinMode::Alt3).bidirectional(), // SD_CMD_0
    peripheral(4, 14, PinMode::Alt3).bidirectional(), // SD_D3_0
    peripheral(4, 15, PinMode::Alt3).bidirectional(), // SD_D2_0
];

/// eMMC, 8-bit bus.
pub const MMCIF_PINS: [PinConfig; 11] = [
    peripheral(3, 8, PinMode::Alt8),  // MMC_CD
    peripheral(3, 10, PinMode::Alt8), // MMC_D1
    peripheral(3, 11, PinMode::Alt8), // MMC_D0
    peripheral(3, 12, PinMode::Alt8), // MMC_CLK
    peripheral(3, 13, PinMode::Alt8), // MMC_CMD
    peripheral(3, 14, PinMode::Alt8), // MMC_D3
    peripheral(3, 15, PinMode::Alt8), // MMC_D2
    peripheral(4, 0, PinMode::Alt8),  // MMC_D4
    peripheral(4, 1, PinMode::Alt8),  // MMC_D5
    peripheral(4, 2, PinMode::Alt8),  // MMC_D6
    peripheral(4, 3, PinMode::Alt8),  // MMC_D7
];

/// Analog inputs AN0 to AN3.
pub const ADC_PINS: [PinConfig; 4] = [
    peripheral(1, 8, PinMode::Alt1),
    peripheral(1, 9, PinMode::Alt1),
    peripheral(1, 10, PinMode::Alt1),
    peripheral(1, 11, PinMode::Alt1),
];

/// RSPI channel 1, shared with the audio codec's SSI0 pins.
pub const SPI1_PINS: [PinConfig; 4] = [
    peripheral(4, 4, PinMode::Alt2).bidirectional(), // RSPCK1
    peripheral(4, 5, PinMode::Alt2).bidirectional(), // SSL10
    peripheral(4, 6, PinMode::Alt2).bidirectional(), // MOSI1
    peripheral(4, 7, PinMode::Alt2).bidirectional(), // MISO1
];

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::platform::rza1::device_driver::{common::tests::RegisterBank, PinController},
    };

    const PMC: usize = 0x0400;
    const PFCE: usize = 0x0600;
    const PFCAE: usize = 0x0a00;
    const PBDC: usize = 0x4100;
    const PIPC: usize = 0x4200;

    #[test]
    fn i2c_channels_use_port_1_pairs() {
        for channel in 0..4 {
            let [scl, sda] = i2c_pins(channel).unwrap();
            assert_eq!(format!("{}", scl.pin), format!("P1_{}", channel * 2));
            assert_eq!(format!("{}", sda.pin), format!("P1_{}", channel * 2 + 1));
            assert!(scl.bidirectional && sda.bidirectional);
            assert_eq!(scl.mode, PinMode::Alt1);
        }
        assert!(i2c_pins(4).is_none());
    }

    #[test]
    fn sdhi0_table_programs_port_4() {
        let main = RegisterBank::new(0x4230);
        let port0 = RegisterBank::new(0x404);
        let pfc = unsafe { PinController::new(main.base_addr(), port0.base_addr()) };

        pfc.apply(&SDHI0_PINS).unwrap();

        // Alt3 is PMC + PFCE on bits 8..=15.
        assert_eq!(main.read(PMC + 4 * 4), 0xff00);
        assert_eq!(main.read(PFCE + 4 * 4), 0xff00);
        assert_eq!(main.read(PIPC + 4 * 4), 0xff00);
        assert_eq!(main.read(PBDC + 4 * 4), 0b1110_1100 << 8);
        assert!(port0.dirty_words().is_empty());
    }

    #[test]
    fn mmcif_table_selects_alt8_everywhere() {
        let main = RegisterBank::new(0x4230);
        let port0 = RegisterBank::new(0x404);
        let pfc = unsafe { PinController::new(main.base_addr(), port0.base_addr()) };

        pfc.apply(&MMCIF_PINS).unwrap();

        for config in MMCIF_PINS {
            assert_eq!(pfc.mode(config.pin), Ok(PinMode::Alt8));
        }
        assert_eq!(main.read(PFCAE + 3 * 4), 0b1111_1101 << 8);
        assert_eq!(main.read(PFCAE + 4 * 4), 0b1111);
    }

    #[test]
    fn every_table_entry_is_off_port_0() {
        let tables: [&[PinConfig]; 4] = [&SDHI0_PINS, &MMCIF_PINS, &ADC_PINS, &SPI1_PINS];
        for config in tables.into_iter().flatten().chain(I2C_PINS.iter().flatten()) {
            assert_ne!(config.pin.resolve().unwrap().port, 0, "{}", config.pin);
        }
    }
}
