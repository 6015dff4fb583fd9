/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! RZ/A1 pin function controller.
//!
//! Pins are numbered consecutively across twelve ports of uneven width. Each pin is routed
//! either to the GPIO port logic or to one of eight alternate peripheral functions by the
//! combination of its PMC, PFC, PFCE and PFCAE bits. Port 0 is input-only and only has a
//! mode-control register, in a window of its own.

use {
    super::common::MMIODerefWrapper,
    crate::{
        drivers,
        sync::{interface::Mutex, SpinLock},
        warn,
    },
    bit_field::BitField,
    core::fmt,
    snafu::Snafu,
    static_assertions::const_assert_eq,
    tock_registers::{
        fields::FieldValue,
        interfaces::{ReadWriteable, Readable},
        register_structs,
        registers::{ReadOnly, ReadWrite},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_structs! {
    /// One word per port in each register array, 4 bytes apart.
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x0000 => PORT: [ReadWrite<u32>; 12]), // output data
        (0x0030 => __reserved_1),
        (0x0200 => PPR: [ReadOnly<u32>; 12]),   // pin level
        (0x0230 => __reserved_2),
        (0x0300 => PM: [ReadWrite<u32>; 12]),   // direction, 1 = input
        (0x0330 => __reserved_3),
        (0x0400 => PMC: [ReadWrite<u32>; 12]),  // peripheral mode enable
        (0x0430 => __reserved_4),
        (0x0500 => PFC: [ReadWrite<u32>; 12]),  // function select, bit 0
        (0x0530 => __reserved_5),
        (0x0600 => PFCE: [ReadWrite<u32>; 12]), // function select, bit 1
        (0x0630 => __reserved_6),
        (0x0a00 => PFCAE: [ReadWrite<u32>; 12]), // function select, bit 2
        (0x0a30 => __reserved_7),
        (0x4000 => PIBC: [ReadWrite<u32>; 12]), // input buffer enable
        (0x4030 => __reserved_8),
        (0x4100 => PBDC: [ReadWrite<u32>; 12]), // bidirectional mode
        (0x4130 => __reserved_9),
        (0x4200 => PIPC: [ReadWrite<u32>; 12]), // direction controlled by peripheral
        (0x4230 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    Port0RegisterBlock {
        (0x000 => __reserved_1),
        (0x400 => PMC: ReadWrite<u32>),
        (0x404 => @END),
    }
}

// Hide RegisterBlock from public api.
type Registers = MMIODerefWrapper<RegisterBlock>;
type Port0Registers = MMIODerefWrapper<Port0RegisterBlock>;

struct PinControllerInner {
    registers: Registers,
    port0: Port0Registers,
}

const fn total_pins(widths: &[u8]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < widths.len() {
        total += widths[i] as usize;
        i += 1;
    }
    total
}

/// PMC, PFC, PFCE, PFCAE for each mode, indexed by `PinMode as usize`.
const MODE_REGSET: [RegSet; 9] = [
    RegSet::new(false, false, false, false), // port mode
    RegSet::new(true, false, false, false),  // alt 1
    RegSet::new(true, true, false, false),   // alt 2
    RegSet::new(true, false, true, false),   // alt 3
    RegSet::new(true, true, true, false),    // alt 4
    RegSet::new(true, false, false, true),   // alt 5
    RegSet::new(true, true, false, true),    // alt 6
    RegSet::new(true, false, true, true),    // alt 7
    RegSet::new(true, true, true, true),     // alt 8
];

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub const NUM_PORTS: usize = 12;

/// Number of pins in each port.
pub const PORT_WIDTHS: [u8; NUM_PORTS] = [6, 16, 16, 16, 16, 11, 16, 16, 16, 8, 16, 16];

/// Number of pins across all ports.
pub const GPIO_NR: usize = 169;

const_assert_eq!(total_pins(&PORT_WIDTHS), GPIO_NR);

/// A pin, numbered consecutively from `P0_0` to `P11_15`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(u16);

/// Register coordinates of a pin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortBit {
    pub port: usize,
    pub bit: usize,
}

/// What a pin is connected to.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinMode {
    /// GPIO port logic.
    Port = 0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
    Alt6,
    Alt7,
    Alt8,
}

/// The function-select bits of one pin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegSet {
    pub pmc: bool,
    pub pfc: bool,
    pub pfce: bool,
    pub pfcae: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    /// The peripheral selected by the pin mode drives the direction.
    Pipc,
    /// Input buffer off, bidirectional buffer on (LVDS and similar).
    Bidirectional,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PfcError {
    #[snafu(display("Pin {pin} does not exist"))]
    InvalidPin { pin: u16 },
    #[snafu(display("Port {port} does not support {operation}"))]
    UnsupportedOperation {
        port: usize,
        operation: &'static str,
    },
}

pub type Result<T> = ::core::result::Result<T, PfcError>;

/// Public interface to the pin function controller.
pub struct PinController {
    inner: SpinLock<PinControllerInner>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Pin {
    /// Wrap a raw pin number. Range is checked on use.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// The pin at `bit` of `port`, if the port has that many pins.
    pub const fn from_port_bit(port: usize, bit: usize) -> Option<Self> {
        if port >= NUM_PORTS || bit >= PORT_WIDTHS[port] as usize {
            return None;
        }
        let mut id = bit;
        let mut p = 0;
        while p < port {
            id += PORT_WIDTHS[p] as usize;
            p += 1;
        }
        Some(Self(id as u16))
    }

    pub const fn id(self) -> u16 {
        self.0
    }

    /// Find the port and bit of this pin.
    ///
    /// Walks the port width table, subtracting widths until the remainder fits in a port.
    pub fn resolve(self) -> Result<PortBit> {
        let mut bit = usize::from(self.0);
        for (port, &width) in PORT_WIDTHS.iter().enumerate() {
            let width = usize::from(width);
            if bit < width {
                return Ok(PortBit { port, bit });
            }
            bit -= width;
        }
        InvalidPinSnafu { pin: self.0 }.fail()
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.resolve() {
            Ok(PortBit { port, bit }) => write!(f, "P{}_{}", port, bit),
            Err(_) => write!(f, "pin#{}", self.0),
        }
    }
}

impl RegSet {
    pub const fn new(pmc: bool, pfc: bool, pfce: bool, pfcae: bool) -> Self {
        Self {
            pmc,
            pfc,
            pfce,
            pfcae,
        }
    }
}

impl PinMode {
    pub const ALL: [PinMode; 9] = [
        PinMode::Port,
        PinMode::Alt1,
        PinMode::Alt2,
        PinMode::Alt3,
        PinMode::Alt4,
        PinMode::Alt5,
        PinMode::Alt6,
        PinMode::Alt7,
        PinMode::Alt8,
    ];

    /// Register bits selecting this mode.
    pub const fn regset(self) -> RegSet {
        MODE_REGSET[self as usize]
    }

    /// The mode selected by a set of register bits.
    ///
    /// With PMC clear the pin belongs to the port logic whatever the function-select bits say.
    pub fn from_regset(regs: RegSet) -> Self {
        if !regs.pmc {
            return PinMode::Port;
        }
        let index = 1
            + usize::from(regs.pfc)
            + 2 * usize::from(regs.pfce)
            + 4 * usize::from(regs.pfcae);
        Self::ALL[index]
    }
}

impl Direction {
    fn describe(self) -> &'static str {
        match self {
            Direction::Out => "output",
            Direction::In => "input",
            Direction::Pipc => "peripheral-controlled direction",
            Direction::Bidirectional => "bidirectional mode",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

fn bit_modify(register: &ReadWrite<u32>, bit: usize, value: bool) {
    register.modify(FieldValue::<u32, ()>::new(0b1, bit, value.into()));
}

/// Port 0 has no output stage, no bidirectional buffer and no PIPC register.
fn reject_on_port0(port: usize, operation: &'static str) -> Result<()> {
    if port == 0 {
        warn!("pfc: port 0 is input only, refusing {}", operation);
        return UnsupportedOperationSnafu { port, operation }.fail();
    }
    Ok(())
}

impl PinControllerInner {
    const unsafe fn new(mmio_base_addr: usize, port0_base_addr: usize) -> Self {
        Self {
            registers: Registers::new(mmio_base_addr),
            port0: Port0Registers::new(port0_base_addr),
        }
    }

    fn set_direction(&self, port: usize, bit: usize, direction: Direction) {
        let regs = &self.registers;
        match direction {
            Direction::In => {
                bit_modify(&regs.PM[port], bit, true);
                bit_modify(&regs.PIBC[port], bit, true);
            }
            Direction::Bidirectional => {
                bit_modify(&regs.PM[port], bit, true);
                bit_modify(&regs.PIBC[port], bit, false);
                bit_modify(&regs.PBDC[port], bit, true);
            }
            Direction::Out => {
                bit_modify(&regs.PM[port], bit, false);
                bit_modify(&regs.PIBC[port], bit, false);
            }
            Direction::Pipc => {}
        }
    }

    fn set_ip_controlled(&self, port: usize, bit: usize, enable: bool) {
        bit_modify(&self.registers.PIPC[port], bit, enable);
    }

    fn set_bidirection(&self, port: usize, bit: usize, enable: bool) {
        bit_modify(&self.registers.PBDC[port], bit, enable);
    }

    /// Write PMC, PFC, PFCE and PFCAE, in that order.
    fn set_mode(&self, port: usize, bit: usize, mode: PinMode) {
        let set = mode.regset();

        if port == 0 {
            bit_modify(&self.port0.PMC, bit, set.pmc);
            return;
        }

        let regs = &self.registers;
        bit_modify(&regs.PMC[port], bit, set.pmc);
        bit_modify(&regs.PFC[port], bit, set.pfc);
        bit_modify(&regs.PFCE[port], bit, set.pfce);
        bit_modify(&regs.PFCAE[port], bit, set.pfcae);
    }

    fn mode(&self, port: usize, bit: usize) -> PinMode {
        if port == 0 {
            let pmc = self.port0.PMC.get().get_bit(bit);
            return PinMode::from_regset(RegSet::new(pmc, false, false, false));
        }

        let regs = &self.registers;
        PinMode::from_regset(RegSet::new(
            regs.PMC[port].get().get_bit(bit),
            regs.PFC[port].get().get_bit(bit),
            regs.PFCE[port].get().get_bit(bit),
            regs.PFCAE[port].get().get_bit(bit),
        ))
    }

    fn level(&self, port: usize, bit: usize) -> bool {
        self.registers.PPR[port].get().get_bit(bit)
    }

    fn set_level(&self, port: usize, bit: usize, level: bool) {
        bit_modify(&self.registers.PORT[port], bit, level);
    }
}

impl PinController {
    pub const COMPATIBLE: &'static str = "RZA1_INTERNAL_PFC";

    /// # Safety
    ///
    /// Both addresses must map the controller's register windows (or memory standing in for
    /// them) for the lifetime of the controller.
    pub const unsafe fn new(mmio_base_addr: usize, port0_base_addr: usize) -> Self {
        Self {
            inner: SpinLock::new(PinControllerInner::new(mmio_base_addr, port0_base_addr)),
        }
    }

    /// Route `pin` to `mode` and program its direction.
    ///
    /// Everything is validated before the first register write, so a failed call leaves the
    /// hardware untouched. Port 0 only accepts [`Direction::In`] and only has its PMC bit set.
    pub fn assign(&self, pin: Pin, mode: PinMode, direction: Direction) -> Result<()> {
        let PortBit { port, bit } = pin.resolve()?;
        if direction != Direction::In {
            reject_on_port0(port, direction.describe())?;
        }

        self.inner.lock(|inner| {
            if port != 0 {
                match direction {
                    Direction::Pipc => inner.set_ip_controlled(port, bit, true),
                    _ => {
                        inner.set_ip_controlled(port, bit, false);
                        inner.set_direction(port, bit, direction);
                    }
                }
            }
            inner.set_mode(port, bit, mode);
        });

        Ok(())
    }

    /// Switch the bidirectional buffer of `pin` on or off, leaving mode and direction alone.
    pub fn set_bidirection(&self, pin: Pin, enable: bool) -> Result<()> {
        let PortBit { port, bit } = pin.resolve()?;
        reject_on_port0(port, Direction::Bidirectional.describe())?;

        self.inner
            .lock(|inner| inner.set_bidirection(port, bit, enable));
        Ok(())
    }

    /// Read back the mode `pin` is currently routed to.
    pub fn mode(&self, pin: Pin) -> Result<PinMode> {
        let PortBit { port, bit } = pin.resolve()?;
        Ok(self.inner.lock(|inner| inner.mode(port, bit)))
    }

    /// Apply a board routing table, stopping at the first pin that fails.
    pub fn apply(&self, table: &[PinConfig]) -> Result<()> {
        for config in table {
            if config.bidirectional {
                self.set_bidirection(config.pin, true)?;
            }
            self.assign(config.pin, config.mode, config.direction)?;
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // GPIO
    //----------------------------------------------------------------------------------------------

    /// Current input level of `pin`.
    pub fn get(&self, pin: Pin) -> Result<bool> {
        let PortBit { port, bit } = pin.resolve()?;
        Ok(self.inner.lock(|inner| inner.level(port, bit)))
    }

    /// Drive `pin` high or low. Takes effect once the pin is an output.
    pub fn set(&self, pin: Pin, level: bool) -> Result<()> {
        let PortBit { port, bit } = pin.resolve()?;
        reject_on_port0(port, Direction::Out.describe())?;

        self.inner.lock(|inner| inner.set_level(port, bit, level));
        Ok(())
    }

    /// Make `pin` a GPIO input. Port 0 pins always are.
    pub fn direction_input(&self, pin: Pin) -> Result<()> {
        let PortBit { port, bit } = pin.resolve()?;
        if port == 0 {
            return Ok(());
        }

        self.inner
            .lock(|inner| inner.set_direction(port, bit, Direction::In));
        Ok(())
    }

    /// Make `pin` a GPIO output, latching `level` first so it never glitches.
    pub fn direction_output(&self, pin: Pin, level: bool) -> Result<()> {
        let PortBit { port, bit } = pin.resolve()?;
        reject_on_port0(port, Direction::Out.describe())?;

        self.inner.lock(|inner| {
            inner.set_level(port, bit, level);
            inner.set_direction(port, bit, Direction::Out);
        });
        Ok(())
    }
}

/// One entry of a board pin routing table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PinConfig {
    pub pin: Pin,
    pub mode: PinMode,
    pub direction: Direction,
    /// Switch the bidirectional buffer on before assigning.
    pub bidirectional: bool,
}

impl PinConfig {
    pub const fn new(pin: Pin, mode: PinMode, direction: Direction) -> Self {
        Self {
            pin,
            mode,
            direction,
            bidirectional: false,
        }
    }

    pub const fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }
}

//--------------------------------------------------------------------------------------------------
// OS Interface Code
//--------------------------------------------------------------------------------------------------

impl drivers::interface::DeviceDriver for PinController {
    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
