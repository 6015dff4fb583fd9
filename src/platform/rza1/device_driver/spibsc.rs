/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 *
 * RZ/A1H Group User's Manual: Hardware, chapter "SPI Multi I/O Bus Controller".
 */

//! SPI multi I/O bus controller, driven in SPI operating mode.
//!
//! Every flash operation is issued as register-programmed phases. A command phase carries the
//! opcode and an optional 3- or 4-byte address, data phases move up to four bytes each through
//! SMWDR0/SMRDR0. Each phase is started through SMCR and then polled to completion on
//! CMNSR.TEND against a deadline taken from the driver's time manager.

use {
    super::common::MMIODerefWrapper,
    crate::{
        devices::{
            clock::ClockProvider,
            spi::{Message, SpiDevice, SpiMaster, SpiMode},
        },
        drivers, info,
        sync::{interface::Mutex, SpinLock},
        time::interface::TimeManager,
        warn,
    },
    core::time::Duration,
    snafu::{ensure, OptionExt, Snafu},
    tock_registers::{
        fields::FieldValue,
        interfaces::{Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadOnly, ReadWrite},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// Common control
    CMNCR [
        /// Operating mode, 1 = SPI mode
        MD OFFSET(31) NUMBITS(1) [],
        /// Data swap disable
        SFDE OFFSET(24) NUMBITS(1) [],
        MOIIO3 OFFSET(22) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        MOIIO2 OFFSET(20) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        MOIIO1 OFFSET(18) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        MOIIO0 OFFSET(16) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        IO3FV OFFSET(14) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        IO2FV OFFSET(12) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        IO0FV OFFSET(8) NUMBITS(2) [
            Low = 0,
            High = 1,
            Previous = 2,
            HiZ = 3
        ],
        CPHAT OFFSET(6) NUMBITS(1) [],
        CPHAR OFFSET(5) NUMBITS(1) [],
        SSLP OFFSET(4) NUMBITS(1) [],
        CPOL OFFSET(3) NUMBITS(1) [],
        BSZ OFFSET(0) NUMBITS(2) [
            Single = 0,
            Dual = 1
        ]
    ],

    /// SSL delay, in SPBCLK cycles minus one
    SSLDR [
        SPNDL OFFSET(16) NUMBITS(3) [],
        SLNDL OFFSET(8) NUMBITS(3) [],
        SCKDL OFFSET(0) NUMBITS(3) []
    ],

    /// Bit rate: SPBCLK = B / (2 * SPBR * 2^BRDV)
    SPBCR [
        SPBR OFFSET(8) NUMBITS(8) [],
        BRDV OFFSET(0) NUMBITS(2) []
    ],

    /// Data read control (external address space read mode)
    DRCR [
        SSLN OFFSET(24) NUMBITS(1) [],
        RBURST OFFSET(16) NUMBITS(4) [],
        /// Read cache flush
        RCF OFFSET(9) NUMBITS(1) [],
        RBE OFFSET(8) NUMBITS(1) [],
        SSLE OFFSET(0) NUMBITS(1) []
    ],

    /// SPI mode control
    SMCR [
        /// Keep SSL asserted after the transfer
        SSLKP OFFSET(8) NUMBITS(1) [],
        SPIRE OFFSET(2) NUMBITS(1) [],
        SPIWE OFFSET(1) NUMBITS(1) [],
        /// Start the transfer
        SPIE OFFSET(0) NUMBITS(1) []
    ],

    /// SPI mode command setting
    SMCMR [
        CMD OFFSET(16) NUMBITS(8) [],
        OCMD OFFSET(0) NUMBITS(8) []
    ],

    /// SPI mode enable setting
    SMENR [
        CDB OFFSET(30) NUMBITS(2) [
            OneBit = 0,
            TwoBit = 1,
            FourBit = 2
        ],
        OCDB OFFSET(28) NUMBITS(2) [],
        ADB OFFSET(24) NUMBITS(2) [
            OneBit = 0,
            TwoBit = 1,
            FourBit = 2
        ],
        OPDB OFFSET(20) NUMBITS(2) [],
        SPIDB OFFSET(16) NUMBITS(2) [],
        /// Dummy cycle enable
        DME OFFSET(15) NUMBITS(1) [],
        /// Command enable
        CDE OFFSET(14) NUMBITS(1) [],
        OCDE OFFSET(12) NUMBITS(1) [],
        /// Address enable
        ADE OFFSET(8) NUMBITS(4) [
            Disabled = 0x0,
            Bits23To0 = 0x7,
            Bits31To0 = 0xf
        ],
        OPDE OFFSET(4) NUMBITS(4) [],
        /// Transfer data enable
        SPIDE OFFSET(0) NUMBITS(4) [
            Disabled = 0x0,
            Bits8 = 0x8,
            Bits16 = 0xc,
            Bits24 = 0xe,
            Bits32 = 0xf
        ]
    ],

    /// Common status
    CMNSR [
        SSLF OFFSET(1) NUMBITS(1) [],
        /// Transfer end
        TEND OFFSET(0) NUMBITS(1) []
    ],

    /// SPI mode dummy cycle setting
    SMDMCR [
        DMDB OFFSET(16) NUMBITS(2) [
            OneBit = 0,
            TwoBit = 1,
            FourBit = 2
        ],
        /// Number of dummy cycles minus one
        DMCYC OFFSET(0) NUMBITS(3) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x00 => CMNCR: ReadWrite<u32, CMNCR::Register>),
        (0x04 => SSLDR: ReadWrite<u32, SSLDR::Register>),
        (0x08 => SPBCR: ReadWrite<u32, SPBCR::Register>),
        (0x0c => DRCR: ReadWrite<u32, DRCR::Register>),
        (0x10 => __reserved_1),
        (0x20 => SMCR: ReadWrite<u32, SMCR::Register>),
        (0x24 => SMCMR: ReadWrite<u32, SMCMR::Register>),
        (0x28 => SMADR: ReadWrite<u32>),
        (0x2c => SMOPR: ReadWrite<u32>),
        (0x30 => SMENR: ReadWrite<u32, SMENR::Register>),
        (0x34 => __reserved_2),
        (0x38 => SMRDR0: ReadOnly<u32>),
        (0x3c => SMRDR1: ReadOnly<u32>),
        (0x40 => SMWDR0: ReadWrite<u32>),
        (0x44 => SMWDR1: ReadWrite<u32>),
        (0x48 => CMNSR: ReadOnly<u32, CMNSR::Register>),
        (0x4c => __reserved_3),
        (0x60 => SMDMCR: ReadWrite<u32, SMDMCR::Register>),
        (0x64 => SMDRENR: ReadWrite<u32>),
        (0x68 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

/// Data registers are one word wide.
const CHUNK_BYTES: usize = 4;

/// Commands whose data phase is wider than one line.
const WIDE_COMMANDS: [(u8, BusIo); 2] = [
    (
        opcode::QOR,
        BusIo {
            data_width: BusWidth::Quad,
            dummy_cycles: 8,
        },
    ),
    (
        opcode::QPP,
        BusIo {
            data_width: BusWidth::Quad,
            dummy_cycles: 0,
        },
    ),
];

struct SpibscInner {
    registers: Registers,
    time: &'static (dyn TimeManager + Sync),
    info: SpibscInfo,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Serial NOR flash opcodes the controller treats specially, and a few common ones.
pub mod opcode {
    /// Read identification
    pub const READ_ID: u8 = 0x9f;
    /// Page program, 3-byte address
    pub const PP: u8 = 0x02;
    /// Quad page program, 3-byte address
    pub const QPP: u8 = 0x32;
    pub const READ: u8 = 0x03;
    pub const FAST_READ: u8 = 0x0b;
    /// Dual output read
    pub const DOR: u8 = 0x3b;
    /// Quad output read
    pub const QOR: u8 = 0x6b;
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Read status register
    pub const RDSR: u8 = 0x05;
    /// Sector erase
    pub const SE: u8 = 0xd8;
}

/// Number of data lines used by a phase, encoded as in SMENR.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusWidth {
    Single = 0,
    Dual = 1,
    Quad = 2,
}

/// How the phases following a command use the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusIo {
    pub data_width: BusWidth,
    /// Idle cycles between the address and data phases.
    pub dummy_cycles: u8,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum SpibscError {
    #[snafu(display("Transfer did not end within {timeout:?}"))]
    PhaseTimeout { timeout: Duration },
    #[snafu(display("Command transfer carries no opcode"))]
    EmptyCommand,
    #[snafu(display("Only 8 bits per word are supported, not {bits}"))]
    BitsPerWord { bits: u8 },
    #[snafu(display("SPI mode {mode:?} is not supported"))]
    UnsupportedMode { mode: SpiMode },
}

pub type Result<T> = ::core::result::Result<T, SpibscError>;

/// Board-level configuration of one controller instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpibscInfo {
    pub bus_num: u16,
    /// Bound on every wait for a phase to end.
    pub timeout: Duration,
}

/// One controller instance. Every phase sequence runs with the register state locked, so a
/// shared instance never interleaves two sequences on the bus.
pub struct Spibsc {
    inner: SpinLock<SpibscInner>,
    clock: Option<&'static (dyn ClockProvider + Sync)>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl BusIo {
    pub const SINGLE: Self = Self {
        data_width: BusWidth::Single,
        dummy_cycles: 0,
    };

    /// Bus usage for the phases following `opcode`.
    pub fn for_command(opcode: u8) -> Self {
        WIDE_COMMANDS
            .iter()
            .find(|(wide, _)| *wide == opcode)
            .map_or(Self::SINGLE, |&(_, bus)| bus)
    }
}

/// Whether a command phase leaves SSL asserted for the phases after it.
pub fn keeps_chip_select(opcode: u8) -> bool {
    opcode != opcode::WREN && opcode != opcode::SE
}

/// Choose SPBR and BRDV so the bus clock derived from `rate_hz` stays at or below
/// `max_speed_hz`, preferring the smallest BRDV.
pub fn bit_rate_divisor(rate_hz: u32, max_speed_hz: u32) -> (u8, u8) {
    for brdv in 0..=3u8 {
        for spbr in 1..=u8::MAX {
            let divisor = (2 * u64::from(spbr)) << brdv;
            if u64::from(rate_hz) <= u64::from(max_speed_hz) * divisor {
                return (spbr, brdv);
            }
        }
    }
    (u8::MAX, 3)
}

impl SpibscInfo {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_micros(25_600);

    pub const fn new(bus_num: u16) -> Self {
        Self {
            bus_num,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

impl Default for SpibscInfo {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Spibsc {
    pub const COMPATIBLE: &'static str = "spibsc";

    /// Pause between two reads of CMNSR.
    pub const POLL_INTERVAL: Duration = Duration::from_nanos(100);

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(
        mmio_base_addr: usize,
        time: &'static (dyn TimeManager + Sync),
        info: SpibscInfo,
    ) -> Self {
        Self {
            inner: SpinLock::new(SpibscInner::new(mmio_base_addr, time, info)),
            clock: None,
        }
    }

    /// Derive the bus clock divisor from `clock` during setup.
    pub const fn with_clock(mut self, clock: &'static (dyn ClockProvider + Sync)) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn info(&self) -> SpibscInfo {
        self.inner.lock(|inner| inner.info)
    }

    /// Busy-wait until the controller reports the current transfer has ended.
    pub fn wait_transfer_end(&self) -> Result<()> {
        self.inner.lock(|inner| inner.wait_transfer_end())
    }

    /// Issue `command` (opcode, then address or a short payload) once the bus is idle.
    ///
    /// Returns the bus usage the following data phases should use.
    pub fn send_command(&self, command: &[u8]) -> Result<BusIo> {
        self.inner.lock(|inner| inner.send_command(command))
    }

    /// Send `data` over `width` lines once the bus is idle.
    pub fn send_data(&self, data: &[u8], width: BusWidth) -> Result<()> {
        self.inner.lock(|inner| inner.send_data(data, width))
    }

    /// Fill `data` from the bus over `width` lines once it is idle.
    pub fn receive_data(&self, data: &mut [u8], width: BusWidth) -> Result<()> {
        self.inner.lock(|inner| inner.receive_data(data, width))
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

/// Little-endian chunk with unused byte lanes forced high.
fn pack_chunk(chunk: &[u8]) -> u32 {
    let mut lanes = [0xff; CHUNK_BYTES];
    lanes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(lanes)
}

fn data_enable(bytes: usize) -> FieldValue<u32, SMENR::Register> {
    match bytes {
        1 => SMENR::SPIDE::Bits8,
        2 => SMENR::SPIDE::Bits16,
        3 => SMENR::SPIDE::Bits24,
        _ => SMENR::SPIDE::Bits32,
    }
}

impl SpibscInner {
    const unsafe fn new(
        mmio_base_addr: usize,
        time: &'static (dyn TimeManager + Sync),
        info: SpibscInfo,
    ) -> Self {
        Self {
            registers: Registers::new(mmio_base_addr),
            time,
            info,
        }
    }

    fn wait_transfer_end(&self) -> Result<()> {
        let deadline = self.time.uptime() + self.info.timeout;

        loop {
            if self.registers.CMNSR.is_set(CMNSR::TEND) {
                return Ok(());
            }
            if self.time.uptime() >= deadline {
                warn!(
                    "spibsc{}: transfer did not end within {:?}",
                    self.info.bus_num, self.info.timeout
                );
                return PhaseTimeoutSnafu {
                    timeout: self.info.timeout,
                }
                .fail();
            }
            self.time.spin_for(Spibsc::POLL_INTERVAL);
        }
    }

    fn send_command(&self, command: &[u8]) -> Result<BusIo> {
        ensure!(!command.is_empty(), EmptyCommandSnafu);
        self.wait_transfer_end()?;
        self.issue_command(command)
    }

    fn send_data(&self, data: &[u8], width: BusWidth) -> Result<()> {
        self.wait_transfer_end()?;
        self.issue_send(data, width)
    }

    fn receive_data(&self, data: &mut [u8], width: BusWidth) -> Result<()> {
        self.wait_transfer_end()?;
        self.issue_receive(data, width)
    }

    fn issue_command(&self, command: &[u8]) -> Result<BusIo> {
        let (&opcode, rest) = command.split_first().context(EmptyCommandSnafu)?;
        let bus = BusIo::for_command(opcode);
        let regs = &self.registers;

        let mut enables = SMENR::CDE::SET + SMENR::CDB::OneBit;
        let mut address = 0;
        let mut dummy_cycles = 0;

        let address_bytes = match rest.len() {
            3 => Some((SMENR::ADE::Bits23To0, &rest[..3])),
            n if n >= 4 => Some((SMENR::ADE::Bits31To0, &rest[..4])),
            _ => None,
        };
        if let Some((ade, bytes)) = address_bytes {
            address = bytes
                .iter()
                .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));
            enables += ade + SMENR::ADB::OneBit;

            if bus.dummy_cycles > 0 {
                enables += SMENR::DME::SET;
                dummy_cycles = bus.dummy_cycles - 1;
            }
        }

        regs.SMCMR.write(SMCMR::CMD.val(u32::from(opcode)));
        regs.SMADR.set(address);
        regs.SMOPR.set(0);
        regs.SMENR.write(enables);
        regs.SMDMCR
            .write(SMDMCR::DMDB::OneBit + SMDMCR::DMCYC.val(u32::from(dummy_cycles)));

        regs.SMCR.write(
            SMCR::SPIE::SET + SMCR::SSLKP.val(u32::from(keeps_chip_select(opcode))),
        );
        self.wait_transfer_end()?;

        // One or two bytes after the opcode are a payload, not an address.
        if (1..=2).contains(&rest.len()) {
            self.issue_send(rest, bus.data_width)?;
        }

        Ok(bus)
    }

    fn issue_send(&self, data: &[u8], width: BusWidth) -> Result<()> {
        let regs = &self.registers;
        let mut chunks = data.chunks(CHUNK_BYTES).peekable();

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();

            regs.SMWDR0.set(pack_chunk(chunk));
            regs.SMCMR.set(0);
            regs.SMADR.set(0);
            regs.SMOPR.set(0);
            regs.SMENR
                .write(data_enable(chunk.len()) + SMENR::SPIDB.val(width as u32));

            regs.SMCR.write(
                SMCR::SPIE::SET + SMCR::SPIWE::SET + SMCR::SSLKP.val(u32::from(!last)),
            );
            self.wait_transfer_end()?;
        }
        Ok(())
    }

    fn issue_receive(&self, data: &mut [u8], width: BusWidth) -> Result<()> {
        let regs = &self.registers;
        let mut chunks = data.chunks_mut(CHUNK_BYTES).peekable();

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();

            regs.SMCMR.set(0);
            regs.SMADR.set(0);
            regs.SMOPR.set(0);
            regs.SMENR
                .write(data_enable(chunk.len()) + SMENR::SPIDB.val(width as u32));

            // Single-line reads only clock in data with the write enable set as well.
            regs.SMCR.write(
                SMCR::SPIE::SET
                    + SMCR::SPIRE::SET
                    + SMCR::SPIWE.val(u32::from(width == BusWidth::Single))
                    + SMCR::SSLKP.val(u32::from(!last)),
            );
            self.wait_transfer_end()?;

            let word = regs.SMRDR0.get().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    /// Negate SSL with a throwaway status read.
    fn release_chip_select(&self) -> Result<()> {
        let bus = self.issue_command(&[opcode::RDSR])?;
        let mut status = [0u8; 1];
        self.issue_receive(&mut status, bus.data_width)
    }

    fn transfer(&self, message: &mut Message<'_, '_>) -> Result<()> {
        let mut cs_change = true;
        let mut bus = BusIo::SINGLE;
        let mut last_opcode = None;
        let mut result = Ok(());

        for transfer in message.transfers.iter_mut() {
            let step = if cs_change {
                let command = transfer.tx_buf.unwrap_or_default();
                last_opcode = command.first().copied();
                self.send_command(command).map(|io| bus = io)
            } else if let Some(tx) = transfer.tx_buf {
                self.send_data(tx, bus.data_width)
            } else if let Some(rx) = transfer.rx_buf.as_deref_mut() {
                self.receive_data(rx, bus.data_width)
            } else {
                Ok(())
            };

            if let Err(error) = step {
                result = Err(error);
                break;
            }
            cs_change = transfer.cs_change;
            message.actual_length += transfer.len();
        }

        // After a timeout the bus stays as the last phase programmed it.
        let timed_out = matches!(result, Err(SpibscError::PhaseTimeout { .. }));
        if !cs_change && !timed_out && last_opcode.map_or(true, keeps_chip_select) {
            let released = self.release_chip_select();
            if result.is_ok() {
                result = released;
            }
        }

        message.finalize(result.is_ok());
        result
    }

    fn program(&self, spbr: u8, brdv: u8) {
        let regs = &self.registers;
        regs.CMNCR.write(
            CMNCR::MD::SET
                + CMNCR::SFDE::SET
                + CMNCR::MOIIO3::HiZ
                + CMNCR::MOIIO2::HiZ
                + CMNCR::MOIIO1::HiZ
                + CMNCR::MOIIO0::HiZ
                + CMNCR::IO3FV::HiZ
                + CMNCR::IO2FV::HiZ
                + CMNCR::IO0FV::HiZ
                + CMNCR::CPHAR::SET
                + CMNCR::BSZ::Single,
        );
        regs.DRCR.write(DRCR::RCF::SET);
        regs.SSLDR
            .write(SSLDR::SPNDL.val(0) + SSLDR::SLNDL.val(0) + SSLDR::SCKDL.val(0));
        regs.SPBCR
            .write(SPBCR::SPBR.val(u32::from(spbr)) + SPBCR::BRDV.val(u32::from(brdv)));
    }
}

//--------------------------------------------------------------------------------------------------
// OS Interface Code
//--------------------------------------------------------------------------------------------------

impl drivers::interface::DeviceDriver for Spibsc {
    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }
}

impl SpiMaster for Spibsc {
    type Error = SpibscError;

    fn setup(&mut self, device: &SpiDevice) -> Result<()> {
        ensure!(
            device.bits_per_word == 8,
            BitsPerWordSnafu {
                bits: device.bits_per_word
            }
        );
        ensure!(
            (SpiMode::CPOL | SpiMode::CPHA).contains(device.mode),
            UnsupportedModeSnafu { mode: device.mode }
        );

        let (spbr, brdv) = match self.clock {
            Some(clock) if device.max_speed_hz > 0 => {
                bit_rate_divisor(clock.rate_hz(), device.max_speed_hz)
            }
            _ => (1, 0),
        };

        self.inner.lock(|inner| {
            inner.program(spbr, brdv);
            info!(
                "spibsc{}: {} set up, SPBR {} BRDV {}",
                inner.info.bus_num, device.modalias, spbr, brdv
            );
        });
        Ok(())
    }

    fn cleanup(&mut self, device: &SpiDevice) {
        info!("spibsc{}: {} cleanup", self.info().bus_num, device.modalias);
    }

    /// The first transfer, and any transfer following one with `cs_change` set, is a command.
    /// Other transfers are data phases using the bus width of the last command. If SSL is still
    /// held at the end, a status read releases it, unless a phase timed out.
    fn transfer_one_message(&mut self, message: &mut Message<'_, '_>) -> Result<()> {
        self.inner.lock(|inner| inner.transfer(message))
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            devices::{
                clock::FixedClock,
                spi::{MessageStatus, Transfer},
            },
            platform::rza1::{device_driver::common::tests::RegisterBank, Rza1Host},
            time::tests::SteppingClock,
        },
        core::sync::atomic::{AtomicUsize, Ordering},
        std::{boxed::Box, sync::Mutex, thread, vec::Vec},
    };

    const CMNCR_OFF: usize = 0x00;
    const SSLDR_OFF: usize = 0x04;
    const SPBCR_OFF: usize = 0x08;
    const DRCR_OFF: usize = 0x0c;
    const SMCR_OFF: usize = 0x20;
    const SMCMR_OFF: usize = 0x24;
    const SMADR_OFF: usize = 0x28;
    const SMENR_OFF: usize = 0x30;
    const SMRDR0_OFF: usize = 0x38;
    const SMWDR0_OFF: usize = 0x40;
    const CMNSR_OFF: usize = 0x48;
    const SMDMCR_OFF: usize = 0x60;

    const SSLKP: u32 = 1 << 8;
    const SPIRE: u32 = 1 << 2;
    const SPIWE: u32 = 1 << 1;
    const SPIE: u32 = 1 << 0;

    const DME: u32 = 1 << 15;
    const CDE: u32 = 1 << 14;
    const ADE_24: u32 = 0x7 << 8;
    const ADE_32: u32 = 0xf << 8;
    const QUAD_DATA: u32 = 2 << 16;
    const QUAD_BYTE: u32 = QUAD_DATA | 0x8;
    const SPIE_SPIWE: u32 = SPIE | SPIWE;

    /// Registers as they stood each time the driver started waiting on the bus.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct Phase {
        smcr: u32,
        smcmr: u32,
        smadr: u32,
        smenr: u32,
        smdmcr: u32,
        smwdr0: u32,
    }

    /// Time manager that never advances but snapshots the phase registers on every read.
    struct RegisterTrace {
        base: usize,
        phases: Mutex<Vec<Phase>>,
    }

    impl RegisterTrace {
        fn leak(bank: &RegisterBank) -> &'static Self {
            Box::leak(Box::new(Self {
                base: bank.base_addr(),
                phases: Mutex::new(Vec::new()),
            }))
        }

        fn read(&self, offset: usize) -> u32 {
            unsafe { ((self.base + offset) as *const u32).read_volatile() }
        }

        fn phases(&self) -> Vec<Phase> {
            self.phases.lock().unwrap().clone()
        }

        /// Opcodes of the command phases, in issue order.
        fn commands(&self) -> Vec<u8> {
            let mut opcodes: Vec<u8> = self
                .phases()
                .iter()
                .filter(|phase| phase.smcmr != 0)
                .map(|phase| (phase.smcmr >> 16) as u8)
                .collect();
            opcodes.dedup();
            opcodes
        }
    }

    impl TimeManager for RegisterTrace {
        fn resolution(&self) -> Duration {
            Duration::from_nanos(1)
        }

        fn uptime(&self) -> Duration {
            let phase = Phase {
                smcr: self.read(SMCR_OFF),
                smcmr: self.read(SMCMR_OFF),
                smadr: self.read(SMADR_OFF),
                smenr: self.read(SMENR_OFF),
                smdmcr: self.read(SMDMCR_OFF),
                smwdr0: self.read(SMWDR0_OFF),
            };
            self.phases.lock().unwrap().push(phase);
            Duration::ZERO
        }

        fn spin_for(&self, _duration: Duration) {}
    }

    struct Fixture {
        bank: RegisterBank,
        trace: &'static RegisterTrace,
        spibsc: Spibsc,
    }

    /// A controller whose transfers always end immediately.
    fn fixture() -> Fixture {
        let bank = RegisterBank::new(Rza1Host::spibsc_window_size());
        bank.write(CMNSR_OFF, 1);
        let trace = RegisterTrace::leak(&bank);
        let spibsc = unsafe { Spibsc::new(bank.base_addr(), trace, SpibscInfo::new(0)) };
        Fixture {
            bank,
            trace,
            spibsc,
        }
    }

    /// A controller that never reports a transfer end.
    fn stuck(timeout: Duration) -> (RegisterBank, &'static SteppingClock, Spibsc) {
        let bank = RegisterBank::new(Rza1Host::spibsc_window_size());
        let clock = SteppingClock::leak();
        let info = SpibscInfo {
            bus_num: 1,
            timeout,
        };
        let spibsc = unsafe { Spibsc::new(bank.base_addr(), clock, info) };
        (bank, clock, spibsc)
    }

    /// Stepping clock that clears CMNSR.TEND on its `reads`-th read.
    struct TransferEndsFor {
        base: usize,
        reads_left: AtomicUsize,
        clock: SteppingClock,
    }

    impl TimeManager for TransferEndsFor {
        fn resolution(&self) -> Duration {
            self.clock.resolution()
        }

        fn uptime(&self) -> Duration {
            if self.reads_left.fetch_sub(1, Ordering::Relaxed) == 1 {
                unsafe { ((self.base + CMNSR_OFF) as *mut u32).write_volatile(0) };
            }
            self.clock.uptime()
        }

        fn spin_for(&self, duration: Duration) {
            self.clock.spin_for(duration);
        }
    }

    /// A controller that stops ending transfers at the `reads`-th time read.
    ///
    /// A wait that sees TEND reads the time once, for its deadline.
    fn ends_for(
        reads: usize,
        timeout: Duration,
    ) -> (RegisterBank, &'static TransferEndsFor, Spibsc) {
        let bank = RegisterBank::new(Rza1Host::spibsc_window_size());
        bank.write(CMNSR_OFF, 1);
        let time: &'static TransferEndsFor = Box::leak(Box::new(TransferEndsFor {
            base: bank.base_addr(),
            reads_left: AtomicUsize::new(reads),
            clock: SteppingClock::new(),
        }));
        let info = SpibscInfo {
            bus_num: 2,
            timeout,
        };
        let spibsc = unsafe { Spibsc::new(bank.base_addr(), time, info) };
        (bank, time, spibsc)
    }

    #[test]
    fn classification_is_table_driven() {
        let quad_read = BusIo::for_command(0x6b);
        assert_eq!(quad_read.data_width, BusWidth::Quad);
        assert_eq!(quad_read.dummy_cycles, 8);

        let quad_program = BusIo::for_command(0x32);
        assert_eq!(quad_program.data_width, BusWidth::Quad);
        assert_eq!(quad_program.dummy_cycles, 0);

        for op in [
            opcode::READ_ID,
            opcode::PP,
            opcode::READ,
            opcode::FAST_READ,
            opcode::DOR,
            opcode::WREN,
            opcode::RDSR,
            opcode::SE,
            0x00,
            0xff,
        ] {
            assert_eq!(BusIo::for_command(op), BusIo::SINGLE, "opcode {op:#04x}");
        }
    }

    #[test]
    fn chunks_pad_unused_lanes_high() {
        assert_eq!(pack_chunk(&[0x01, 0x02, 0x03, 0x04]), 0x0403_0201);
        assert_eq!(pack_chunk(&[0xaa, 0xbb, 0xcc]), 0xffcc_bbaa);
        assert_eq!(pack_chunk(&[0xaa, 0xbb]), 0xffff_bbaa);
        assert_eq!(pack_chunk(&[0x05]), 0xffff_ff05);
    }

    #[test]
    fn three_byte_send_enables_24_bits() {
        let f = fixture();

        f.spibsc.send_data(&[0xaa, 0xbb, 0xcc], BusWidth::Single).unwrap();

        assert_eq!(f.bank.read(SMENR_OFF), 0xe);
        assert_eq!(f.bank.read(SMWDR0_OFF), 0xffcc_bbaa);
        assert_eq!(f.bank.read(SMCR_OFF), SPIE | SPIWE);
    }

    #[test]
    fn five_byte_send_splits_into_word_then_byte() {
        let f = fixture();

        f.spibsc
            .send_data(&[0x01, 0x02, 0x03, 0x04, 0x05], BusWidth::Single)
            .unwrap();

        // The first snapshot is the wait for the bus to go idle.
        let phases = f.trace.phases();
        assert_eq!(phases.len(), 3);

        assert_eq!(phases[1].smwdr0, 0x0403_0201);
        assert_eq!(phases[1].smenr, 0xf);
        assert_eq!(phases[1].smcr, SPIE | SPIWE | SSLKP);

        assert_eq!(phases[2].smwdr0, 0xffff_ff05);
        assert_eq!(phases[2].smenr, 0x8);
        assert_eq!(phases[2].smcr, SPIE | SPIWE);
        assert_eq!(phases[2].smcmr, 0);
    }

    #[test]
    fn quad_send_sets_data_bus_width() {
        let f = fixture();

        f.spibsc.send_data(&[0xde, 0xad], BusWidth::Quad).unwrap();

        assert_eq!(f.bank.read(SMENR_OFF), QUAD_DATA | 0xc);
        assert_eq!(f.bank.read(SMWDR0_OFF), 0xffff_adde);
    }

    #[test]
    fn write_enable_and_erase_release_chip_select() {
        let f = fixture();

        f.spibsc.send_command(&[opcode::WREN]).unwrap();
        assert_eq!(f.bank.read(SMCR_OFF), SPIE);

        f.spibsc.send_command(&[opcode::SE, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(f.bank.read(SMCR_OFF), SPIE);
        assert_eq!(f.bank.read(SMCMR_OFF), 0xd8 << 16);
        assert_eq!(f.bank.read(SMADR_OFF), 0x00_0100);
        assert_eq!(f.bank.read(SMENR_OFF), CDE | ADE_24);

        f.spibsc.send_command(&[opcode::READ_ID]).unwrap();
        assert_eq!(f.bank.read(SMCR_OFF), SPIE | SSLKP);
        assert_eq!(f.bank.read(SMENR_OFF), CDE);
        assert_eq!(f.bank.read(SMADR_OFF), 0);
    }

    #[test]
    fn quad_read_with_address_inserts_dummy_cycles() {
        let f = fixture();

        let bus = f.spibsc.send_command(&[0x6b, 0x12, 0x34, 0x56]).unwrap();

        assert_eq!(bus.data_width, BusWidth::Quad);
        assert_eq!(f.bank.read(SMCMR_OFF), 0x6b << 16);
        assert_eq!(f.bank.read(SMADR_OFF), 0x12_3456);
        assert_eq!(f.bank.read(SMENR_OFF), CDE | ADE_24 | DME);
        assert_eq!(f.bank.read(SMDMCR_OFF), 7);
        assert_eq!(f.bank.read(SMCR_OFF), SPIE | SSLKP);
    }

    #[test]
    fn dummy_cycles_need_an_address() {
        let f = fixture();
        f.bank.write(SMDMCR_OFF, 0x5);

        f.spibsc.send_command(&[0x6b]).unwrap();

        assert_eq!(f.bank.read(SMENR_OFF), CDE);
        assert_eq!(f.bank.read(SMDMCR_OFF), 0);
    }

    #[test]
    fn four_byte_address_ignores_trailing_bytes() {
        let f = fixture();

        f.spibsc
            .send_command(&[0x13, 0x01, 0x02, 0x03, 0x04, 0xee, 0xee])
            .unwrap();

        assert_eq!(f.bank.read(SMADR_OFF), 0x0102_0304);
        assert_eq!(f.bank.read(SMENR_OFF), CDE | ADE_32);
        assert_eq!(f.trace.phases().len(), 2);
    }

    #[test]
    fn short_payload_follows_the_command() {
        let f = fixture();

        f.spibsc.send_command(&[0x01, 0x02]).unwrap();

        let phases = f.trace.phases();
        assert_eq!(phases.len(), 3);

        assert_eq!(phases[1].smcmr, 0x01 << 16);
        assert_eq!(phases[1].smadr, 0);
        assert_eq!(phases[1].smdmcr, 0);
        assert_eq!(phases[1].smenr, CDE);
        assert_eq!(phases[1].smcr, SPIE | SSLKP);

        assert_eq!(phases[2].smcmr, 0);
        assert_eq!(phases[2].smwdr0, 0xffff_ff02);
        assert_eq!(phases[2].smenr, 0x8);
        assert_eq!(phases[2].smcr, SPIE | SPIWE);
    }

    #[test]
    fn empty_command_is_rejected_before_touching_the_bus() {
        let f = fixture();

        assert_eq!(f.spibsc.send_command(&[]), Err(SpibscError::EmptyCommand));
        assert!(f.trace.phases().is_empty());
        assert_eq!(f.bank.dirty_words(), vec![CMNSR_OFF]);
    }

    #[test]
    fn receive_unpacks_little_endian() {
        let f = fixture();
        f.bank.write(SMRDR0_OFF, 0x4433_2211);

        let mut buf = [0u8; 6];
        f.spibsc.receive_data(&mut buf, BusWidth::Single).unwrap();

        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44, 0x11, 0x22]);

        let phases = f.trace.phases();
        assert_eq!(phases[1].smenr, 0xf);
        assert_eq!(phases[1].smcr, SPIE | SPIRE | SPIWE | SSLKP);
        assert_eq!(phases[2].smenr, 0xc);
        assert_eq!(phases[2].smcr, SPIE | SPIRE | SPIWE);
    }

    #[test]
    fn wide_receive_drops_write_enable() {
        let f = fixture();
        f.bank.write(SMRDR0_OFF, 0x0000_00c2);

        let mut buf = [0u8; 1];
        f.spibsc.receive_data(&mut buf, BusWidth::Quad).unwrap();

        assert_eq!(buf, [0xc2]);
        assert_eq!(f.bank.read(SMCR_OFF), SPIE | SPIRE);
        assert_eq!(f.bank.read(SMENR_OFF), QUAD_DATA | 0x8);
    }

    #[test]
    fn wait_times_out_after_the_bound() {
        let (_bank, clock, spibsc) = stuck(SpibscInfo::DEFAULT_TIMEOUT);
        let start = clock.uptime();

        assert_eq!(
            spibsc.wait_transfer_end(),
            Err(SpibscError::PhaseTimeout {
                timeout: Duration::from_micros(25_600)
            })
        );

        let elapsed = clock.uptime() - start;
        assert!(elapsed >= SpibscInfo::DEFAULT_TIMEOUT);
        assert!(elapsed < SpibscInfo::DEFAULT_TIMEOUT + 2 * Spibsc::POLL_INTERVAL);
    }

    #[test]
    fn wait_returns_as_soon_as_transfer_ends() {
        let (bank, clock, spibsc) = stuck(Duration::from_micros(10));
        bank.write(CMNSR_OFF, 0b11);

        assert_eq!(spibsc.wait_transfer_end(), Ok(()));
        assert_eq!(clock.uptime(), Duration::ZERO);
    }

    #[test]
    fn command_then_quad_read_releases_chip_select() {
        let mut f = fixture();
        f.bank.write(SMRDR0_OFF, 0xddcc_bbaa);

        let command = [0x6b, 0x00, 0x10, 0x00];
        let mut data = [0u8; 4];
        let mut transfers = [Transfer::write(&command), Transfer::read(&mut data)];
        let mut message = Message::new(&mut transfers);

        f.spibsc.transfer_one_message(&mut message).unwrap();

        assert_eq!(message.status, MessageStatus::Complete);
        assert_eq!(message.actual_length, 8);
        drop(message);
        assert_eq!(data, [0xaa, 0xbb, 0xcc, 0xdd]);

        // idle, command, idle, data, release command, release data
        let phases = f.trace.phases();
        assert_eq!(phases.len(), 6);
        assert_eq!(phases[3].smenr, QUAD_DATA | 0xf);
        assert_eq!(phases[3].smcr, SPIE | SPIRE);
        assert_eq!(phases[4].smcmr, u32::from(opcode::RDSR) << 16);
        assert_eq!(phases[4].smcr, SPIE | SSLKP);
        assert_eq!(phases[5].smenr, 0x8);
        assert_eq!(phases[5].smcr, SPIE | SPIRE | SPIWE);
    }

    #[test]
    fn write_enable_message_needs_no_release() {
        let mut f = fixture();

        let mut transfers = [Transfer::write(&[opcode::WREN])];
        let mut message = Message::new(&mut transfers);
        f.spibsc.transfer_one_message(&mut message).unwrap();

        assert_eq!(message.status, MessageStatus::Complete);
        assert_eq!(message.actual_length, 1);
        assert_eq!(f.trace.commands(), vec![opcode::WREN]);
    }

    #[test]
    fn cs_change_starts_a_new_command() {
        let mut f = fixture();

        let program = [opcode::PP, 0x00, 0x20, 0x00];
        let payload = [0x5a; 6];
        let mut transfers = [
            Transfer::write(&[opcode::WREN]).with_cs_change(true),
            Transfer::write(&program),
            Transfer::write(&payload),
        ];
        let mut message = Message::new(&mut transfers);
        f.spibsc.transfer_one_message(&mut message).unwrap();

        assert_eq!(message.actual_length, 11);
        assert_eq!(
            f.trace.commands(),
            vec![opcode::WREN, opcode::PP, opcode::RDSR]
        );
        assert!(f
            .trace
            .phases()
            .iter()
            .any(|phase| phase.smwdr0 == 0x5a5a_5a5a && phase.smcr == SPIE | SPIWE | SSLKP));
    }

    #[test]
    fn message_without_command_bytes_fails() {
        let mut f = fixture();

        let mut transfers = [Transfer::write(&[])];
        let mut message = Message::new(&mut transfers);

        assert_eq!(
            f.spibsc.transfer_one_message(&mut message),
            Err(SpibscError::EmptyCommand)
        );
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.actual_length, 0);
    }

    #[test]
    fn timeout_aborts_and_finalizes_the_message() {
        let (bank, _clock, mut spibsc) = stuck(Duration::from_micros(1));

        let mut data = [0u8; 2];
        let mut transfers = [
            Transfer::write(&[opcode::READ, 0, 0, 0]),
            Transfer::read(&mut data),
        ];
        let mut message = Message::new(&mut transfers);

        assert_eq!(
            spibsc.transfer_one_message(&mut message),
            Err(SpibscError::PhaseTimeout {
                timeout: Duration::from_micros(1)
            })
        );
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.actual_length, 0);
        // Nothing was issued: the bus never went idle.
        assert_eq!(bank.read(SMCMR_OFF), 0);
    }

    #[test]
    fn timeout_after_the_command_skips_the_remaining_transfers() {
        let timeout = Duration::from_micros(10);
        // Idle wait and command wait succeed, the wait before the read does not.
        let (bank, _time, mut spibsc) = ends_for(3, timeout);

        let mut data = [0u8; 4];
        let mut transfers = [
            Transfer::write(&[opcode::READ, 0x00, 0x40, 0x00]),
            Transfer::read(&mut data),
            Transfer::write(&[0xa5, 0x5a]),
        ];
        let mut message = Message::new(&mut transfers);

        assert_eq!(
            spibsc.transfer_one_message(&mut message),
            Err(SpibscError::PhaseTimeout { timeout })
        );
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.actual_length, 4);
        assert_eq!(bank.read(SMADR_OFF), 0x00_4000);
        assert_eq!(bank.read(SMWDR0_OFF), 0);
    }

    #[test]
    fn timed_out_message_leaves_chip_select_alone() {
        let timeout = Duration::from_micros(10);
        let (bank, time, mut spibsc) = ends_for(3, timeout);

        let mut data = [0u8; 4];
        let mut transfers = [
            Transfer::write(&[opcode::READ, 0, 0, 0]),
            Transfer::read(&mut data),
        ];
        let mut message = Message::new(&mut transfers);

        assert_eq!(
            spibsc.transfer_one_message(&mut message),
            Err(SpibscError::PhaseTimeout { timeout })
        );

        // No status read went out to negate SSL.
        assert_eq!(bank.read(SMCMR_OFF), u32::from(opcode::READ) << 16);
        assert_eq!(bank.read(SMCR_OFF), SPIE | SSLKP);
        // One bounded wait, not two.
        assert!(time.clock.uptime() < timeout + 2 * Spibsc::POLL_INTERVAL);
    }

    #[test]
    fn shared_controller_runs_one_sequence_at_a_time() {
        const ROUNDS: usize = 200;
        let f = fixture();
        let spibsc = &f.spibsc;

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    spibsc.send_data(&[0x11; 4], BusWidth::Single).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    spibsc.send_data(&[0x22], BusWidth::Quad).unwrap();
                }
            });
        });

        // Every snapshot shows the registers of a single phase, never a blend of both.
        let phases = f.trace.phases();
        assert_eq!(phases.len(), 2 * 2 * ROUNDS);
        for phase in phases {
            assert!(
                matches!(
                    (phase.smwdr0, phase.smenr, phase.smcr),
                    (0, 0, 0)
                        | (0x1111_1111, 0xf, SPIE_SPIWE)
                        | (0xffff_ff22, QUAD_BYTE, SPIE_SPIWE)
                ),
                "{phase:?}"
            );
        }
    }

    #[test]
    fn setup_programs_controller_defaults() {
        let mut f = fixture();

        let mut device = SpiDevice::new("s25fl512s");
        device.mode = SpiMode::MODE_3;
        f.spibsc.setup(&device).unwrap();

        assert_eq!(f.bank.read(CMNCR_OFF), 0x81ff_f320);
        assert_eq!(f.bank.read(DRCR_OFF), 1 << 9);
        assert_eq!(f.bank.read(SSLDR_OFF), 0);
        assert_eq!(f.bank.read(SPBCR_OFF), 0x0100);
    }

    #[test]
    fn setup_rejects_unsupported_devices() {
        let mut f = fixture();

        let mut device = SpiDevice::new("wide");
        device.bits_per_word = 16;
        assert_eq!(
            f.spibsc.setup(&device),
            Err(SpibscError::BitsPerWord { bits: 16 })
        );

        let mut device = SpiDevice::new("inverted");
        device.mode = SpiMode::CS_HIGH;
        assert_eq!(
            f.spibsc.setup(&device),
            Err(SpibscError::UnsupportedMode {
                mode: SpiMode::CS_HIGH
            })
        );

        assert_eq!(f.bank.dirty_words(), vec![CMNSR_OFF]);
    }

    #[test]
    fn setup_derives_divisor_from_clock() {
        static P1_CLOCK: FixedClock = FixedClock(66_666_666);

        let f = fixture();
        let mut spibsc = unsafe {
            Spibsc::new(f.bank.base_addr(), f.trace, SpibscInfo::new(0)).with_clock(&P1_CLOCK)
        };

        let mut device = SpiDevice::new("flash");
        device.max_speed_hz = 10_000_000;
        spibsc.setup(&device).unwrap();

        assert_eq!(f.bank.read(SPBCR_OFF), 4 << 8);
    }

    #[test]
    fn divisor_prefers_smallest_prescaler() {
        assert_eq!(bit_rate_divisor(66_666_666, 33_333_333), (1, 0));
        assert_eq!(bit_rate_divisor(66_666_666, 40_000_000), (1, 0));
        assert_eq!(bit_rate_divisor(66_666_666, 10_000_000), (4, 0));
        assert_eq!(bit_rate_divisor(66_666_666, 100_000), (167, 1));
        assert_eq!(bit_rate_divisor(66_666_666, 1), (255, 3));
    }

    #[test]
    fn reports_compatible_string() {
        use crate::drivers::interface::DeviceDriver;
        let f = fixture();
        assert_eq!(f.spibsc.compatible(), "spibsc");
    }
}
