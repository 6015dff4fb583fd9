/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! SPI master interface.
//!
//! A [`Message`] is a sequence of [`Transfer`]s executed while the bus stays owned by one device.
//! How `cs_change` on a transfer is interpreted is up to the controller driver.

use bitflags::bitflags;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

bitflags! {
    /// Clock and chip-select behaviour requested by a device.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SpiMode: u16 {
        /// Clock phase.
        const CPHA = 0x01;
        /// Clock polarity.
        const CPOL = 0x02;
        const CS_HIGH = 0x04;
        const LSB_FIRST = 0x08;
        const THREE_WIRE = 0x10;
        const LOOP = 0x20;
        const NO_CS = 0x40;
        const READY = 0x80;
    }
}

/// A device sitting on an SPI bus.
#[derive(Debug, Clone)]
pub struct SpiDevice {
    pub modalias: &'static str,
    pub bits_per_word: u8,
    pub mode: SpiMode,
    /// Upper bound on the bus clock, 0 for "as fast as the controller goes".
    pub max_speed_hz: u32,
}

/// One buffer's worth of bus activity.
#[derive(Debug)]
pub struct Transfer<'a> {
    pub tx_buf: Option<&'a [u8]>,
    pub rx_buf: Option<&'a mut [u8]>,
    pub cs_change: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Queued,
    Complete,
    Failed,
}

#[derive(Debug)]
pub struct Message<'t, 'a> {
    pub transfers: &'t mut [Transfer<'a>],
    /// Bytes moved by the transfers that completed.
    pub actual_length: usize,
    pub status: MessageStatus,
}

/// Callbacks a bus controller driver provides to the SPI core.
pub trait SpiMaster {
    type Error;

    /// Configure the controller for `device`.
    fn setup(&mut self, device: &SpiDevice) -> Result<(), Self::Error>;

    /// Undo `setup`. The default implementation does nothing.
    fn cleanup(&mut self, _device: &SpiDevice) {}

    /// Run every transfer of `message`, then finalize it.
    ///
    /// The message is marked [`MessageStatus::Complete`] or [`MessageStatus::Failed`] before
    /// returning, whatever the outcome.
    fn transfer_one_message(&mut self, message: &mut Message<'_, '_>) -> Result<(), Self::Error>;
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl SpiMode {
    pub const MODE_0: Self = Self::empty();
    pub const MODE_3: Self = Self::CPOL.union(Self::CPHA);
}

impl SpiDevice {
    pub const fn new(modalias: &'static str) -> Self {
        Self {
            modalias,
            bits_per_word: 8,
            mode: SpiMode::MODE_0,
            max_speed_hz: 0,
        }
    }
}

impl<'a> Transfer<'a> {
    pub fn write(tx: &'a [u8]) -> Self {
        Self {
            tx_buf: Some(tx),
            rx_buf: None,
            cs_change: false,
        }
    }

    pub fn read(rx: &'a mut [u8]) -> Self {
        Self {
            tx_buf: None,
            rx_buf: Some(rx),
            cs_change: false,
        }
    }

    pub fn with_cs_change(mut self, cs_change: bool) -> Self {
        self.cs_change = cs_change;
        self
    }

    /// Transfer length, taken from whichever buffer is present (tx first).
    pub fn len(&self) -> usize {
        match (&self.tx_buf, &self.rx_buf) {
            (Some(tx), _) => tx.len(),
            (None, Some(rx)) => rx.len(),
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'t, 'a> Message<'t, 'a> {
    pub fn new(transfers: &'t mut [Transfer<'a>]) -> Self {
        Self {
            transfers,
            actual_length: 0,
            status: MessageStatus::Queued,
        }
    }

    /// Hand the message back to its submitter with the final status.
    pub fn finalize(&mut self, succeeded: bool) {
        self.status = if succeeded {
            MessageStatus::Complete
        } else {
            MessageStatus::Failed
        };
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
