//! Register offsets and bit definitions for the SPI controller.
//!
//! All offsets are byte offsets from the instance's base address. Every
//! register is accessed as a full 32-bit word; the transmit and receive
//! data registers carry one byte per access in their low eight bits.

use bitflags::bitflags;

/// Configuration register.
pub const CR_OFFSET: usize = 0x00;
/// Interrupt status register. The fault flags are write-1-to-clear.
pub const SR_OFFSET: usize = 0x04;
/// Interrupt enable register. Writing 1 unmasks the corresponding source.
pub const IER_OFFSET: usize = 0x08;
/// Interrupt disable register. Writing 1 masks the corresponding source.
pub const IDR_OFFSET: usize = 0x0C;
/// Interrupt mask register (read-only view of the enabled sources).
pub const IMR_OFFSET: usize = 0x10;
/// Device enable register. Bit 0 enables the controller.
pub const ER_OFFSET: usize = 0x14;
/// Transmit data register. A write pushes one byte into the TX FIFO.
pub const TXD_OFFSET: usize = 0x1C;
/// Receive data register. A read pops one byte from the RX FIFO.
pub const RXD_OFFSET: usize = 0x20;
/// TX FIFO threshold register. The threshold-crossed status asserts when
/// the TX FIFO occupancy drops below this value. Resets to 1.
pub const TXWR_OFFSET: usize = 0x28;

/// Depth of both hardware FIFOs, in bytes.
pub const FIFO_DEPTH: usize = 128;

/// Device enable bit in the enable register.
pub const ER_ENABLE: u32 = 0x0000_0001;

/// Reset value of the TX FIFO threshold register.
pub const TXWR_RESET_VALUE: u32 = 0x0000_0001;

/// Shift of the slave select field within the configuration register.
pub const SS_SHIFT: u32 = 10;
/// Maximum raw value of the (one-hot-low) slave select field.
pub const SS_FIELD_MAX: u32 = 0xF;
/// Slave select field mask within the configuration register.
pub const SS_FIELD_MASK: u32 = SS_FIELD_MAX << SS_SHIFT;
/// Highest decoded slave select line index.
pub const SS_MAX_INDEX: u8 = 2;

bitflags! {
    /// Configuration register bits.
    ///
    /// The slave select field (bits 10..=13) is not represented here; it
    /// is a multi-bit field manipulated through [`SS_FIELD_MASK`] and
    /// [`SS_SHIFT`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u32 {
        /// Master role select.
        const MASTER_ENABLE    = 1 << 0;
        /// Clock polarity (idle high when set).
        const CLK_POLARITY     = 1 << 1;
        /// Clock phase (sample on second edge when set).
        const CLK_PHASE        = 1 << 2;
        /// Slave select decode enable.
        const SELECT_DECODE    = 1 << 9;
        /// Software-driven (manual) chip select.
        const MANUAL_CS        = 1 << 14;
        /// Manual transmission start enable.
        const MANUAL_START_EN  = 1 << 15;
        /// Manual transmission start trigger. Self-clearing.
        const MANUAL_START     = 1 << 16;
        /// Mode-fail generation enable. Set at reset.
        const MODE_FAIL_GEN    = 1 << 17;
    }
}

impl Control {
    /// Power-on state of the configuration register.
    pub const RESET_STATE: Control = Control::MODE_FAIL_GEN;
}

bitflags! {
    /// Interrupt status register bits. The same layout is used by the
    /// interrupt enable, disable, and mask registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        /// A byte arrived while the RX FIFO was full; data was lost.
        const RX_OVERRUN   = 1 << 0;
        /// Selected as a slave while configured as a master.
        const MODE_FAULT   = 1 << 1;
        /// TX FIFO occupancy dropped below the threshold register value.
        const TX_THRESHOLD  = 1 << 2;
        /// TX FIFO is full.
        const TX_FULL      = 1 << 3;
        /// RX FIFO holds at least one byte.
        const RX_NOT_EMPTY = 1 << 4;
        /// RX FIFO is full.
        const RX_FULL      = 1 << 5;
        /// The shifter read an empty TX FIFO while clocked as a slave.
        const TX_UNDERFLOW = 1 << 6;
    }
}

impl Status {
    /// Flags with write-1-to-clear semantics. The remaining bits reflect
    /// FIFO levels and are cleared by the hardware itself.
    pub const WR_TO_CLR: Status = Status::RX_OVERRUN
        .union(Status::MODE_FAULT)
        .union(Status::TX_UNDERFLOW);

    /// Interrupt sources armed by the transfer initiator: everything the
    /// interrupt-driven engine services.
    pub const DEFAULT_IRQ: Status = Status::TX_THRESHOLD
        .union(Status::MODE_FAULT)
        .union(Status::RX_OVERRUN)
        .union(Status::TX_UNDERFLOW);
}
