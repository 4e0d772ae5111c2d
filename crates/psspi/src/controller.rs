//! Controller instance state and lifecycle management.
//!
//! [`SpiPs`] owns the register port and the mutable per-instance record:
//! the busy flag, transfer cursors and counters, the configured slave
//! select, and the registered status handler. The transfer engines
//! themselves live in the `transfer` module.

use alloc::boxed::Box;
use core::ptr;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::port::RegisterPort;
use crate::regs::{
    Control, Status, CR_OFFSET, ER_ENABLE, ER_OFFSET, RXD_OFFSET, SR_OFFSET, SS_FIELD_MASK,
    SS_FIELD_MAX, SS_MAX_INDEX, SS_SHIFT, TXD_OFFSET,
};

/// Asynchronous events delivered through the status handler.
///
/// `TransferDone` reports the full originally requested byte count; the
/// fault events report the number of bytes completed before the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The requested transfer completed in full.
    TransferDone,
    /// The controller was selected as a slave while configured as a
    /// master. The in-flight transfer has been aborted.
    ModeFault,
    /// A received byte was dropped because the RX FIFO was full. The
    /// transfer is abandoned.
    ReceiveOverrun,
    /// The shifter clocked out of an empty TX FIFO. The transfer is
    /// abandoned.
    TransmitUnderrun,
}

/// Status callback invoked by the interrupt-driven engine.
///
/// Runs in interrupt context; it should do its work quickly and defer
/// anything time-consuming.
pub type StatusHandler = Box<dyn FnMut(StatusEvent, usize) + Send>;

bitflags! {
    /// Mode options consulted by the transfer engines.
    ///
    /// Clock polarity, phase, and baud configuration are not part of this
    /// driver; configure them through the register port before starting
    /// transfers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Options: u32 {
        /// Operate as bus master.
        const MASTER        = 1 << 0;
        /// Require an explicit software start command per transmission.
        const MANUAL_START  = 1 << 1;
        /// Software drives the chip select lines around each transfer.
        const MANUAL_CS     = 1 << 2;
        /// Decode the slave select field externally.
        const DECODE_SELECT = 1 << 3;
    }
}

impl Options {
    /// Configuration register bits corresponding to these options.
    fn control_bits(self) -> Control {
        let mut cr = Control::empty();
        if self.contains(Options::MASTER) {
            cr |= Control::MASTER_ENABLE;
        }
        if self.contains(Options::MANUAL_START) {
            cr |= Control::MANUAL_START_EN;
        }
        if self.contains(Options::MANUAL_CS) {
            cr |= Control::MANUAL_CS;
        }
        if self.contains(Options::DECODE_SELECT) {
            cr |= Control::SELECT_DECODE;
        }
        cr
    }

    /// Every configuration register bit an option can map to.
    fn control_mask() -> Control {
        Options::all().control_bits()
    }
}

/// Encode a slave index as the one-hot-low select field value,
/// pre-shifted into register position.
pub(crate) fn encode_select(index: u8) -> u32 {
    ((!(1u32 << index)) & SS_FIELD_MAX) << SS_SHIFT
}

/// Decode a pre-shifted select field value back to a slave index.
///
/// Returns `None` unless exactly one in-range line is driven low.
pub(crate) fn decode_select(field: u32) -> Option<u8> {
    let nibble = (field >> SS_SHIFT) & SS_FIELD_MAX;
    (0..=SS_MAX_INDEX).find(|&i| nibble == (!(1u32 << i)) & SS_FIELD_MAX)
}

/// A FIFO-buffered full-duplex SPI controller instance.
///
/// Owns the register port for one controller. Exactly one transfer may be
/// outstanding at a time, tracked by the busy flag. The driver performs
/// no internal locking: the busy check-and-set is not atomic, so callers
/// must serialize transfer initiation themselves (a single logical thread
/// of mainline control, with the interrupt engine as the only preemptor).
pub struct SpiPs<P> {
    pub(crate) port: P,
    pub(crate) options: Options,
    /// Pre-shifted one-hot-low select field; all ones means "no slave".
    pub(crate) slave_select: u32,
    pub(crate) busy: bool,
    pub(crate) send_ptr: *const u8,
    pub(crate) recv_ptr: *mut u8,
    /// Bytes still awaiting reception.
    pub(crate) requested: usize,
    /// Bytes still awaiting transmission. Never exceeds `requested`.
    pub(crate) remaining: usize,
    /// Byte count of the in-flight transfer, latched at arm time so
    /// completion can report the full count.
    pub(crate) transfer_len: usize,
    pub(crate) handler: Option<StatusHandler>,
}

// The cursor pointers refer to caller buffers whose validity for the
// duration of a transfer is the caller's obligation (see `transfer`);
// they do not tie the instance to a thread.
unsafe impl<P: Send> Send for SpiPs<P> {}

impl<P: RegisterPort> SpiPs<P> {
    /// Create a driver instance over `port` and reset the device.
    ///
    /// The device comes up disabled, in slave role, with automatic start
    /// and chip select, and no slave selected. Configure it with
    /// [`set_options`](Self::set_options) and
    /// [`set_slave_select`](Self::set_slave_select) before transferring.
    pub fn new(port: P) -> Self {
        let mut spi = Self {
            port,
            options: Options::empty(),
            slave_select: SS_FIELD_MASK,
            busy: false,
            send_ptr: ptr::null(),
            recv_ptr: ptr::null_mut(),
            requested: 0,
            remaining: 0,
            transfer_len: 0,
            handler: None,
        };
        spi.reinit();
        spi
    }

    /// Re-initialize the instance in place.
    ///
    /// Restores all software state to its post-construction defaults
    /// (including dropping any registered status handler) and resets the
    /// device. Fails with [`Error::AlreadyStarted`] while a transfer is
    /// in flight; abort it first.
    pub fn initialize(&mut self) -> Result<()> {
        if self.busy {
            return Err(Error::AlreadyStarted);
        }
        self.reinit();
        Ok(())
    }

    fn reinit(&mut self) {
        self.busy = false;
        self.send_ptr = ptr::null();
        self.recv_ptr = ptr::null_mut();
        self.requested = 0;
        self.remaining = 0;
        self.transfer_len = 0;
        self.handler = None;
        self.reset();
        log::debug!("controller initialized");
    }

    /// Reset the device and the software state that shadows it.
    ///
    /// Aborts any transfer in progress and returns the control register
    /// to its power-on state. The configuration after reset matches the
    /// configuration after initialization; reconfigure and reselect
    /// before the next transfer.
    pub fn reset(&mut self) {
        self.abort();
        self.port.write(CR_OFFSET, Control::RESET_STATE.bits());
        self.options = Options::empty();
        self.slave_select = SS_FIELD_MASK;
    }

    /// Force the device and driver back to idle.
    ///
    /// Disables the device, drains and discards any residual bytes in
    /// the RX FIFO, clears the latched mode-fault flag, zeroes both byte
    /// counters, and clears the busy flag. Does not mask interrupt
    /// sources; the calling context decides that. Idempotent.
    pub fn abort(&mut self) {
        self.disable();

        // Drop whatever reception got ahead of the software.
        while Status::from_bits_truncate(self.port.read(SR_OFFSET))
            .contains(Status::RX_NOT_EMPTY)
        {
            let _ = self.recv_byte();
        }

        self.port.write(SR_OFFSET, Status::MODE_FAULT.bits());

        self.remaining = 0;
        self.requested = 0;
        self.busy = false;
    }

    /// True while a transfer is armed and not yet complete or aborted.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Set the mode options the transfer engines consult.
    ///
    /// Fails with [`Error::DeviceBusy`] while a transfer is in flight.
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        if self.busy {
            return Err(Error::DeviceBusy);
        }

        let mut config = self.port.read(CR_OFFSET);
        config &= !Options::control_mask().bits();
        config |= options.control_bits().bits();
        self.port.write(CR_OFFSET, config);

        self.options = options;
        Ok(())
    }

    /// The currently configured mode options.
    pub fn options(&self) -> Options {
        self.options
    }

    /// Select the slave the master communicates with.
    ///
    /// Computes the one-hot-low select mask for `index` and writes it
    /// into the control register, overwriting any previous selection.
    /// The selection only drives the lines once a transfer runs. Fails
    /// with [`Error::DeviceBusy`] while a transfer is in flight.
    ///
    /// # Panics
    ///
    /// Panics if `index` exceeds the highest decoded select line.
    pub fn set_slave_select(&mut self, index: u8) -> Result<()> {
        assert!(index <= SS_MAX_INDEX, "slave index {index} out of range");

        if self.busy {
            return Err(Error::DeviceBusy);
        }

        self.slave_select = encode_select(index);

        let mut config = self.port.read(CR_OFFSET);
        config &= !SS_FIELD_MASK;
        config |= self.slave_select;
        self.port.write(CR_OFFSET, config);

        Ok(())
    }

    /// The currently selected slave, or `None` when no single in-range
    /// line is selected.
    pub fn slave_select(&self) -> Option<u8> {
        decode_select(self.slave_select)
    }

    /// Register the status callback invoked by the interrupt-driven
    /// engine, replacing any previous one.
    ///
    /// A handler must be registered before an interrupt-driven transfer
    /// is started; completing or faulting a transfer with no handler
    /// registered is a programming error and panics.
    pub fn set_status_handler<F>(&mut self, handler: F)
    where
        F: FnMut(StatusEvent, usize) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Access the raw register port.
    ///
    /// Device configuration outside this driver's scope (clock polarity,
    /// phase, baud prescaler) is applied here, before transfers start.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the instance and return the register port.
    pub fn release(self) -> P {
        self.port
    }

    pub(crate) fn enable(&mut self) {
        self.port.write(ER_OFFSET, ER_ENABLE);
    }

    pub(crate) fn disable(&mut self) {
        self.port.write(ER_OFFSET, 0);
    }

    /// Push one byte into the transmit FIFO.
    #[inline(always)]
    pub(crate) fn send_byte(&mut self, data: u8) {
        self.port.write(TXD_OFFSET, u32::from(data));
    }

    /// Pop one byte from the receive FIFO. The byte must already be
    /// available.
    #[inline(always)]
    pub(crate) fn recv_byte(&mut self) -> u8 {
        self.port.read(RXD_OFFSET) as u8
    }

    /// Deselect all slaves. Only meaningful in manual chip select mode;
    /// a no-op otherwise. The configured selection is kept and rewritten
    /// by the next transfer.
    pub(crate) fn deselect_slave(&mut self) {
        if !self.options.contains(Options::MANUAL_CS) {
            return;
        }
        let mut config = self.port.read(CR_OFFSET);
        config |= SS_FIELD_MASK;
        self.port.write(CR_OFFSET, config);
    }

    /// Set the manual start trigger, in manual-start master mode.
    pub(crate) fn issue_manual_start(&mut self) {
        if self.options.contains(Options::MANUAL_START | Options::MASTER) {
            let mut config = self.port.read(CR_OFFSET);
            config |= Control::MANUAL_START.bits();
            self.port.write(CR_OFFSET, config);
        }
    }

    /// Deliver `event` to the registered status handler.
    ///
    /// # Panics
    ///
    /// Panics if no handler has been registered; reaching a dispatch
    /// site without one is a programming error in the upper layer.
    pub(crate) fn dispatch(&mut self, event: StatusEvent, bytes_done: usize) {
        match self.handler.as_mut() {
            Some(handler) => handler(event, bytes_done),
            None => panic!("status event {event:?} with no status handler registered"),
        }
    }
}
