//! The transfer engines.
//!
//! A transfer shuttles a caller-supplied byte sequence across the bus,
//! transmitting and receiving simultaneously with the hardware FIFO as
//! the only buffering. Two engines share one arm routine: the
//! interrupt-driven engine advances one FIFO round per interrupt until
//! the whole buffer has moved, and the polled engine runs the same fill/
//! drain loop synchronously, blocking until completion.

use core::ptr;

use crate::controller::{Options, SpiPs, StatusEvent};
use crate::error::{Error, Result};
use crate::port::RegisterPort;
use crate::regs::{
    Status, CR_OFFSET, FIFO_DEPTH, IDR_OFFSET, IER_OFFSET, SR_OFFSET, SS_FIELD_MASK,
};

impl<P: RegisterPort> SpiPs<P> {
    /// Arm a new transfer: shared setup used by both engines.
    ///
    /// Marks the instance busy, installs cursors and counters, drives
    /// the configured slave select (manual chip select mode), enables
    /// the device, and discards stale latched status flags. The busy
    /// check-and-set is not atomic; callers serialize initiation.
    fn begin(&mut self, send: *const u8, recv: *mut u8, count: usize) -> Result<()> {
        if self.busy {
            return Err(Error::DeviceBusy);
        }
        self.busy = true;

        self.send_ptr = send;
        self.recv_ptr = recv;
        self.requested = count;
        self.remaining = count;
        self.transfer_len = count;

        if self.options.contains(Options::MANUAL_CS) {
            let mut config = self.port.read(CR_OFFSET);
            config &= !SS_FIELD_MASK;
            config |= self.slave_select;
            self.port.write(CR_OFFSET, config);
        }

        self.enable();

        self.port.write(SR_OFFSET, Status::WR_TO_CLR.bits());

        Ok(())
    }

    /// Fill the TX FIFO from the send cursor: up to [`FIFO_DEPTH`] bytes,
    /// bounded by what is left to transmit. Returns the number queued.
    fn fill_tx_fifo(&mut self) -> usize {
        let mut queued = 0;
        while self.remaining > 0 && queued < FIFO_DEPTH {
            // Cursor validity for the transfer duration is the
            // initiator's contract.
            let byte = unsafe { *self.send_ptr };
            self.send_byte(byte);
            self.send_ptr = unsafe { self.send_ptr.add(1) };
            self.remaining -= 1;
            queued += 1;
        }
        queued
    }

    /// Pop `count` bytes from the RX FIFO, storing them through the
    /// receive cursor when one was supplied and discarding them
    /// otherwise.
    fn drain_rx_fifo(&mut self, count: usize) {
        for _ in 0..count {
            let byte = self.recv_byte();
            if !self.recv_ptr.is_null() {
                unsafe {
                    self.recv_ptr.write(byte);
                    self.recv_ptr = self.recv_ptr.add(1);
                }
            }
            self.requested -= 1;
        }
    }

    /// Start an interrupt-driven transfer.
    ///
    /// Arms the transfer, queues the first FIFO round, unmasks the
    /// interrupt sources the engine services, and (in manual-start
    /// master mode) issues the start command, so bus activity begins
    /// immediately upon return. Subsequent rounds are advanced by
    /// [`handle_interrupt`](Self::handle_interrupt), which the caller
    /// must invoke for each interrupt on the controller's line; the
    /// registered status handler reports completion or failure.
    ///
    /// For every byte sent a byte is received: `recv`, when supplied,
    /// must be at least `send.len()` bytes. Passing `None` discards the
    /// received data.
    ///
    /// Fails with [`Error::DeviceBusy`] while a previous transfer is
    /// still in flight. Not thread-safe: the busy check is not atomic,
    /// and callers must not initiate concurrently.
    ///
    /// # Safety
    ///
    /// The driver holds raw cursors into both buffers after this call
    /// returns. The caller must keep `send` and `recv` valid, and
    /// neither moved, freed, nor accessed mutably elsewhere, until the
    /// status handler reports the transfer done or failed, or the
    /// transfer is aborted.
    ///
    /// # Panics
    ///
    /// Panics if `send` is empty or `recv` is shorter than `send`.
    pub unsafe fn transfer(&mut self, send: &[u8], recv: Option<&mut [u8]>) -> Result<()> {
        assert!(!send.is_empty(), "transfer of zero bytes");
        if let Some(recv) = &recv {
            assert!(
                recv.len() >= send.len(),
                "receive buffer shorter than send buffer"
            );
        }

        let recv_ptr = recv.map_or(ptr::null_mut(), |r| r.as_mut_ptr());
        self.begin(send.as_ptr(), recv_ptr, send.len())?;

        log::trace!("starting interrupt-driven transfer of {} bytes", send.len());

        self.fill_tx_fifo();
        self.port.write(IER_OFFSET, Status::DEFAULT_IRQ.bits());
        self.issue_manual_start();

        Ok(())
    }

    /// Service one interrupt occurrence.
    ///
    /// Connect the controller's interrupt line to a handler that calls
    /// this once per interrupt. Each invocation drains the bytes
    /// received since the last round, refills the TX FIFO, and either
    /// finishes the transfer or re-arms the next round. Mode fault,
    /// receive overrun, and transmit underrun are detected here and
    /// reported through the status handler with the byte count completed
    /// before the fault; all three abandon the transfer.
    pub fn handle_interrupt(&mut self) {
        // Snapshot and clear the latched flags immediately, so an
        // interrupt raised while handling is not lost, and mask the
        // TX-threshold source because transmission resumes synchronously
        // below.
        let status = Status::from_bits_truncate(self.port.read(SR_OFFSET));
        self.port.write(SR_OFFSET, (status & Status::WR_TO_CLR).bits());
        self.port.write(IDR_OFFSET, Status::TX_THRESHOLD.bits());

        // A mode fault can corrupt in-progress state, so it pre-empts
        // every other flag: abort and report without servicing the rest.
        if status.contains(Status::MODE_FAULT) {
            let bytes_done = self.requested - self.remaining;
            log::error!("mode fault after {bytes_done} bytes, aborting transfer");
            self.abort();
            self.dispatch(StatusEvent::ModeFault, bytes_done);
            return;
        }

        if status.contains(Status::TX_THRESHOLD) {
            // A transmit round just completed. Everything sent since the
            // previous drain is sitting in the RX FIFO: reception lags
            // transmission by exactly requested - remaining bytes.
            let pending = self.requested - self.remaining;
            self.drain_rx_fifo(pending);
            self.fill_tx_fifo();

            if self.remaining == 0 && self.requested == 0 {
                // Nothing left to move. Mask the engine's interrupt
                // sources until the next transfer is armed.
                self.port.write(IDR_OFFSET, Status::DEFAULT_IRQ.bits());
                self.deselect_slave();
                self.busy = false;
                self.disable();

                let len = self.transfer_len;
                log::trace!("transfer of {len} bytes complete");
                self.dispatch(StatusEvent::TransferDone, len);
            } else {
                self.port.write(IER_OFFSET, Status::TX_THRESHOLD.bits());
                self.issue_manual_start();
            }
        }

        // Overrun and underrun are reported even when a threshold round
        // was serviced in the same invocation.
        if status.contains(Status::RX_OVERRUN) {
            let bytes_done = self.requested - self.remaining;
            self.busy = false;
            self.deselect_slave();
            log::error!("receive overrun after {bytes_done} bytes, transfer abandoned");
            self.dispatch(StatusEvent::ReceiveOverrun, bytes_done);
        }

        if status.contains(Status::TX_UNDERFLOW) {
            let bytes_done = self.requested - self.remaining;
            self.busy = false;
            self.deselect_slave();
            log::error!("transmit underrun after {bytes_done} bytes, transfer abandoned");
            self.dispatch(StatusEvent::TransmitUnderrun, bytes_done);
        }
    }

    /// Transfer synchronously, blocking until every byte has moved.
    ///
    /// Self-contained polled variant of the same fill/drain loop; no
    /// interrupt wiring and no status-handler dispatch. Completion is
    /// signaled by the call returning.
    ///
    /// The status wait is an unbounded spin: a stuck peer or bus hangs
    /// the call, and a caller needing a timeout must wrap it externally.
    /// Mode fault, overrun, and underrun conditions go undetected in
    /// this mode; use the interrupt-driven engine to observe them.
    ///
    /// # Panics
    ///
    /// Panics if `send` is empty or `recv` is shorter than `send`.
    pub fn polled_transfer(&mut self, send: &[u8], recv: Option<&mut [u8]>) -> Result<()> {
        assert!(!send.is_empty(), "transfer of zero bytes");
        if let Some(recv) = &recv {
            assert!(
                recv.len() >= send.len(),
                "receive buffer shorter than send buffer"
            );
        }

        let recv_ptr = recv.map_or(ptr::null_mut(), |r| r.as_mut_ptr());
        self.begin(send.as_ptr(), recv_ptr, send.len())?;

        log::trace!("starting polled transfer of {} bytes", send.len());

        self.polled_run();
        Ok(())
    }

    /// Polled transfer sending and receiving through one buffer.
    ///
    /// Transmits the contents of `buf` and overwrites it, byte for byte,
    /// with the data received. Same blocking behavior and limitations as
    /// [`polled_transfer`](Self::polled_transfer).
    ///
    /// # Panics
    ///
    /// Panics if `buf` is empty.
    pub fn polled_transfer_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        assert!(!buf.is_empty(), "transfer of zero bytes");

        let ptr = buf.as_mut_ptr();
        self.begin(ptr, ptr, buf.len())?;

        log::trace!("starting polled in-place transfer of {} bytes", buf.len());

        self.polled_run();
        Ok(())
    }

    /// The polled fill/drain loop. Runs until both counters hit zero,
    /// then deselects, clears busy, and disables the device.
    fn polled_run(&mut self) {
        while self.remaining > 0 || self.requested > 0 {
            let queued = self.fill_tx_fifo();
            self.issue_manual_start();

            // Wait for the transmit round to finish by polling the
            // TX-threshold flag.
            loop {
                let status = Status::from_bits_truncate(self.port.read(SR_OFFSET));
                if status.contains(Status::TX_THRESHOLD) {
                    break;
                }
            }

            // Receive exactly what this round transmitted.
            self.drain_rx_fifo(queued);
        }

        self.deselect_slave();
        self.busy = false;
        self.disable();
    }
}
