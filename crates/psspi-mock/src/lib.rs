//! psspi-mock - software model of the SPI controller for testing
//!
//! [`MockSpi`] implements [`RegisterPort`] with a deterministic model of
//! the register block: latched write-1-to-clear fault flags, level-derived
//! FIFO status bits, the two hardware FIFOs, and manual/automatic start
//! semantics. A scripted peer supplies the bytes shifted back on the bus,
//! and everything the controller "transmits" is logged for inspection.
//!
//! The model shifts eagerly: queued bytes cross the bus as soon as the
//! device is enabled and started (immediately on queueing in automatic
//! start mode, on the start trigger in manual start mode). Interrupt
//! delivery is not modeled; tests invoke the driver's interrupt entry
//! point directly wherever the line would fire.

use std::collections::VecDeque;

use heapless::Deque;
use psspi::regs::{
    Control, Status, CR_OFFSET, ER_ENABLE, ER_OFFSET, IDR_OFFSET, IER_OFFSET, IMR_OFFSET,
    RXD_OFFSET, SR_OFFSET, SS_FIELD_MASK, SS_SHIFT, TXD_OFFSET, TXWR_OFFSET, TXWR_RESET_VALUE,
};
use psspi::{RegisterPort, FIFO_DEPTH};

/// Byte the peer shifts back once its scripted responses run out. The
/// idle bus reads all ones.
pub const IDLE_BYTE: u8 = 0xFF;

/// Deterministic software model of the controller's register block.
pub struct MockSpi {
    control: u32,
    enabled: bool,
    irq_mask: u32,
    tx_threshold: u32,
    /// Latched write-1-to-clear fault flags. FIFO level bits are derived
    /// on every status read instead.
    latched: Status,
    tx_fifo: Deque<u8, FIFO_DEPTH>,
    rx_fifo: Deque<u8, FIFO_DEPTH>,
    /// Bytes the simulated peer will answer with, one per transmitted
    /// byte, then [`IDLE_BYTE`].
    peer_script: VecDeque<u8>,
    /// Every byte the controller has transmitted, in order.
    mosi_log: Vec<u8>,
    start_count: usize,
}

impl MockSpi {
    /// Create a model in its power-on state.
    pub fn new() -> Self {
        Self {
            control: Control::RESET_STATE.bits(),
            enabled: false,
            irq_mask: 0,
            tx_threshold: TXWR_RESET_VALUE,
            latched: Status::empty(),
            tx_fifo: Deque::new(),
            rx_fifo: Deque::new(),
            peer_script: VecDeque::new(),
            mosi_log: Vec::new(),
            start_count: 0,
        }
    }

    /// Queue the bytes the peer will shift back, one per byte
    /// transmitted.
    pub fn queue_peer_bytes(&mut self, bytes: &[u8]) {
        self.peer_script.extend(bytes.iter().copied());
    }

    /// Every byte transmitted so far, in order.
    pub fn transmitted(&self) -> &[u8] {
        &self.mosi_log
    }

    /// Number of manual start triggers observed.
    pub fn start_count(&self) -> usize {
        self.start_count
    }

    /// Current raw control register value.
    pub fn control(&self) -> u32 {
        self.control
    }

    /// The slave select field of the control register, unshifted.
    pub fn select_field(&self) -> u32 {
        (self.control & SS_FIELD_MASK) >> SS_SHIFT
    }

    /// Whether the device enable bit is set.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Currently unmasked interrupt sources.
    pub fn irq_mask(&self) -> u32 {
        self.irq_mask
    }

    /// Current RX FIFO occupancy.
    pub fn rx_fifo_len(&self) -> usize {
        self.rx_fifo.len()
    }

    /// Current TX FIFO occupancy.
    pub fn tx_fifo_len(&self) -> usize {
        self.tx_fifo.len()
    }

    /// Currently latched fault flags.
    pub fn latched(&self) -> Status {
        self.latched
    }

    /// Place bytes directly into the RX FIFO, as residue of an
    /// interrupted transfer.
    pub fn load_rx_fifo(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.rx_fifo.push_back(byte).is_err() {
                panic!("rx fifo residue exceeds its depth");
            }
        }
    }

    /// Latch a mode fault, as if another master selected this device.
    pub fn inject_mode_fault(&mut self) {
        self.latched |= Status::MODE_FAULT;
    }

    /// Latch a receive overrun.
    pub fn inject_rx_overrun(&mut self) {
        self.latched |= Status::RX_OVERRUN;
    }

    /// Latch a transmit underrun.
    pub fn inject_tx_underrun(&mut self) {
        self.latched |= Status::TX_UNDERFLOW;
    }

    fn manual_start_mode(&self) -> bool {
        self.control & Control::MANUAL_START_EN.bits() != 0
    }

    /// Shift every queued byte across the bus: each TX byte is logged
    /// and answered by the next scripted peer byte into the RX FIFO. A
    /// response arriving at a full RX FIFO is dropped and latches the
    /// overrun flag.
    fn shift(&mut self) {
        if !self.enabled {
            return;
        }
        while let Some(byte) = self.tx_fifo.pop_front() {
            self.mosi_log.push(byte);
            let response = self.peer_script.pop_front().unwrap_or(IDLE_BYTE);
            if self.rx_fifo.push_back(response).is_err() {
                self.latched |= Status::RX_OVERRUN;
            }
        }
    }
}

impl Default for MockSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPort for MockSpi {
    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            CR_OFFSET => self.control,
            SR_OFFSET => {
                let mut status = self.latched;
                if (self.tx_fifo.len() as u32) < self.tx_threshold {
                    status |= Status::TX_THRESHOLD;
                }
                if self.tx_fifo.is_full() {
                    status |= Status::TX_FULL;
                }
                if !self.rx_fifo.is_empty() {
                    status |= Status::RX_NOT_EMPTY;
                }
                if self.rx_fifo.is_full() {
                    status |= Status::RX_FULL;
                }
                status.bits()
            }
            IMR_OFFSET => self.irq_mask,
            ER_OFFSET => u32::from(self.enabled),
            RXD_OFFSET => u32::from(self.rx_fifo.pop_front().unwrap_or(0)),
            TXWR_OFFSET => self.tx_threshold,
            _ => panic!("read from unmapped register offset {offset:#x}"),
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            CR_OFFSET => {
                // The manual start trigger is self-clearing.
                self.control = value & !Control::MANUAL_START.bits();
                if value & Control::MANUAL_START.bits() != 0 {
                    self.start_count += 1;
                    self.shift();
                }
            }
            SR_OFFSET => {
                let clear = Status::from_bits_truncate(value) & Status::WR_TO_CLR;
                self.latched &= !clear;
            }
            IER_OFFSET => self.irq_mask |= value,
            IDR_OFFSET => self.irq_mask &= !value,
            ER_OFFSET => self.enabled = value & ER_ENABLE != 0,
            TXD_OFFSET => {
                if self.tx_fifo.push_back(value as u8).is_err() {
                    log::warn!("tx fifo overflow, byte {:#04x} dropped", value as u8);
                }
                if !self.manual_start_mode() {
                    self.shift();
                }
            }
            TXWR_OFFSET => self.tx_threshold = value,
            _ => panic!("write to unmapped register offset {offset:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psspi::{Error, Options, SpiPs, StatusEvent};
    use std::sync::{Arc, Mutex};

    type EventLog = Arc<Mutex<Vec<(StatusEvent, usize)>>>;

    fn master_options() -> Options {
        Options::MASTER | Options::MANUAL_START | Options::MANUAL_CS
    }

    /// A driver over a fresh model, configured as manual-start manual-CS
    /// master with slave 0 selected and `peer` scripted.
    fn master_spi(peer: &[u8]) -> SpiPs<MockSpi> {
        let mut mock = MockSpi::new();
        mock.queue_peer_bytes(peer);
        let mut spi = SpiPs::new(mock);
        spi.set_options(master_options()).unwrap();
        spi.set_slave_select(0).unwrap();
        spi
    }

    fn capture_events(spi: &mut SpiPs<MockSpi>) -> EventLog {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        spi.set_status_handler(move |event, bytes| {
            sink.lock().unwrap().push((event, bytes));
        });
        log
    }

    // ---- model behavior ----

    #[test]
    fn fault_flags_latch_until_written_clear() {
        let mut mock = MockSpi::new();
        mock.inject_mode_fault();
        mock.inject_rx_overrun();

        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(status.contains(Status::MODE_FAULT | Status::RX_OVERRUN));

        // Reading does not clear; writing ones does.
        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(status.contains(Status::MODE_FAULT));
        mock.write(SR_OFFSET, Status::MODE_FAULT.bits());
        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(!status.contains(Status::MODE_FAULT));
        assert!(status.contains(Status::RX_OVERRUN));
    }

    #[test]
    fn status_levels_track_fifo_occupancy() {
        let mut mock = MockSpi::new();

        // Empty TX FIFO sits below the reset threshold of one.
        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(status.contains(Status::TX_THRESHOLD));
        assert!(!status.contains(Status::RX_NOT_EMPTY));

        // Queue a byte with the device disabled: it stays in the FIFO.
        mock.write(TXD_OFFSET, 0xA5);
        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(!status.contains(Status::TX_THRESHOLD));

        // Enabling and starting shifts it through.
        mock.write(ER_OFFSET, ER_ENABLE);
        mock.write(
            CR_OFFSET,
            mock.control() | Control::MANUAL_START.bits(),
        );
        let status = Status::from_bits_truncate(mock.read(SR_OFFSET));
        assert!(status.contains(Status::TX_THRESHOLD));
        assert!(status.contains(Status::RX_NOT_EMPTY));
        assert_eq!(mock.transmitted(), &[0xA5]);
        assert_eq!(mock.read(RXD_OFFSET), u32::from(IDLE_BYTE));
    }

    #[test]
    fn interrupt_mask_accumulates_through_enable_disable() {
        let mut mock = MockSpi::new();
        mock.write(IER_OFFSET, Status::DEFAULT_IRQ.bits());
        assert_eq!(mock.read(IMR_OFFSET), Status::DEFAULT_IRQ.bits());
        mock.write(IDR_OFFSET, Status::TX_THRESHOLD.bits());
        assert_eq!(
            mock.read(IMR_OFFSET),
            (Status::DEFAULT_IRQ - Status::TX_THRESHOLD).bits()
        );
    }

    // ---- polled engine ----

    #[test]
    fn polled_transfer_round_trips_peer_bytes() {
        let peer: Vec<u8> = (0u8..10).map(|i| 0x80 | i).collect();
        let mut spi = master_spi(&peer);

        let send: Vec<u8> = (0u8..10).collect();
        let mut recv = [0u8; 10];
        spi.polled_transfer(&send, Some(&mut recv)).unwrap();

        assert_eq!(recv.as_slice(), peer.as_slice());
        assert!(!spi.is_busy());

        let mock = spi.release();
        assert_eq!(mock.transmitted(), send.as_slice());
        assert!(!mock.is_enabled());
        // Manual chip select is released on completion.
        assert_eq!(mock.select_field(), 0xF);
    }

    #[test]
    fn polled_transfer_can_discard_reception() {
        let mut spi = master_spi(&[1, 2, 3, 4]);
        spi.polled_transfer(&[0xAA; 4], None).unwrap();
        assert!(!spi.is_busy());
        assert_eq!(spi.port_mut().rx_fifo_len(), 0);
    }

    #[test]
    fn polled_in_place_overwrites_send_bytes() {
        let peer = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut spi = master_spi(&peer);

        let mut buf = [0x11, 0x22, 0x33, 0x44];
        spi.polled_transfer_in_place(&mut buf).unwrap();

        assert_eq!(buf, peer);
        assert_eq!(spi.port_mut().transmitted(), &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn polled_rounds_match_fifo_depth() {
        let count = FIFO_DEPTH * 2 + 44;
        let mut spi = master_spi(&vec![0x55; count]);
        spi.polled_transfer(&vec![0u8; count], None).unwrap();
        // One manual start per fill/drain round.
        assert_eq!(spi.port_mut().start_count(), 3);
    }

    #[test]
    fn polled_auto_start_needs_no_trigger() {
        let mut mock = MockSpi::new();
        mock.queue_peer_bytes(&[9, 8, 7]);
        let mut spi = SpiPs::new(mock);
        spi.set_options(Options::MASTER | Options::MANUAL_CS).unwrap();
        spi.set_slave_select(1).unwrap();

        let mut recv = [0u8; 3];
        spi.polled_transfer(&[1, 2, 3], Some(&mut recv)).unwrap();

        assert_eq!(recv, [9, 8, 7]);
        assert_eq!(spi.port_mut().start_count(), 0);
    }

    #[test]
    fn peer_idles_high_when_script_runs_out() {
        let mut spi = master_spi(&[0x42]);
        let mut recv = [0u8; 3];
        spi.polled_transfer(&[0, 0, 0], Some(&mut recv)).unwrap();
        assert_eq!(recv, [0x42, IDLE_BYTE, IDLE_BYTE]);
    }

    // ---- interrupt-driven engine ----

    #[test]
    fn interrupt_transfer_single_round() {
        let peer = [5, 6, 7, 8];
        let mut spi = master_spi(&peer);
        let events = capture_events(&mut spi);

        let send = [1, 2, 3, 4];
        let mut recv = [0u8; 4];
        unsafe { spi.transfer(&send, Some(&mut recv)).unwrap() };
        assert!(spi.is_busy());

        spi.handle_interrupt();

        assert!(!spi.is_busy());
        assert_eq!(recv, peer);
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[(StatusEvent::TransferDone, 4)]
        );
    }

    /// Multi-round transfer: the initiator queues one FIFO's worth, then
    /// each interrupt drains a round and queues the next until both
    /// counters hit zero.
    #[test]
    fn interrupt_transfer_runs_one_round_per_interrupt() {
        let count = FIFO_DEPTH * 2 + 44;
        let peer: Vec<u8> = (0..count).map(|i| (i % 251) as u8).collect();
        let mut spi = master_spi(&peer);
        let events = capture_events(&mut spi);

        let send: Vec<u8> = (0..count).map(|i| (i % 256) as u8).collect();
        let mut recv = vec![0u8; count];
        unsafe { spi.transfer(&send, Some(&mut recv)).unwrap() };

        // The initiator fills exactly one FIFO.
        assert_eq!(spi.port_mut().transmitted().len(), FIFO_DEPTH);
        assert_eq!(spi.port_mut().irq_mask(), Status::DEFAULT_IRQ.bits());

        let mut cycles = 0;
        let expected_progress = [2 * FIFO_DEPTH, count, count];
        while spi.is_busy() {
            spi.handle_interrupt();
            assert_eq!(spi.port_mut().transmitted().len(), expected_progress[cycles]);
            cycles += 1;
            assert!(cycles <= 3, "transfer did not complete in 3 rounds");
        }

        assert_eq!(cycles, 3);
        assert_eq!(recv, peer);
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[(StatusEvent::TransferDone, count)]
        );
        // Completion masks the engine's interrupt sources again.
        assert_eq!(spi.port_mut().irq_mask(), 0);
        assert!(!spi.port_mut().is_enabled());
    }

    /// A mode fault pre-empts everything: the transfer is aborted, the
    /// bytes completed before the fault are reported, and no other flag
    /// is serviced in that invocation.
    #[test]
    fn mode_fault_aborts_mid_transfer() {
        let count = FIFO_DEPTH * 2 + 44;
        let mut spi = master_spi(&vec![0u8; count]);
        let events = capture_events(&mut spi);

        let send = vec![0xA5; count];
        unsafe { spi.transfer(&send, None).unwrap() };
        spi.handle_interrupt();

        spi.port_mut().inject_mode_fault();
        spi.handle_interrupt();

        assert!(!spi.is_busy());
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[(StatusEvent::ModeFault, FIFO_DEPTH)]
        );

        let mock = spi.port_mut();
        // Abort ran: device disabled, RX residue discarded, fault
        // cleared, and the threshold round was never serviced.
        assert!(!mock.is_enabled());
        assert_eq!(mock.rx_fifo_len(), 0);
        assert_eq!(mock.latched(), Status::empty());
        assert_eq!(mock.transmitted().len(), 2 * FIFO_DEPTH);
    }

    #[test]
    fn rx_overrun_abandons_transfer() {
        let count = FIFO_DEPTH * 2 + 44;
        let mut spi = master_spi(&vec![0u8; count]);
        let events = capture_events(&mut spi);

        let send = vec![0x5A; count];
        unsafe { spi.transfer(&send, None).unwrap() };

        spi.port_mut().inject_rx_overrun();
        spi.handle_interrupt();

        assert!(!spi.is_busy());
        // The threshold round serviced in the same invocation left a
        // full FIFO in flight when the overrun was reported.
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[(StatusEvent::ReceiveOverrun, FIFO_DEPTH)]
        );
        // The slave was deselected on abandonment.
        assert_eq!(spi.port_mut().select_field(), 0xF);
    }

    /// Completion and a latched underrun observed in one invocation are
    /// both reported, in that order.
    #[test]
    fn underrun_reported_alongside_completion() {
        let mut spi = master_spi(&[0; 4]);
        let events = capture_events(&mut spi);

        let send = [1, 2, 3, 4];
        unsafe { spi.transfer(&send, None).unwrap() };

        spi.port_mut().inject_tx_underrun();
        spi.handle_interrupt();

        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[
                (StatusEvent::TransferDone, 4),
                (StatusEvent::TransmitUnderrun, 0),
            ]
        );
        assert!(!spi.is_busy());
    }

    /// The handler clears latched flags on entry, so a fault observed in
    /// one invocation is not replayed by the next.
    #[test]
    fn latched_flags_cleared_on_handler_entry() {
        let mut spi = master_spi(&[0; 8]);
        let events = capture_events(&mut spi);

        let send = [0xEE; 8];
        unsafe { spi.transfer(&send, None).unwrap() };
        spi.port_mut().inject_rx_overrun();
        spi.handle_interrupt();

        assert_eq!(spi.port_mut().latched(), Status::empty());
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    // ---- initiation guards ----

    #[test]
    fn second_initiation_fails_while_busy() {
        let mut spi = master_spi(&[0; 4]);
        let _events = capture_events(&mut spi);

        let send = [1, 2, 3, 4];
        unsafe { spi.transfer(&send, None).unwrap() };

        let err = unsafe { spi.transfer(&send, None).unwrap_err() };
        assert_eq!(err, Error::DeviceBusy);
        assert_eq!(
            spi.polled_transfer(&send, None).unwrap_err(),
            Error::DeviceBusy
        );
    }

    #[test]
    fn initialize_fails_while_busy() {
        let mut spi = master_spi(&[0; 4]);
        let _events = capture_events(&mut spi);

        let send = [1, 2, 3, 4];
        unsafe { spi.transfer(&send, None).unwrap() };
        assert_eq!(spi.initialize().unwrap_err(), Error::AlreadyStarted);

        spi.handle_interrupt();
        assert!(spi.initialize().is_ok());
    }

    #[test]
    fn slave_select_rejected_while_busy() {
        let mut spi = master_spi(&[0; 4]);
        let _events = capture_events(&mut spi);

        let send = [1, 2, 3, 4];
        unsafe { spi.transfer(&send, None).unwrap() };

        assert_eq!(spi.set_slave_select(2).unwrap_err(), Error::DeviceBusy);
        assert_eq!(spi.set_options(Options::MASTER).unwrap_err(), Error::DeviceBusy);
        // The configured selection and the driven field are unchanged.
        assert_eq!(spi.slave_select(), Some(0));
        assert_eq!(spi.port_mut().select_field(), 0b1110);
    }

    // ---- reset and abort ----

    #[test]
    fn slave_select_reads_none_after_reset() {
        let mut spi = master_spi(&[]);
        spi.set_slave_select(1).unwrap();
        assert_eq!(spi.slave_select(), Some(1));

        spi.reset();

        assert_eq!(spi.slave_select(), None);
        assert_eq!(spi.port_mut().control(), Control::RESET_STATE.bits());
        assert_eq!(spi.options(), Options::empty());
    }

    #[test]
    fn abort_drains_rx_residue_and_clears_fault() {
        let mut spi = master_spi(&[]);
        spi.port_mut().load_rx_fifo(&[1, 2, 3]);
        spi.port_mut().inject_mode_fault();

        spi.abort();

        let mock = spi.port_mut();
        assert_eq!(mock.rx_fifo_len(), 0);
        assert_eq!(mock.latched(), Status::empty());
        assert!(!mock.is_enabled());
        assert!(!spi.is_busy());
    }

    #[test]
    fn abort_is_idempotent_from_idle() {
        let mut spi = master_spi(&[]);
        spi.port_mut().load_rx_fifo(&[0xAB; 5]);

        spi.abort();
        let after_one = (
            spi.is_busy(),
            spi.port_mut().is_enabled(),
            spi.port_mut().rx_fifo_len(),
            spi.port_mut().latched(),
            spi.port_mut().control(),
        );

        spi.abort();
        let after_two = (
            spi.is_busy(),
            spi.port_mut().is_enabled(),
            spi.port_mut().rx_fifo_len(),
            spi.port_mut().latched(),
            spi.port_mut().control(),
        );

        assert_eq!(after_one, after_two);
    }
}
