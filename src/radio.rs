//! The seam between this crate and the board's transceiver register driver.
//!
//! The engine never touches SPI, DMA, or GPIO directly; it only calls
//! through [`RadioDriver`], in the same spirit as the teacher crate's own
//! `Interface`/`RadioError` split between hardware-facing operations and the
//! error type those operations can fail with.

use defmt::Format;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum RadioError {
    Spi,
    BusyTimeout,
    StartTxFailed,
    Status(u8),
}

/// How a transmit should be scheduled.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum TxFlags {
    /// Send as soon as possible.
    Immediate,
    /// Send at the time previously programmed via `set_delayed_tx_time`.
    Delayed,
}

/// Diagnostic registers used for the RSSI estimate.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub struct Diagnostics {
    pub cir_power: u32,
    pub preamble_acc_count: u32,
}

/// Cause of an interrupt, as decoded by the driver's ISR entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum IsrCause {
    RxOk,
    RxTimeout,
    RxError,
    TxDone,
}

/// Hardware-facing operations the protocol engine needs from the
/// transceiver. A board integration crate implements this trait over its
/// own SPI/DMA/GPIO driver; this crate knows nothing about those details.
pub trait RadioDriver {
    /// Write `len` bytes from `buf` into the transmit buffer and arm length
    /// framing for a ranging-capable frame.
    fn write_tx(&mut self, buf: &[u8], len: usize) -> Result<(), RadioError>;

    /// Program the delayed-TX scheduling register with the upper 32 bits of
    /// the target 40-bit timestamp (see [`crate::timestamp::schedule_tx_at`]).
    fn set_delayed_tx_time(&mut self, word: u32) -> Result<(), RadioError>;

    /// Program the receiver to open with timeout `uus` after the next
    /// transmit completes (`0` disables the auto-RX-after-TX delay).
    fn set_rx_after_tx_delay(&mut self, uus: u32) -> Result<(), RadioError>;

    /// Program the receive timeout in UWB microseconds; `0` means no
    /// timeout (continuous receive).
    fn set_rx_timeout(&mut self, uus: u32) -> Result<(), RadioError>;

    /// Start transmission per `flags`. When `rx_after` is true, the
    /// receiver auto-opens per `set_rx_after_tx_delay`/`set_rx_timeout`
    /// once the transmit completes.
    fn start_tx(&mut self, flags: TxFlags, rx_after: bool) -> Result<(), RadioError>;

    /// Put the transceiver directly into open-ended receive, cancelling any
    /// in-flight transmit or scheduled delayed transmit.
    fn rx_enable(&mut self) -> Result<(), RadioError>;

    /// Force the transceiver back to idle (used on error recovery).
    fn force_trx_off(&mut self) -> Result<(), RadioError>;

    /// Reset the receiver logic. Always paired with `force_trx_off` on every
    /// error recovery path before the receiver is re-armed.
    fn rx_reset(&mut self) -> Result<(), RadioError>;

    /// 40-bit timestamp of the most recently completed transmit.
    fn read_tx_timestamp(&mut self) -> Result<u64, RadioError>;

    /// 40-bit timestamp of the most recently completed receive.
    fn read_rx_timestamp(&mut self) -> Result<u64, RadioError>;

    /// Read back the length of the most recently received frame, and copy
    /// its bytes into `buf`. Returns the number of bytes copied.
    fn read_rx_frame(&mut self, buf: &mut [u8]) -> Result<usize, RadioError>;

    /// Diagnostic registers backing the RSSI estimate.
    fn read_diagnostics(&mut self) -> Result<Diagnostics, RadioError>;

    /// The transmit antenna delay (dtu) configured for this radio, used to
    /// correct a scheduled delayed-TX word into the real on-air timestamp.
    fn tx_antenna_delay(&self) -> u32;

    /// Decode and clear the pending interrupt cause. Called from interrupt
    /// context by [`crate::event_loop::EventLoop`].
    fn isr_cause(&mut self) -> Option<IsrCause>;
}
