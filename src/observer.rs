//! Protocol-level events the engine raises for anything other than a
//! published result: timeouts, radio errors, and dropped frames.

use defmt::Format;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum EventKind {
    PingRespTimeout,
    RangeRespTimeout,
    RangeFinalTimeout,
    RangeReportTimeout,
    UnknownFrameTimeout,
    UnknownFrameError,
    InvalidFrameReceived,
}

/// Observer capability injected into the engine at construction, replacing
/// the single global callback of the firmware this protocol is distilled
/// from.
pub trait Observer {
    fn on_event(&mut self, event: EventKind);
}

/// An observer that discards every event; useful for tests and for board
/// integrations that only poll result slots.
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&mut self, _event: EventKind) {}
}
