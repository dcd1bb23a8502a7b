//! Bridges a radio interrupt signal to the protocol engine. No protocol
//! logic lives here — only the wakeup-then-dispatch loop.

use crate::engine::{Engine, NodeContext};
use crate::observer::Observer;
use crate::radio::RadioDriver;

/// A blocking wakeup source fed by the radio's IRQ handler. Implemented by
/// the board integration (a binary semaphore, a `cortex_m` WFE primitive,
/// an RTOS notification, ...); this crate only needs the one method.
pub trait Signal {
    /// Block until the radio has signalled a pending interrupt.
    fn wait(&mut self);
}

pub struct EventLoop<S: Signal, D: RadioDriver, O: Observer, C: NodeContext> {
    signal: S,
    engine: Engine<D, O, C>,
}

impl<S: Signal, D: RadioDriver, O: Observer, C: NodeContext> EventLoop<S, D, O, C> {
    pub fn new(signal: S, engine: Engine<D, O, C>) -> Self {
        Self { signal, engine }
    }

    pub fn engine(&mut self) -> &mut Engine<D, O, C> {
        &mut self.engine
    }

    /// Block for the next radio interrupt, then run it through the engine.
    /// Call this in a loop from the dedicated UWB task.
    pub fn run_once(&mut self) {
        self.signal.wait();
        self.engine.service_isr();
    }
}

/// Interrupt-less fallback entry point, for boards without a usable IRQ
/// line wired up: poll the driver directly instead of blocking on a
/// signal. Kept as an alternate path alongside the primary, signal-driven
/// [`EventLoop`], mirroring the polling fallback in the firmware this
/// protocol is distilled from.
pub fn poll_once<D: RadioDriver, O: Observer, C: NodeContext>(engine: &mut Engine<D, O, C>) {
    engine.service_isr();
}
