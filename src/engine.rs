//! The ranging protocol state machine: one instance per node, advanced
//! exclusively from the four radio callbacks plus the two user-initiated
//! send requests.

use defmt::Format;

use crate::identity::Identity;
use crate::observer::{EventKind, Observer};
use crate::radio::{Diagnostics, IsrCause, RadioDriver, RadioError, TxFlags};
use crate::timestamp::{
    distance_from_dstwr, predicted_tx_timestamp, rssi_dbm, schedule_tx_at, DsTwrTimestamps,
};
use crate::validator;
use crate::wire::{
    Frame, Header, PingResp, RangeFinal, RangeReport, RangeTrigger, BROADCAST_ADDR, HEADER_LEN,
};

/// Default radio receive timeout while waiting for a PING_RESP.
pub const PING_RX_TIMEOUT_UUS: u32 = 30_000;
/// Default radio receive timeout while waiting for a RANGE_RESP.
pub const RANGE_RESP_RX_TIMEOUT_UUS: u32 = 30_000;
/// Default radio receive timeout while waiting for a RANGE_FINAL.
pub const RANGE_FINAL_RX_TIMEOUT_UUS: u32 = 30_000;
/// Delay between receiving RANGE_POLL and transmitting RANGE_RESP.
pub const RANGE_RESP_TX_DELAY_UUS: u32 = 5_000;
/// Delay between receiving RANGE_RESP and transmitting RANGE_FINAL.
pub const RANGE_FINAL_TX_DELAY_UUS: u32 = 5_000;

/// Largest frame this engine ever builds or accepts (RANGE_FINAL is the
/// longest at `HEADER_LEN + 12`); sized with headroom for the CRC slot some
/// drivers include in the same buffer.
pub const MAX_FRAME_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum State {
    Idle,
    WaitPingResp,
    WaitRangeResp,
    WaitRangeFinal,
    /// Reserved: no code path in this engine ever transitions into this
    /// state today (matching the firmware this protocol is distilled
    /// from). Kept in the enum because `RANGE_REPORT` frames are still
    /// valid to receive while in it, per the acceptance table.
    WaitRangeReport,
}

#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub enum EngineError {
    Radio(RadioError),
}

impl From<RadioError> for EngineError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// External context the engine needs but does not own: wall-clock millis
/// and the two dynamic fields of a PING_RESP. Implemented by the board
/// integration (battery sampler, system tick), out of scope for this crate.
pub trait NodeContext {
    fn now_ms(&self) -> u32;
    fn system_state(&self) -> u8;
    fn battery_mv(&self) -> u16;
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct PingResult {
    pub received: bool,
    pub ts_ms: u32,
    pub remote_node_id: u16,
    pub remote_system_state: u8,
    pub remote_voltage_mv: u16,
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RangeFinalResult {
    pub received: bool,
    pub ts_ms: u32,
    pub node_a_id: u16,
    pub node_b_id: u16,
    pub distance_m: f32,
    pub rssi_dbm: f32,
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RangeReportResult {
    pub received: bool,
    pub ts_ms: u32,
    pub node_a_id: u16,
    pub node_b_id: u16,
    pub distance_m: f32,
    pub rssi_dbm: f32,
}

pub struct Engine<D: RadioDriver, O: Observer, C: NodeContext> {
    driver: D,
    observer: O,
    ctx: C,
    identity: Identity,
    state: State,
    seq_num: u8,
    tx_buf: [u8; MAX_FRAME_LEN],
    rx_buf: [u8; MAX_FRAME_LEN],
    poll_rx_ts_saved: Option<u32>,
    pub ping_result: PingResult,
    pub range_final_result: RangeFinalResult,
    pub range_report_result: RangeReportResult,
}

impl<D: RadioDriver, O: Observer, C: NodeContext> Engine<D, O, C> {
    pub fn new(driver: D, observer: O, ctx: C, identity: Identity) -> Self {
        Self {
            driver,
            observer,
            ctx,
            identity,
            state: State::Idle,
            seq_num: 0,
            tx_buf: [0u8; MAX_FRAME_LEN],
            rx_buf: [0u8; MAX_FRAME_LEN],
            poll_rx_ts_saved: None,
            ping_result: PingResult::default(),
            range_final_result: RangeFinalResult::default(),
            range_report_result: RangeReportResult::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Change local identity and persist it, matching the write-through,
    /// idempotent-write contract of [`crate::identity::Identity::store`].
    pub fn set_identity(&mut self, identity: Identity, store: &mut impl crate::identity::NvmStore) {
        identity.store(store);
        self.identity = identity;
    }

    fn local_node_id_u16(&self) -> u16 {
        self.identity.node_id.to_u16()
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq_num;
        self.seq_num = self.seq_num.wrapping_add(1);
        seq
    }

    fn header(&mut self, dest_id: u16, msg_type: u8) -> Header {
        Header {
            group_id: self.identity.group_id,
            src_id: self.local_node_id_u16(),
            dest_id,
            seq_num: self.next_seq(),
            msg_type,
        }
    }

    /// Encode `frame` into the scratch TX buffer and hand it to the driver,
    /// then start the transmit per `flags`/`rx_after`/`rx_timeout_uus`.
    fn send(
        &mut self,
        dest_id: u16,
        frame: Frame,
        flags: TxFlags,
        rx_after: bool,
        rx_timeout_uus: u32,
    ) -> Result<(), EngineError> {
        let header = self.header(dest_id, frame.msg_type() as u8);
        let len = frame.encode(&header, &mut self.tx_buf);
        self.driver.set_rx_timeout(rx_timeout_uus)?;
        self.driver.write_tx(&self.tx_buf, len)?;
        self.driver.start_tx(flags, rx_after)?;
        Ok(())
    }

    /// Return the engine to `IDLE` and re-arm continuous receive. Used on
    /// any error path; the engine never retries within an exchange.
    fn fail_to_idle(&mut self) {
        self.state = State::Idle;
        self.poll_rx_ts_saved = None;
        let _ = self.driver.force_trx_off();
        let _ = self.driver.rx_reset();
        let _ = self.driver.set_rx_timeout(0);
        let _ = self.driver.rx_enable();
    }

    // ---- user-initiated requests -----------------------------------

    /// Send a PING_REQ to `dest_id`. Returns `Ok(false)` without sending
    /// anything if the machine is not idle; returns `Err` only if the
    /// driver itself failed to start the transmit.
    pub fn send_ping_req(&mut self, dest_id: u16) -> Result<bool, EngineError> {
        if self.state != State::Idle {
            return Ok(false);
        }
        match self.send(dest_id, Frame::PingReq, TxFlags::Immediate, true, PING_RX_TIMEOUT_UUS) {
            Ok(()) => {
                self.state = State::WaitPingResp;
                Ok(true)
            }
            Err(e) => {
                self.fail_to_idle();
                Err(e)
            }
        }
    }

    /// Ask `initiator_id` to range against `responder_id`. The calling node
    /// does not itself enter a waiting state: it is the initiator (node A)
    /// that will do so once it acts on the RANGE_TRIGGER.
    pub fn send_range_trigger(&mut self, initiator_id: u16, responder_id: u16) -> Result<bool, EngineError> {
        if self.state != State::Idle {
            return Ok(false);
        }
        let frame = Frame::RangeTrigger(RangeTrigger {
            target_node_id: responder_id,
        });
        match self.send(initiator_id, frame, TxFlags::Immediate, true, 0) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.fail_to_idle();
                Err(e)
            }
        }
    }

    // ---- ISR-sourced callbacks --------------------------------------

    /// Poll the driver for the pending interrupt cause and dispatch to the
    /// matching callback. Called once per wakeup by the event loop.
    pub fn service_isr(&mut self) {
        match self.driver.isr_cause() {
            Some(IsrCause::RxOk) => self.on_rx_ok(),
            Some(IsrCause::RxTimeout) => self.on_rx_timeout(),
            Some(IsrCause::RxError) => self.on_rx_error(),
            Some(IsrCause::TxDone) => self.on_tx_done(),
            None => {}
        }
    }

    fn on_rx_ok(&mut self) {
        let len = match self.driver.read_rx_frame(&mut self.rx_buf) {
            Ok(len) => len,
            Err(_) => {
                self.observer.on_event(EventKind::UnknownFrameError);
                self.fail_to_idle();
                return;
            }
        };

        let mut scratch = [0u8; MAX_FRAME_LEN];
        scratch[..len].copy_from_slice(&self.rx_buf[..len]);

        match validator::validate(
            &scratch[..len],
            self.identity.group_id,
            self.local_node_id_u16(),
            self.state,
        ) {
            Ok((header, frame)) => self.dispatch(header, frame),
            Err(_rejected) => {
                self.observer.on_event(EventKind::InvalidFrameReceived);
                let _ = self.driver.force_trx_off();
                let _ = self.driver.rx_reset();
                let _ = self.driver.set_rx_timeout(0);
                let _ = self.driver.rx_enable();
            }
        }
    }

    fn on_rx_timeout(&mut self) {
        let event = match self.state {
            State::WaitPingResp => EventKind::PingRespTimeout,
            State::WaitRangeResp => EventKind::RangeRespTimeout,
            State::WaitRangeFinal => EventKind::RangeFinalTimeout,
            State::WaitRangeReport => EventKind::RangeReportTimeout,
            State::Idle => EventKind::UnknownFrameTimeout,
        };
        self.observer.on_event(event);
        self.fail_to_idle();
    }

    fn on_rx_error(&mut self) {
        let event = match self.state {
            State::WaitPingResp => EventKind::PingRespTimeout,
            State::WaitRangeResp => EventKind::RangeRespTimeout,
            State::WaitRangeFinal => EventKind::RangeFinalTimeout,
            State::WaitRangeReport => EventKind::RangeReportTimeout,
            State::Idle => EventKind::UnknownFrameError,
        };
        self.observer.on_event(event);
        self.fail_to_idle();
    }

    fn on_tx_done(&mut self) {
        if self.state == State::Idle {
            let _ = self.driver.set_rx_timeout(0);
            let _ = self.driver.rx_enable();
        }
    }

    fn dispatch(&mut self, header: Header, frame: Frame) {
        match frame {
            Frame::PingReq => self.handle_ping_req(header),
            Frame::PingResp(p) => self.handle_ping_resp(header, p),
            Frame::RangeTrigger(t) => self.handle_range_trigger(header, t),
            Frame::RangePoll => self.handle_range_poll(header),
            Frame::RangeResp => self.handle_range_resp(header),
            Frame::RangeFinal(f) => self.handle_range_final(header, f),
            Frame::RangeReport(r) => self.handle_range_report(r),
        }
    }

    fn handle_ping_req(&mut self, header: Header) {
        let payload = PingResp {
            system_state: self.ctx.system_state(),
            voltage_mv: self.ctx.battery_mv(),
        };
        if self
            .send(header.src_id, Frame::PingResp(payload), TxFlags::Immediate, true, 0)
            .is_err()
        {
            self.fail_to_idle();
        }
    }

    fn handle_ping_resp(&mut self, header: Header, payload: PingResp) {
        self.ping_result = PingResult {
            received: true,
            ts_ms: self.ctx.now_ms(),
            remote_node_id: header.src_id,
            remote_system_state: payload.system_state,
            remote_voltage_mv: payload.voltage_mv,
        };
        self.state = State::Idle;
        let _ = self.driver.set_rx_timeout(0);
        let _ = self.driver.rx_enable();
    }

    fn handle_range_trigger(&mut self, _header: Header, payload: RangeTrigger) {
        match self.send(
            payload.target_node_id,
            Frame::RangePoll,
            TxFlags::Immediate,
            true,
            RANGE_RESP_RX_TIMEOUT_UUS,
        ) {
            Ok(()) => self.state = State::WaitRangeResp,
            Err(_) => self.fail_to_idle(),
        }
    }

    fn handle_range_poll(&mut self, header: Header) {
        let poll_rx_ts_64 = match self.driver.read_rx_timestamp() {
            Ok(ts) => ts,
            Err(_) => return self.fail_to_idle(),
        };
        self.poll_rx_ts_saved = Some(poll_rx_ts_64 as u32);

        let scheduled = schedule_tx_at(poll_rx_ts_64, RANGE_RESP_TX_DELAY_UUS);
        if self.driver.set_delayed_tx_time(scheduled).is_err() {
            return self.fail_to_idle();
        }

        match self.send(
            header.src_id,
            Frame::RangeResp,
            TxFlags::Delayed,
            true,
            RANGE_FINAL_RX_TIMEOUT_UUS,
        ) {
            Ok(()) => self.state = State::WaitRangeFinal,
            Err(_) => self.fail_to_idle(),
        }
    }

    fn handle_range_resp(&mut self, header: Header) {
        let poll_tx_ts = match self.driver.read_tx_timestamp() {
            Ok(ts) => ts as u32,
            Err(_) => return self.fail_to_idle(),
        };
        let resp_rx_ts_64 = match self.driver.read_rx_timestamp() {
            Ok(ts) => ts,
            Err(_) => return self.fail_to_idle(),
        };

        let scheduled = schedule_tx_at(resp_rx_ts_64, RANGE_FINAL_TX_DELAY_UUS);
        let predicted_final_tx_ts = predicted_tx_timestamp(scheduled, self.driver.tx_antenna_delay());

        if self.driver.set_delayed_tx_time(scheduled).is_err() {
            return self.fail_to_idle();
        }

        let payload = RangeFinal {
            poll_tx_ts,
            resp_rx_ts: resp_rx_ts_64 as u32,
            final_tx_ts: predicted_final_tx_ts,
        };

        match self.send(header.src_id, Frame::RangeFinal(payload), TxFlags::Delayed, false, 0) {
            Ok(()) => self.state = State::Idle,
            Err(_) => self.fail_to_idle(),
        }
    }

    fn handle_range_final(&mut self, header: Header, payload: RangeFinal) {
        let poll_rx_ts = self.poll_rx_ts_saved.take().unwrap_or(0);
        let resp_tx_ts = match self.driver.read_tx_timestamp() {
            Ok(ts) => ts as u32,
            Err(_) => return self.fail_to_idle(),
        };
        let final_rx_ts = match self.driver.read_rx_timestamp() {
            Ok(ts) => ts as u32,
            Err(_) => return self.fail_to_idle(),
        };

        let ts = DsTwrTimestamps {
            poll_tx_ts: payload.poll_tx_ts,
            poll_rx_ts,
            resp_tx_ts,
            resp_rx_ts: payload.resp_rx_ts,
            final_tx_ts: payload.final_tx_ts,
            final_rx_ts,
        };
        let distance_m = distance_from_dstwr(&ts);

        let rssi = match self.driver.read_diagnostics() {
            Ok(Diagnostics {
                cir_power,
                preamble_acc_count,
            }) => rssi_dbm(cir_power, preamble_acc_count),
            Err(_) => return self.fail_to_idle(),
        };

        let node_a_id = header.src_id;
        let node_b_id = self.local_node_id_u16();

        self.range_final_result = RangeFinalResult {
            received: true,
            ts_ms: self.ctx.now_ms(),
            node_a_id,
            node_b_id,
            distance_m,
            rssi_dbm: rssi,
        };

        let report = RangeReport {
            node_a_id,
            node_b_id,
            distance_cm: (distance_m * 100.0) as u16,
            rssi_centi_dbm: (rssi * 100.0) as i16,
        };

        if self
            .send(BROADCAST_ADDR, Frame::RangeReport(report), TxFlags::Immediate, true, 0)
            .is_err()
        {
            return self.fail_to_idle();
        }
        self.state = State::Idle;
    }

    fn handle_range_report(&mut self, payload: RangeReport) {
        self.range_report_result = RangeReportResult {
            received: true,
            ts_ms: self.ctx.now_ms(),
            node_a_id: payload.node_a_id,
            node_b_id: payload.node_b_id,
            distance_m: payload.distance_cm as f32 / 100.0,
            rssi_dbm: payload.rssi_centi_dbm as f32 / 100.0,
        };
    }
}

const _: () = assert!(HEADER_LEN <= MAX_FRAME_LEN);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeId;
    use crate::observer::EventKind;
    struct MockCtx;
    impl NodeContext for MockCtx {
        fn now_ms(&self) -> u32 {
            1_000
        }
        fn system_state(&self) -> u8 {
            0x42
        }
        fn battery_mv(&self) -> u16 {
            3_720
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: heapless::Vec<EventKind, heapless::consts::U8>,
    }
    impl Observer for RecordingObserver {
        fn on_event(&mut self, event: EventKind) {
            let _ = self.events.push(event);
        }
    }

    /// A radio double that always succeeds and lets tests inject a queued
    /// rx frame and timestamps.
    struct MockRadio {
        tx_antenna_delay: u32,
        tx_ts: u64,
        rx_ts: u64,
        diagnostics: Diagnostics,
        pending_cause: Option<IsrCause>,
        pending_rx_frame: heapless::Vec<u8, heapless::consts::U32>,
    }

    impl Default for MockRadio {
        fn default() -> Self {
            Self {
                tx_antenna_delay: 16_436,
                tx_ts: 0,
                rx_ts: 0,
                diagnostics: Diagnostics {
                    cir_power: 2048,
                    preamble_acc_count: 1024,
                },
                pending_cause: None,
                pending_rx_frame: heapless::Vec::new(),
            }
        }
    }

    impl RadioDriver for MockRadio {
        fn write_tx(&mut self, _buf: &[u8], _len: usize) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_delayed_tx_time(&mut self, _word: u32) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_rx_after_tx_delay(&mut self, _uus: u32) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_rx_timeout(&mut self, _uus: u32) -> Result<(), RadioError> {
            Ok(())
        }
        fn start_tx(&mut self, _flags: TxFlags, _rx_after: bool) -> Result<(), RadioError> {
            self.pending_cause = Some(IsrCause::TxDone);
            Ok(())
        }
        fn rx_enable(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn force_trx_off(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn rx_reset(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
        fn read_tx_timestamp(&mut self) -> Result<u64, RadioError> {
            Ok(self.tx_ts)
        }
        fn read_rx_timestamp(&mut self) -> Result<u64, RadioError> {
            Ok(self.rx_ts)
        }
        fn read_rx_frame(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
            let len = self.pending_rx_frame.len();
            buf[..len].copy_from_slice(&self.pending_rx_frame);
            Ok(len)
        }
        fn read_diagnostics(&mut self) -> Result<Diagnostics, RadioError> {
            Ok(self.diagnostics)
        }
        fn tx_antenna_delay(&self) -> u32 {
            self.tx_antenna_delay
        }
        fn isr_cause(&mut self) -> Option<IsrCause> {
            self.pending_cause.take()
        }
    }

    fn engine() -> Engine<MockRadio, RecordingObserver, MockCtx> {
        Engine::new(
            MockRadio::default(),
            RecordingObserver::default(),
            MockCtx,
            Identity {
                group_id: 0x1234,
                node_id: NodeId::Anchor(3),
            },
        )
    }

    #[test]
    fn busy_send_is_refused_without_touching_state() {
        let mut e = engine();
        e.state = State::WaitPingResp;
        assert_eq!(e.send_range_trigger(0xFF03, 0x0003).unwrap(), false);
        assert_eq!(e.state, State::WaitPingResp);
    }

    #[test]
    fn ping_happy_path_publishes_result_and_returns_idle() {
        let mut e = engine();
        assert!(e.send_ping_req(0x0003).unwrap());
        assert_eq!(e.state, State::WaitPingResp);

        let header = Header {
            group_id: 0x1234,
            src_id: 0x0003,
            dest_id: e.local_node_id_u16(),
            seq_num: 0,
            msg_type: crate::wire::MsgType::PingResp as u8,
        };
        let payload = PingResp {
            system_state: 0x42,
            voltage_mv: 3_720,
        };
        let frame = Frame::PingResp(payload);
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame.encode(&header, &mut buf);
        e.driver.pending_rx_frame.extend_from_slice(&buf[..len]).unwrap();
        e.driver.pending_cause = Some(IsrCause::RxOk);

        e.service_isr();

        assert_eq!(e.state, State::Idle);
        assert!(e.ping_result.received);
        assert_eq!(e.ping_result.remote_node_id, 0x0003);
        assert_eq!(e.ping_result.remote_system_state, 0x42);
        assert_eq!(e.ping_result.remote_voltage_mv, 3_720);
    }

    #[test]
    fn ping_timeout_raises_event_and_returns_idle() {
        let mut e = engine();
        assert!(e.send_ping_req(0x0003).unwrap());
        e.driver.pending_cause = Some(IsrCause::RxTimeout);
        e.service_isr();
        assert_eq!(e.state, State::Idle);
        assert!(!e.ping_result.received);
        assert_eq!(e.observer.events[0], EventKind::PingRespTimeout);
    }

    #[test]
    fn invalid_frame_in_wrong_state_is_dropped() {
        let mut e = engine();
        e.state = State::WaitRangeResp;

        let header = Header {
            group_id: 0x1234,
            src_id: 0x0003,
            dest_id: e.local_node_id_u16(),
            seq_num: 0,
            msg_type: crate::wire::MsgType::RangeFinal as u8,
        };
        let payload = RangeFinal {
            poll_tx_ts: 0,
            resp_rx_ts: 0,
            final_tx_ts: 0,
        };
        let frame = Frame::RangeFinal(payload);
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame.encode(&header, &mut buf);
        e.driver.pending_rx_frame.extend_from_slice(&buf[..len]).unwrap();
        e.driver.pending_cause = Some(IsrCause::RxOk);

        e.service_isr();

        assert_eq!(e.state, State::WaitRangeResp);
        assert_eq!(e.observer.events[0], EventKind::InvalidFrameReceived);
    }
}
