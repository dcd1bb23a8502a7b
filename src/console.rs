//! Operator console: a line-oriented command port plus newline-delimited
//! JSON event rendering.
//!
//! No JSON crate appears anywhere in the corpus this engine was built from,
//! so output is assembled by hand with `core::fmt::Write` into a fixed
//! buffer, the same direct, no-allocation style used elsewhere in this
//! codebase to build wire buffers byte-by-byte.

use core::fmt::Write;

use crate::engine::{NodeContext, RangeFinalResult, RangeReportResult};
use crate::observer::Observer;
use crate::radio::RadioDriver;
use crate::wire::PingResp;
use crate::Engine;

/// Longest line this console ever parses or emits.
pub type LineBuf = heapless::String<heapless::consts::U96>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Ping { node_id: u16 },
    Trigger { initiator_id: u16, responder_id: u16 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParseError {
    UnknownCommand,
    MissingArgument,
    BadInteger,
}

/// Parse a u16 argument, auto-detecting base: a `0x`/`0X` prefix selects
/// hexadecimal, otherwise decimal.
fn parse_u16(tok: &str) -> Result<u16, ParseError> {
    let (digits, radix) = if let Some(rest) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        (rest, 16)
    } else {
        (tok, 10)
    };
    u16::from_str_radix(digits, radix).map_err(|_| ParseError::BadInteger)
}

/// Parse one console line (already stripped of the trailing newline).
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("ping") => {
            let node_id = parse_u16(tokens.next().ok_or(ParseError::MissingArgument)?)?;
            Ok(Command::Ping { node_id })
        }
        Some("trigger") => {
            let initiator_id = parse_u16(tokens.next().ok_or(ParseError::MissingArgument)?)?;
            let responder_id = parse_u16(tokens.next().ok_or(ParseError::MissingArgument)?)?;
            Ok(Command::Trigger {
                initiator_id,
                responder_id,
            })
        }
        _ => Err(ParseError::UnknownCommand),
    }
}

/// Run a parsed command against the engine. Returns `false` (without
/// raising an error) when the engine was busy; matches
/// [`Engine::send_ping_req`]/[`Engine::send_range_trigger`]'s own contract.
pub fn run_command<D: RadioDriver, O: Observer, C: NodeContext>(
    cmd: Command,
    engine: &mut Engine<D, O, C>,
) -> Result<bool, crate::engine::EngineError> {
    match cmd {
        Command::Ping { node_id } => engine.send_ping_req(node_id),
        Command::Trigger {
            initiator_id,
            responder_id,
        } => engine.send_range_trigger(initiator_id, responder_id),
    }
}

/// Render a completed PING_RESP as newline-delimited JSON into `buf`,
/// returning the slice written (including the trailing `\n`).
pub fn format_ping_resp_event<'a>(
    buf: &'a mut LineBuf,
    node_id: u16,
    resp: &PingResp,
) -> &'a str {
    buf.clear();
    let _ = write!(
        buf,
        "{{\"event\":\"ping_resp\",\"node_id\":{},\"system_state\":{},\"voltage_mv\":{}}}\n",
        node_id, resp.system_state, resp.voltage_mv
    );
    buf.as_str()
}

fn format_range_event<'a>(
    buf: &'a mut LineBuf,
    event_name: &str,
    node_a_id: u16,
    node_b_id: u16,
    distance_m: f32,
    rssi_dbm: f32,
) -> &'a str {
    buf.clear();
    let _ = write!(
        buf,
        "{{\"event\":\"{}\",\"node_a_id\":{},\"node_b_id\":{},\"distance_m\":{:.3},\"rssi_dbm\":{:.2}}}\n",
        event_name, node_a_id, node_b_id, distance_m, rssi_dbm
    );
    buf.as_str()
}

pub fn format_range_final_event<'a>(
    buf: &'a mut LineBuf,
    result: &RangeFinalResult,
) -> &'a str {
    format_range_event(
        buf,
        "range_final",
        result.node_a_id,
        result.node_b_id,
        result.distance_m,
        result.rssi_dbm,
    )
}

pub fn format_range_report_event<'a>(
    buf: &'a mut LineBuf,
    result: &RangeReportResult,
) -> &'a str {
    format_range_event(
        buf,
        "range_report",
        result.node_a_id,
        result.node_b_id,
        result.distance_m,
        result.rssi_dbm,
    )
}
