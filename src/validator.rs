//! Inbound frame filtering: group, destination, length, and state
//! acceptability. A single entry point used by the engine before any
//! message handler runs.

use crate::engine::State;
use crate::wire::{Frame, Header, MsgType, WireError, BROADCAST_ADDR};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RejectReason {
    WrongGroup,
    WrongDestination,
    Wire(WireError),
    NotAcceptedInState,
}

/// Whether `msg_type` may be accepted while the engine is in `state`.
pub fn accepted_in_state(state: State, msg_type: MsgType) -> bool {
    matches!(
        (state, msg_type),
        (State::Idle, MsgType::PingReq)
            | (State::Idle, MsgType::RangeTrigger)
            | (State::Idle, MsgType::RangePoll)
            | (State::Idle, MsgType::RangeReport)
            | (State::WaitPingResp, MsgType::PingResp)
            | (State::WaitRangeResp, MsgType::RangeResp)
            | (State::WaitRangeFinal, MsgType::RangeFinal)
            | (State::WaitRangeReport, MsgType::RangeReport)
    )
}

/// Validate and decode a raw received buffer (header + payload, no CRC).
pub fn validate(
    buf: &[u8],
    local_group_id: u16,
    local_node_id: u16,
    state: State,
) -> Result<(Header, Frame), RejectReason> {
    let header = Header::decode(buf).ok_or(RejectReason::Wire(WireError::TooShort))?;

    if header.group_id != local_group_id {
        return Err(RejectReason::WrongGroup);
    }
    if header.dest_id != local_node_id && header.dest_id != BROADCAST_ADDR {
        return Err(RejectReason::WrongDestination);
    }

    let msg_type = MsgType::from_u8(header.msg_type)
        .ok_or(RejectReason::Wire(WireError::UnknownType(header.msg_type)))?;
    if !accepted_in_state(state, msg_type) {
        return Err(RejectReason::NotAcceptedInState);
    }

    let frame = Frame::decode(&header, buf).map_err(RejectReason::Wire)?;
    Ok((header, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;

    fn make_buf(header: &Header) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);
        buf
    }

    #[test]
    fn broadcast_destination_is_accepted() {
        let header = Header {
            group_id: 0x1234,
            src_id: 0x0003,
            dest_id: BROADCAST_ADDR,
            seq_num: 0,
            msg_type: MsgType::RangePoll as u8,
        };
        let buf = make_buf(&header);
        assert!(validate(&buf, 0x1234, 0xFF03, State::Idle).is_ok());
    }

    #[test]
    fn mismatched_destination_is_rejected() {
        let header = Header {
            group_id: 0x1234,
            src_id: 0x0003,
            dest_id: 0xFF04,
            seq_num: 0,
            msg_type: MsgType::RangePoll as u8,
        };
        let buf = make_buf(&header);
        assert_eq!(
            validate(&buf, 0x1234, 0xFF03, State::Idle),
            Err(RejectReason::WrongDestination)
        );
    }

    #[test]
    fn wrong_group_is_rejected() {
        let header = Header {
            group_id: 0x9999,
            src_id: 0x0003,
            dest_id: 0xFF03,
            seq_num: 0,
            msg_type: MsgType::RangePoll as u8,
        };
        let buf = make_buf(&header);
        assert_eq!(
            validate(&buf, 0x1234, 0xFF03, State::Idle),
            Err(RejectReason::WrongGroup)
        );
    }

    #[test]
    fn message_not_accepted_in_current_state_is_rejected() {
        let header = Header {
            group_id: 0x1234,
            src_id: 0x0003,
            dest_id: 0xFF03,
            seq_num: 0,
            msg_type: MsgType::RangeFinal as u8,
        };
        let mut buf = [0u8; HEADER_LEN + 12];
        header.encode(&mut buf);
        assert_eq!(
            validate(&buf, 0x1234, 0xFF03, State::WaitRangeResp),
            Err(RejectReason::NotAcceptedInState)
        );
    }
}
