//! On-the-wire frame layout for the ranging protocol.
//!
//! Every field is little-endian and written byte-by-byte; we never rely on
//! the target's struct layout rules for wire compatibility with a remote
//! peer. The trailing 2-byte CRC slot is owned by the transceiver hardware
//! and is neither read nor written here.

use defmt::Format;

/// Group/src/dest/seq/type header shared by every message.
pub const HEADER_LEN: usize = 8;

/// Broadcast destination address.
pub const BROADCAST_ADDR: u16 = 0xFFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub struct Header {
    pub group_id: u16,
    pub src_id: u16,
    pub dest_id: u16,
    pub seq_num: u8,
    pub msg_type: u8,
}

impl Header {
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.group_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.src_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.dest_id.to_le_bytes());
        buf[6] = self.seq_num;
        buf[7] = self.msg_type;
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            group_id: u16::from_le_bytes([buf[0], buf[1]]),
            src_id: u16::from_le_bytes([buf[2], buf[3]]),
            dest_id: u16::from_le_bytes([buf[4], buf[5]]),
            seq_num: buf[6],
            msg_type: buf[7],
        })
    }
}

/// Discriminant values, matching the firmware this protocol was distilled
/// from byte-for-byte.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum MsgType {
    PingReq = 0x01,
    PingResp = 0x02,
    RangeTrigger = 0x11,
    RangePoll = 0x12,
    RangeResp = 0x13,
    RangeFinal = 0x14,
    RangeReport = 0x15,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => Self::PingReq,
            0x02 => Self::PingResp,
            0x11 => Self::RangeTrigger,
            0x12 => Self::RangePoll,
            0x13 => Self::RangeResp,
            0x14 => Self::RangeFinal,
            0x15 => Self::RangeReport,
            _ => return None,
        })
    }

    /// Total frame length (header + payload), not counting the hardware CRC.
    pub const fn frame_len(self) -> usize {
        HEADER_LEN
            + match self {
                Self::PingReq => 0,
                Self::PingResp => 3,
                Self::RangeTrigger => 2,
                Self::RangePoll => 0,
                Self::RangeResp => 0,
                Self::RangeFinal => 12,
                Self::RangeReport => 8,
            }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub struct PingResp {
    pub system_state: u8,
    pub voltage_mv: u16,
}

#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub struct RangeTrigger {
    pub target_node_id: u16,
}

#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub struct RangeFinal {
    pub poll_tx_ts: u32,
    pub resp_rx_ts: u32,
    pub final_tx_ts: u32,
}

#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub struct RangeReport {
    pub node_a_id: u16,
    pub node_b_id: u16,
    pub distance_cm: u16,
    pub rssi_centi_dbm: i16,
}

/// A fully typed frame: header plus payload.
#[derive(Clone, Copy, PartialEq, Debug, Format)]
pub enum Frame {
    PingReq,
    PingResp(PingResp),
    RangeTrigger(RangeTrigger),
    RangePoll,
    RangeResp,
    RangeFinal(RangeFinal),
    RangeReport(RangeReport),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Format)]
pub enum WireError {
    TooShort,
    BadLength,
    UnknownType(u8),
}

impl Frame {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::PingReq => MsgType::PingReq,
            Self::PingResp(_) => MsgType::PingResp,
            Self::RangeTrigger(_) => MsgType::RangeTrigger,
            Self::RangePoll => MsgType::RangePoll,
            Self::RangeResp => MsgType::RangeResp,
            Self::RangeFinal(_) => MsgType::RangeFinal,
            Self::RangeReport(_) => MsgType::RangeReport,
        }
    }

    /// Encode the header and payload into `buf`, returning the number of
    /// bytes written. `buf` must be at least `msg_type().frame_len()` long.
    pub fn encode(&self, header: &Header, buf: &mut [u8]) -> usize {
        header.encode(buf);
        let len = self.msg_type().frame_len();
        match self {
            Self::PingReq | Self::RangePoll | Self::RangeResp => {}
            Self::PingResp(p) => {
                buf[HEADER_LEN] = p.system_state;
                buf[HEADER_LEN + 1..HEADER_LEN + 3].copy_from_slice(&p.voltage_mv.to_le_bytes());
            }
            Self::RangeTrigger(t) => {
                buf[HEADER_LEN..HEADER_LEN + 2].copy_from_slice(&t.target_node_id.to_le_bytes());
            }
            Self::RangeFinal(f) => {
                buf[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&f.poll_tx_ts.to_le_bytes());
                buf[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&f.resp_rx_ts.to_le_bytes());
                buf[HEADER_LEN + 8..HEADER_LEN + 12].copy_from_slice(&f.final_tx_ts.to_le_bytes());
            }
            Self::RangeReport(r) => {
                buf[HEADER_LEN..HEADER_LEN + 2].copy_from_slice(&r.node_a_id.to_le_bytes());
                buf[HEADER_LEN + 2..HEADER_LEN + 4].copy_from_slice(&r.node_b_id.to_le_bytes());
                buf[HEADER_LEN + 4..HEADER_LEN + 6].copy_from_slice(&r.distance_cm.to_le_bytes());
                buf[HEADER_LEN + 6..HEADER_LEN + 8]
                    .copy_from_slice(&r.rssi_centi_dbm.to_le_bytes());
            }
        }
        len
    }

    /// Decode a frame given its header (already validated) and the full
    /// received buffer (header + payload, no CRC).
    pub fn decode(header: &Header, buf: &[u8]) -> Result<Self, WireError> {
        let msg_type = MsgType::from_u8(header.msg_type).ok_or(WireError::UnknownType(header.msg_type))?;
        if buf.len() != msg_type.frame_len() {
            return Err(WireError::BadLength);
        }
        Ok(match msg_type {
            MsgType::PingReq => Self::PingReq,
            MsgType::RangePoll => Self::RangePoll,
            MsgType::RangeResp => Self::RangeResp,
            MsgType::PingResp => Self::PingResp(PingResp {
                system_state: buf[HEADER_LEN],
                voltage_mv: u16::from_le_bytes([buf[HEADER_LEN + 1], buf[HEADER_LEN + 2]]),
            }),
            MsgType::RangeTrigger => Self::RangeTrigger(RangeTrigger {
                target_node_id: u16::from_le_bytes([buf[HEADER_LEN], buf[HEADER_LEN + 1]]),
            }),
            MsgType::RangeFinal => Self::RangeFinal(RangeFinal {
                poll_tx_ts: u32::from_le_bytes([
                    buf[HEADER_LEN],
                    buf[HEADER_LEN + 1],
                    buf[HEADER_LEN + 2],
                    buf[HEADER_LEN + 3],
                ]),
                resp_rx_ts: u32::from_le_bytes([
                    buf[HEADER_LEN + 4],
                    buf[HEADER_LEN + 5],
                    buf[HEADER_LEN + 6],
                    buf[HEADER_LEN + 7],
                ]),
                final_tx_ts: u32::from_le_bytes([
                    buf[HEADER_LEN + 8],
                    buf[HEADER_LEN + 9],
                    buf[HEADER_LEN + 10],
                    buf[HEADER_LEN + 11],
                ]),
            }),
            MsgType::RangeReport => Self::RangeReport(RangeReport {
                node_a_id: u16::from_le_bytes([buf[HEADER_LEN], buf[HEADER_LEN + 1]]),
                node_b_id: u16::from_le_bytes([buf[HEADER_LEN + 2], buf[HEADER_LEN + 3]]),
                distance_cm: u16::from_le_bytes([buf[HEADER_LEN + 4], buf[HEADER_LEN + 5]]),
                rssi_centi_dbm: i16::from_le_bytes([buf[HEADER_LEN + 6], buf[HEADER_LEN + 7]]),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(msg_type: u8) -> Header {
        Header {
            group_id: 0x1234,
            src_id: 0xFF03,
            dest_id: 0x0003,
            seq_num: 7,
            msg_type,
        }
    }

    #[test]
    fn header_round_trip() {
        let h = hdr(0x14);
        let mut buf = [0u8; HEADER_LEN];
        h.encode(&mut buf);
        assert_eq!(Header::decode(&buf).unwrap(), h);
    }

    #[test]
    fn round_trip_every_message_type() {
        let frames = [
            Frame::PingReq,
            Frame::PingResp(PingResp {
                system_state: 0x42,
                voltage_mv: 3720,
            }),
            Frame::RangeTrigger(RangeTrigger {
                target_node_id: 0x0003,
            }),
            Frame::RangePoll,
            Frame::RangeResp,
            Frame::RangeFinal(RangeFinal {
                poll_tx_ts: 0xFFFF_FFFE,
                resp_rx_ts: 1,
                final_tx_ts: 500_000,
            }),
            Frame::RangeReport(RangeReport {
                node_a_id: 0xFF03,
                node_b_id: 0x0003,
                distance_cm: 234,
                rssi_centi_dbm: -5676,
            }),
        ];

        for frame in frames {
            let header = hdr(frame.msg_type() as u8);
            let mut buf = [0u8; 32];
            let len = frame.encode(&header, &mut buf);
            assert_eq!(len, frame.msg_type().frame_len());
            let decoded_header = Header::decode(&buf).unwrap();
            let decoded = Frame::decode(&decoded_header, &buf[..len]).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn bad_length_is_rejected() {
        let header = hdr(MsgType::PingResp as u8);
        let short = [0u8; HEADER_LEN + 2];
        assert_eq!(Frame::decode(&header, &short), Err(WireError::BadLength));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let header = hdr(0xAB);
        let buf = [0u8; HEADER_LEN];
        assert_eq!(Frame::decode(&header, &buf), Err(WireError::UnknownType(0xAB)));
    }
}
