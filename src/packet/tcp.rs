//! TCP header field table (RFC 9293), options unsupported (Non-goal: no
//! active connection setup — this codec only ever emits a bare SYN probe).

use super::{FieldSpec, WireType};

pub const HEADER_LEN: usize = 20;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "src_port", wire_type: WireType::U16, offset: 0 },
    FieldSpec { name: "dst_port", wire_type: WireType::U16, offset: 2 },
    FieldSpec { name: "seq_num", wire_type: WireType::U32, offset: 4 },
    FieldSpec { name: "ack_num", wire_type: WireType::U32, offset: 8 },
    FieldSpec { name: "data_offset", wire_type: WireType::U4 { high: true }, offset: 12 },
    FieldSpec { name: "flags", wire_type: WireType::U8, offset: 13 },
    FieldSpec { name: "window", wire_type: WireType::U16, offset: 14 },
    FieldSpec { name: "checksum", wire_type: WireType::U16, offset: 16 },
    FieldSpec { name: "urgent_pointer", wire_type: WireType::U16, offset: 18 },
];

pub mod flags {
    pub const SYN: u8 = 0b0000_0010;
}
