//! IPv6 header field table (RFC 8200). Extension headers are a Non-goal.

use super::{FieldSpec, WireType};

pub const HEADER_LEN: usize = 40;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "version_class_flow", wire_type: WireType::U32, offset: 0 },
    FieldSpec { name: "payload_length", wire_type: WireType::U16, offset: 4 },
    FieldSpec { name: "next_header", wire_type: WireType::U8, offset: 6 },
    FieldSpec { name: "hop_limit", wire_type: WireType::U8, offset: 7 },
    FieldSpec { name: "src_addr", wire_type: WireType::Ipv6, offset: 8 },
    FieldSpec { name: "dst_addr", wire_type: WireType::Ipv6, offset: 24 },
];
