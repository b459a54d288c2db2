//! IPv4 header field table (RFC 791), offsets relative to the layer start.

use super::{FieldSpec, WireType};

pub const HEADER_LEN: usize = 20;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "version", wire_type: WireType::U4 { high: true }, offset: 0 },
    FieldSpec { name: "ihl", wire_type: WireType::U4 { high: false }, offset: 0 },
    FieldSpec { name: "tos", wire_type: WireType::U8, offset: 1 },
    FieldSpec { name: "total_length", wire_type: WireType::U16, offset: 2 },
    FieldSpec { name: "identification", wire_type: WireType::U16, offset: 4 },
    FieldSpec { name: "flags_fragment", wire_type: WireType::U16, offset: 6 },
    FieldSpec { name: "ttl", wire_type: WireType::U8, offset: 8 },
    FieldSpec { name: "protocol", wire_type: WireType::U8, offset: 9 },
    FieldSpec { name: "checksum", wire_type: WireType::U16, offset: 10 },
    FieldSpec { name: "src_addr", wire_type: WireType::Ipv4, offset: 12 },
    FieldSpec { name: "dst_addr", wire_type: WireType::Ipv4, offset: 16 },
];
