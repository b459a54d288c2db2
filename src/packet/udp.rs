//! UDP header field table (RFC 768).

use super::{FieldSpec, WireType};

pub const HEADER_LEN: usize = 8;

/// Trailing payload bytes a composed datagram carries beyond the fixed
/// header, reserved for the checksum-as-tag suffix so crafting a tag never
/// overwrites the checksum field itself.
pub const TAG_PAYLOAD_LEN: usize = 2;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "src_port", wire_type: WireType::U16, offset: 0 },
    FieldSpec { name: "dst_port", wire_type: WireType::U16, offset: 2 },
    FieldSpec { name: "length", wire_type: WireType::U16, offset: 4 },
    FieldSpec { name: "checksum", wire_type: WireType::U16, offset: 6 },
];
