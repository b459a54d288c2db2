//! ICMPv4 (RFC 792) / ICMPv6 (RFC 4443) echo and error header. Both share
//! the same 8-byte layout: `type, code, checksum, identifier, sequence`
//! (the last four bytes are "unused" on time-exceeded/unreachable, but
//! exposing them as identifier/sequence keeps the field table uniform and
//! lets [`crate::packet::Packet::get_field`] read the quoted header's tag
//! fields the same way for both message classes).

use super::{FieldSpec, WireType};

pub const HEADER_LEN: usize = 8;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "type", wire_type: WireType::U8, offset: 0 },
    FieldSpec { name: "code", wire_type: WireType::U8, offset: 1 },
    FieldSpec { name: "checksum", wire_type: WireType::U16, offset: 2 },
    FieldSpec { name: "identifier", wire_type: WireType::U16, offset: 4 },
    FieldSpec { name: "sequence", wire_type: WireType::U16, offset: 6 },
];

pub mod v4 {
    pub const ECHO_REQUEST: u8 = 8;
    pub const ECHO_REPLY: u8 = 0;
    pub const TIME_EXCEEDED: u8 = 11;
    pub const DEST_UNREACHABLE: u8 = 3;
}

pub mod v6 {
    pub const ECHO_REQUEST: u8 = 128;
    pub const ECHO_REPLY: u8 = 129;
    pub const TIME_EXCEEDED: u8 = 3;
    pub const DEST_UNREACHABLE: u8 = 1;
}
