//! Domain error kinds for the probing pipeline.
//!
//! `thiserror` carries the local taxonomy; `anyhow` is used at the `main`
//! boundary, the usual split between a library's error type and an
//! application's.

use thiserror::Error;

/// Errors produced while building, sending, or correlating probes.
///
/// `Timeout` is not a true error path: a probe timeout is an expected
/// outcome surfaced through `Event::ProbeTimeout`, never through this
/// type's `Timeout` variant being propagated with `?`. It exists here so
/// call sites that need to distinguish "no reply" from "socket failure"
/// have a single enum to match on.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("{0}")]
    OptionConflict(String),

    #[error("failed to resolve address for {host}")]
    AddressResolution { host: String },

    #[error("failed to open raw socket (need CAP_NET_RAW / root): {0}")]
    SocketPermission(#[source] std::io::Error),

    #[error("send failed after {attempts} attempts: {source}")]
    SendFailure {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("field type {0:?} does not support direct assignment")]
    UnsupportedFieldType(crate::packet::WireType),

    #[error("layer {upper} cannot be composed above {lower}")]
    BadLayering { upper: &'static str, lower: &'static str },

    #[error("probe timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, TraceError>;
