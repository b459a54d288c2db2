//! Algorithm lifecycle contract shared by the traceroute and MDA state
//! machines. A handler record of `{init, handle_event, free}` becomes a
//! trait object here rather than raw function pointers.

pub mod mda;
pub mod traceroute;

use crate::event::{Event, RuntimeCtx};

/// An algorithm instance: `init` seeds the first probes, `handle_event`
/// reacts to replies/timeouts, `free` releases any residual state once the
/// loop has delivered `ALGORITHM_HAS_TERMINATED`.
pub trait Algorithm {
    fn init(&mut self, ctx: &mut RuntimeCtx);
    fn handle_event(&mut self, ctx: &mut RuntimeCtx, event: Event);
    fn free(&mut self) {}
}
