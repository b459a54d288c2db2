//! Single-threaded cooperative event loop.
//!
//! One iteration: compute the wake deadline as `min(next timeout, ∞)`, wait
//! for socket readiness or the wake timer, process whatever batch of events
//! that produced, and dispatch them to the algorithm in arrival order.
//! Suspension happens only at the `tokio::select!` below; handlers never
//! block on I/O themselves.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::net::NetworkIo;
use crate::probe::{Address, Probe, Reply};

/// The events an algorithm's `handle_event` sees.
pub enum Event {
    ProbeReply(Probe, Reply),
    ProbeTimeout(Probe),
}

/// What a handler asked the loop to do while it ran: `send_probe`, `emit`,
/// `finish`. Collected on a [`RuntimeCtx`] and drained by [`EventLoop`]
/// once the handler call returns, since handlers run to completion and
/// never block themselves.
pub struct RuntimeCtx {
    pub dst: Address,
    sends: Vec<(Probe, Duration)>,
    subevents: Vec<String>,
    finished: bool,
}

impl RuntimeCtx {
    pub(crate) fn new(dst: Address) -> Self {
        Self { dst, sends: Vec::new(), subevents: Vec::new(), finished: false }
    }

    pub fn send_probe(&mut self, probe: Probe, timeout: Duration) {
        self.sends.push((probe, timeout));
    }

    pub fn emit(&mut self, subevent: impl Into<String>) {
        self.subevents.push(subevent.into());
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    #[cfg(test)]
    pub fn sent_probes(&self) -> impl Iterator<Item = &Probe> {
        self.sends.iter().map(|(p, _)| p)
    }
}

use crate::algorithm::Algorithm;

/// Runs one algorithm instance to completion against one [`NetworkIo`].
pub struct EventLoop {
    net: NetworkIo,
    dst: Address,
}

impl EventLoop {
    pub fn new(net: NetworkIo, dst: Address) -> Self {
        Self { net, dst }
    }

    /// Drive `algorithm` until it calls `finish()`, emitting its subevents
    /// to `on_emit` as they're produced. Returns once
    /// `ALGORITHM_HAS_TERMINATED` would be delivered.
    pub async fn run(&mut self, algorithm: &mut dyn Algorithm, mut on_emit: impl FnMut(&str)) -> Result<()> {
        let mut ctx = RuntimeCtx::new(self.dst);
        algorithm.init(&mut ctx);
        self.flush(&mut ctx, &mut on_emit).await?;

        loop {
            if ctx.finished {
                break;
            }

            let wake = self.net.next_deadline().unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let now = Instant::now();
            let wait = wake.saturating_duration_since(now);

            // poll_replies() may lose this race against the sleep arm and
            // get dropped mid-await; it stashes matches on `self.net` as it
            // finds them so a cancelled call can't lose what it already
            // found (see NetworkIo::poll_replies).
            tokio::select! {
                result = self.net.poll_replies() => {
                    for (probe, reply) in result? {
                        algorithm.handle_event(&mut ctx, Event::ProbeReply(probe, reply));
                        self.flush(&mut ctx, &mut on_emit).await?;
                        if ctx.finished {
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    for probe in self.net.drain_expired() {
                        algorithm.handle_event(&mut ctx, Event::ProbeTimeout(probe));
                        self.flush(&mut ctx, &mut on_emit).await?;
                        if ctx.finished {
                            break;
                        }
                    }
                }
            }
        }

        debug!(unmatched = self.net.unmatched_replies, "event loop terminating");
        algorithm.free();
        Ok(())
    }

    async fn flush(&mut self, ctx: &mut RuntimeCtx, on_emit: &mut impl FnMut(&str)) -> Result<()> {
        for subevent in ctx.subevents.drain(..) {
            on_emit(&subevent);
        }
        let sends = std::mem::take(&mut ctx.sends);
        for (probe, timeout) in sends {
            self.net.send_probe(probe, ctx.dst, timeout).await?;
        }
        Ok(())
    }
}
