//! Forward/reverse DNS for destination parsing and hop name lookup: a thin
//! wrapper over `hickory-resolver` so name resolution follows the same
//! async/error conventions as the rest of the crate instead of shelling out
//! to `getaddrinfo`.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error::{Result, TraceError};
use crate::probe::Address;

pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    pub fn new() -> Self {
        Self { inner: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) }
    }

    /// Resolve `host` to an [`Address`]. Numeric addresses short-circuit
    /// without touching the resolver; `want_v6` picks between an A and
    /// AAAA answer when `host` is a name and the caller has a preferred
    /// family (`-4`/`-6`).
    pub async fn resolve(&self, host: &str, want_v6: bool) -> Result<Address> {
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(ip.into());
        }

        let response = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|_| TraceError::AddressResolution { host: host.to_string() })?;

        response
            .iter()
            .find(|ip| ip.is_ipv6() == want_v6)
            .or_else(|| response.iter().next())
            .map(Address::from)
            .ok_or_else(|| TraceError::AddressResolution { host: host.to_string() })
    }

    /// Reverse-resolve a hop address to a PTR name, for the CLI's default
    /// (non-`-n`) output mode. Failures are swallowed to `None`: an
    /// unresolvable hop still renders, just by address.
    pub async fn reverse(&self, addr: Address) -> Option<String> {
        let ip: std::net::IpAddr = match addr {
            Address::V4(a) => a.into(),
            Address::V6(a) => a.into(),
        };
        let lookup = self.inner.reverse_lookup(ip).await.ok()?;
        lookup.iter().next().map(|name| name.to_string().trim_end_matches('.').to_string())
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
