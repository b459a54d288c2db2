//! CLI surface and its reduction to a `Config` value. Parsing and
//! validation are kept separate: `Args` is the raw `clap` surface, `Config`
//! is what the rest of the crate actually runs on, built once by
//! `Config::try_from(Args)` instead of threading flags around individually.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::algorithm::{mda, traceroute};
use crate::error::{Result, TraceError};
use crate::probe::ProbeProtocol;

#[derive(Parser, Debug, Clone)]
#[command(name = "paris-traceroute")]
#[command(about = "Paris traceroute with multipath detection (MDA)")]
#[command(version)]
pub struct Args {
    /// Target hostname or IP address
    pub target: String,

    /// Force IPv4
    #[arg(short = '4', long)]
    pub ipv4: bool,

    /// Force IPv6
    #[arg(short = '6', long)]
    pub ipv6: bool,

    /// Algorithm: paris-traceroute or mda
    #[arg(short = 'a', long, value_enum, default_value_t = Algorithm::ParisTraceroute)]
    pub algorithm: Algorithm,

    /// Output format
    #[arg(short = 'F', long, value_enum, default_value_t = Format::Default)]
    pub format: Format,

    /// Destination port
    #[arg(short = 'p', long)]
    pub dst_port: Option<u16>,

    /// Source port (default 33456)
    #[arg(short = 's', long)]
    pub src_port: Option<u16>,

    /// Inter-probe delay: <=10 is seconds, >10 is milliseconds
    #[arg(short = 'z', long, default_value_t = 0.0)]
    pub wait: f64,

    /// Use ICMP echo probes
    #[arg(short = 'I', long)]
    pub icmp: bool,

    /// Probe protocol (alternative to -I/-T/-U)
    #[arg(short = 'P', long, value_enum)]
    pub protocol: Option<Protocol>,

    /// Use TCP SYN probes (default destination port 80)
    #[arg(short = 'T', long)]
    pub tcp: bool,

    /// Use UDP probes (default destination port 53)
    #[arg(short = 'U', long)]
    pub udp: bool,

    /// Sort output by hop before printing
    #[arg(short = 'S', long)]
    pub sorted: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// First TTL to probe
    #[arg(short = 'f', long, default_value_t = 1)]
    pub first_ttl: u8,

    /// Maximum number of hops
    #[arg(short = 'M', long, default_value_t = 30)]
    pub max_hops: u8,

    /// Probes sent per hop (traceroute mode only)
    #[arg(short = 'q', long, default_value_t = 3)]
    pub num_probes: u8,

    /// MDA stopping-rule confidence parameter, only valid with -a mda
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Consecutive fully-starred hops before giving up
    #[arg(long, default_value_t = 5)]
    pub max_consecutive_stars: u8,

    /// Per-probe timeout in milliseconds
    #[arg(short = 't', long, default_value_t = 3000)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    #[value(name = "paris-traceroute")]
    ParisTraceroute,
    Mda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Default,
    Json,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    Udp,
    Icmp,
    Tcp,
}

const DEFAULT_SRC_PORT: u16 = 33456;

/// `-z`'s seconds/milliseconds split: values of 10 or less are seconds,
/// anything larger is already milliseconds.
pub fn parse_wait(wait: f64) -> Duration {
    if wait <= 10.0 {
        Duration::from_secs_f64(wait)
    } else {
        Duration::from_millis(wait as u64)
    }
}

/// The validated, immutable configuration the rest of the crate runs on.
pub struct Config {
    pub target: String,
    pub want_v6: bool,
    pub algorithm: Algorithm,
    pub format: Format,
    pub protocol: ProbeProtocol,
    pub src_port: u16,
    pub dst_port: u16,
    pub rate_interval: Duration,
    pub sorted: bool,
    pub debug: bool,
    pub traceroute: traceroute::Options,
    pub mda: mda::Options,
}

impl TryFrom<Args> for Config {
    type Error = TraceError;

    fn try_from(args: Args) -> Result<Self> {
        if args.ipv4 && args.ipv6 {
            return Err(TraceError::OptionConflict("Cannot set both ip versions".into()));
        }

        let protocol_flags = [args.icmp, args.tcp, args.udp].iter().filter(|&&b| b).count();
        if protocol_flags > 1 {
            return Err(TraceError::OptionConflict("at most one of -I/-T/-U may be set".into()));
        }

        if args.icmp && (args.dst_port.is_some() || args.src_port.is_some()) {
            return Err(TraceError::OptionConflict("-I cannot be combined with -s or -p".into()));
        }

        if args.algorithm != Algorithm::Mda && args.alpha != 0.05 {
            return Err(TraceError::OptionConflict("--alpha requires -a mda".into()));
        }

        let protocol = if args.icmp {
            ProbeProtocol::Icmp
        } else if args.tcp {
            ProbeProtocol::Tcp
        } else if args.udp {
            ProbeProtocol::Udp
        } else {
            match args.protocol {
                Some(Protocol::Icmp) => ProbeProtocol::Icmp,
                Some(Protocol::Tcp) => ProbeProtocol::Tcp,
                Some(Protocol::Udp) | None => ProbeProtocol::Udp,
            }
        };

        let dst_port = args.dst_port.unwrap_or(match protocol {
            ProbeProtocol::Tcp => 80,
            ProbeProtocol::Udp => 33457,
            ProbeProtocol::Icmp => 0,
        });
        let src_port = args.src_port.unwrap_or(DEFAULT_SRC_PORT);

        let rate_interval = parse_wait(args.wait);

        let traceroute_opts = traceroute::Options {
            first_ttl: args.first_ttl,
            max_ttl: args.max_hops,
            num_probes_per_hop: args.num_probes,
            max_consecutive_stars: args.max_consecutive_stars,
            per_probe_timeout_ms: args.timeout_ms,
            protocol,
            src_port,
            dst_port,
        };

        let mda_opts = mda::Options {
            first_ttl: args.first_ttl,
            max_ttl: args.max_hops,
            alpha: args.alpha,
            per_probe_timeout_ms: args.timeout_ms,
            protocol,
            src_port,
            dst_port,
        };

        Ok(Config {
            target: args.target,
            want_v6: args.ipv6,
            algorithm: args.algorithm,
            format: args.format,
            protocol,
            src_port,
            dst_port,
            rate_interval,
            sorted: args.sorted,
            debug: args.debug,
            traceroute: traceroute_opts,
            mda: mda_opts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["paris-traceroute"];
        argv.extend_from_slice(extra);
        argv.push("example.com");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_conventional_traceroute() {
        let args = parse(&[]);
        assert_eq!(args.first_ttl, 1);
        assert_eq!(args.max_hops, 30);
        assert_eq!(args.num_probes, 3);
        assert!(args.src_port.is_none());
        assert_eq!(args.timeout_ms, 3000);

        let config = Config::try_from(args).unwrap();
        assert_eq!(config.src_port, 33456);
    }

    #[test]
    fn both_ip_versions_conflict() {
        let args = parse(&["-4", "-6"]);
        let err = Config::try_from(args).unwrap_err();
        assert!(matches!(err, TraceError::OptionConflict(msg) if msg == "Cannot set both ip versions"));
    }

    #[test]
    fn icmp_with_explicit_src_port_conflicts() {
        let args = parse(&["-I", "-s", "12345"]);
        assert!(Config::try_from(args).is_err());
    }

    #[test]
    fn icmp_with_src_port_matching_the_default_still_conflicts() {
        // -s's value equals the resolved default (33456), so a u16 field
        // with a clap default_value_t couldn't distinguish this from -s
        // never being passed; Option<u16> can.
        let args = parse(&["-I", "-s", "33456"]);
        assert!(Config::try_from(args).is_err());
    }

    #[test]
    fn alpha_requires_mda() {
        let args = parse(&["--alpha", "0.1"]);
        assert!(Config::try_from(args).is_err());
    }

    #[test]
    fn udp_default_dst_port_is_33457() {
        let args = parse(&[]);
        let config = Config::try_from(args).unwrap();
        assert_eq!(config.dst_port, 33457);
    }

    #[test]
    fn tcp_default_dst_port_is_80() {
        let args = parse(&["-T"]);
        let config = Config::try_from(args).unwrap();
        assert_eq!(config.dst_port, 80);
    }

    #[test]
    fn wait_at_or_below_ten_is_seconds() {
        assert_eq!(parse_wait(0.5), Duration::from_millis(500));
        assert_eq!(parse_wait(10.0), Duration::from_secs(10));
    }

    #[test]
    fn wait_above_ten_is_milliseconds() {
        assert_eq!(parse_wait(500.0), Duration::from_millis(500));
    }
}
