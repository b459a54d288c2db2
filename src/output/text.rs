//! Default streamed text output: the conventional `traceroute`-style line
//! per hop, one column per probe outcome.

use super::{Entry, Report};

pub fn render(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("traceroute to {} from {}, protocol {:?}\n", report.to, report.from, report.protocol));

    for hop in &report.hops {
        out.push_str(&format!("{:2} ", hop.hop));
        for entry in &hop.entries {
            match entry {
                Entry::Reply { from, rtt_ms, .. } => out.push_str(&format!(" {}  {:.3} ms", from, rtt_ms)),
                Entry::Star { .. } => out.push_str("  *"),
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HopRecord;
    use crate::probe::{Address, ProbeProtocol};
    use std::net::Ipv4Addr;

    #[test]
    fn renders_one_line_per_hop() {
        let report = Report {
            from: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            to: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
            protocol: ProbeProtocol::Udp,
            hops: vec![
                HopRecord {
                    hop: 1,
                    entries: vec![Entry::Reply { from: Address::V4(Ipv4Addr::new(10, 0, 0, 2)), src_port: 1, dst_port: 2, flow_id: 3, rtt_ms: 1.5 }],
                },
                HopRecord { hop: 2, entries: vec![Entry::Star { src_port: 1, dst_port: 2, flow_id: 4 }] },
            ],
        };
        let rendered = render(&report);
        assert_eq!(rendered.lines().count(), 3);
        assert!(rendered.contains("10.0.0.2"));
        assert!(rendered.contains('*'));
    }
}
