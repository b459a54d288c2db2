//! XML rendering: hand-rolled element tree mirroring the JSON shape. No
//! XML crate in the dependency stack, so this stays thin string building.

use super::{protocol_name, Entry, Report};

pub fn render(report: &Report, sorted: bool) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<trace from=\"{}\" to=\"{}\" protocol=\"{}\">\n",
        escape(&report.from.to_string()),
        escape(&report.to.to_string()),
        protocol_name(report.protocol),
    ));

    out.push_str("  <results>\n");
    for hop in &report.hops {
        let replies: Vec<&Entry> = if sorted {
            hop.entries.iter().filter(|e| matches!(e, Entry::Reply { .. })).collect()
        } else {
            hop.entries.iter().collect()
        };
        if replies.is_empty() {
            continue;
        }
        out.push_str(&format!("    <hop ttl=\"{}\">\n", hop.hop));
        for entry in replies {
            write_entry(&mut out, hop.hop, entry);
        }
        out.push_str("    </hop>\n");
    }
    out.push_str("  </results>\n");

    if sorted {
        out.push_str("  <stars>\n");
        for hop in &report.hops {
            let stars: Vec<&Entry> = hop.entries.iter().filter(|e| matches!(e, Entry::Star { .. })).collect();
            if stars.is_empty() {
                continue;
            }
            out.push_str(&format!("    <hop ttl=\"{}\">\n", hop.hop));
            for entry in stars {
                write_entry(&mut out, hop.hop, entry);
            }
            out.push_str("    </hop>\n");
        }
        out.push_str("  </stars>\n");
    }

    out.push_str("</trace>\n");
    out
}

fn write_entry(out: &mut String, hop: u8, entry: &Entry) {
    match entry {
        Entry::Reply { from, src_port, dst_port, flow_id, rtt_ms } => {
            out.push_str(&format!(
                "      <reply from=\"{}\" src_port=\"{src_port}\" dst_port=\"{dst_port}\" flow_id=\"{flow_id}\" ttl=\"{hop}\" rtt=\"{rtt_ms:.3}\"/>\n",
                escape(&from.to_string()),
            ));
        }
        Entry::Star { src_port, dst_port, flow_id } => {
            out.push_str(&format!(
                "      <star src_port=\"{src_port}\" dst_port=\"{dst_port}\" flow_id=\"{flow_id}\" ttl=\"{hop}\"/>\n"
            ));
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HopRecord;
    use crate::probe::{Address, ProbeProtocol};
    use std::net::Ipv4Addr;

    #[test]
    fn emits_a_well_formed_element_per_hop() {
        let report = Report {
            from: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            to: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
            protocol: ProbeProtocol::Udp,
            hops: vec![HopRecord {
                hop: 1,
                entries: vec![Entry::Reply { from: Address::V4(Ipv4Addr::new(10, 0, 0, 2)), src_port: 1, dst_port: 2, flow_id: 3, rtt_ms: 1.5 }],
            }],
        };
        let rendered = render(&report, false);
        assert!(rendered.contains("<hop ttl=\"1\">"));
        assert!(rendered.contains("10.0.0.2"));
        assert!(!rendered.contains("<stars>"));
    }

    #[test]
    fn sorted_stars_carry_flow_identifying_fields() {
        let report = Report {
            from: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            to: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
            protocol: ProbeProtocol::Udp,
            hops: vec![HopRecord { hop: 2, entries: vec![Entry::Star { src_port: 33456, dst_port: 33457, flow_id: 9 }] }],
        };
        let rendered = render(&report, true);
        assert!(rendered.contains("<stars>"));
        assert!(rendered.contains("flow_id=\"9\""));
        assert!(rendered.contains("ttl=\"2\""));
    }
}
