//! JSON rendering: built with `serde_json` the way the rest of this crate
//! uses it for structured data rather than hand-formatted strings.

use serde_json::{json, Value};

use super::{protocol_name, Entry, Report};

pub fn render(report: &Report, sorted: bool) -> String {
    let mut results = Vec::new();
    let mut stars = Vec::new();

    for hop in &report.hops {
        if sorted {
            let replies: Vec<Value> = hop.entries.iter().filter_map(|e| reply_obj(hop.hop, e)).collect();
            if !replies.is_empty() {
                results.push(json!({ "hop": hop.hop, "result": replies }));
            }
            let hop_stars: Vec<Value> = hop
                .entries
                .iter()
                .filter(|e| matches!(e, Entry::Star { .. }))
                .map(|e| star_obj(hop.hop, e))
                .collect();
            if !hop_stars.is_empty() {
                stars.push(json!({ "hop": hop.hop, "result": hop_stars }));
            }
        } else {
            let mixed: Vec<Value> = hop
                .entries
                .iter()
                .map(|e| reply_obj(hop.hop, e).unwrap_or_else(|| star_obj(hop.hop, e)))
                .collect();
            results.push(json!({ "hop": hop.hop, "result": mixed }));
        }
    }

    let mut top = json!({
        "from": report.from.to_string(),
        "to": report.to.to_string(),
        "protocol": protocol_name(report.protocol),
        "results": results,
    });

    if sorted {
        top["stars"] = json!(stars);
    }

    serde_json::to_string_pretty(&top).unwrap_or_default()
}

fn reply_obj(hop: u8, entry: &Entry) -> Option<Value> {
    match entry {
        Entry::Reply { from, src_port, dst_port, flow_id, rtt_ms } => Some(json!({
            "type": "reply",
            "from": from.to_string(),
            "src_port": src_port,
            "dst_port": dst_port,
            "flow_id": flow_id,
            "ttl": hop,
            "rtt": rtt_ms,
        })),
        Entry::Star { .. } => None,
    }
}

fn star_obj(hop: u8, entry: &Entry) -> Value {
    match entry {
        Entry::Star { src_port, dst_port, flow_id } => json!({
            "type": "star",
            "src_port": src_port,
            "dst_port": dst_port,
            "flow_id": flow_id,
            "ttl": hop,
        }),
        Entry::Reply { .. } => unreachable!("star_obj called on a reply entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HopRecord;
    use crate::probe::{Address, ProbeProtocol};
    use std::net::Ipv4Addr;

    #[test]
    fn streamed_output_has_no_stars_array() {
        let report = Report {
            from: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            to: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
            protocol: ProbeProtocol::Udp,
            hops: vec![HopRecord { hop: 1, entries: vec![Entry::Star { src_port: 33456, dst_port: 33457, flow_id: 9 }] }],
        };
        let rendered = render(&report, false);
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert!(value.get("stars").is_none());
        assert_eq!(value["results"][0]["result"][0]["type"], "star");
        assert_eq!(value["results"][0]["result"][0]["flow_id"], 9);
    }

    #[test]
    fn sorted_output_splits_stars_into_their_own_array() {
        let report = Report {
            from: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            to: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
            protocol: ProbeProtocol::Udp,
            hops: vec![HopRecord {
                hop: 1,
                entries: vec![
                    Entry::Reply { from: Address::V4(Ipv4Addr::new(10, 0, 0, 2)), src_port: 1, dst_port: 2, flow_id: 3, rtt_ms: 1.5 },
                    Entry::Star { src_port: 1, dst_port: 2, flow_id: 4 },
                ],
            }],
        };
        let rendered = render(&report, true);
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["results"][0]["result"].as_array().unwrap().len(), 1);
        assert_eq!(value["stars"][0]["result"].as_array().unwrap().len(), 1);
    }
}
