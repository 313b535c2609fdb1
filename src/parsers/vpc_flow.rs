use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{compact_timestamp, csv_int, csv_string, csvline, looks_like_csv, LogParser};
use crate::types::event::NormalizedEvent;

const HEADER_THRESHOLD: usize = 5;

const KNOWN_HEADERS: &[&str] = &[
    "version",
    "account-id",
    "interface-id",
    "srcaddr",
    "dstaddr",
    "srcport",
    "dstport",
    "protocol",
    "packets",
    "bytes",
    "start",
    "end",
    "action",
    "log-status",
    "vpc-id",
    "subnet-id",
    "instance-id",
    "tcp-flags",
    "type",
    "pkt-srcaddr",
    "pkt-dstaddr",
];

/// VPC flow logs are stateful within a stream: the first line must be the
/// header, which binds the column-index map used for every data line after
/// it. A header seen mid-stream re-binds the map.
pub struct VpcFlowParser {
    column_map: Option<Vec<String>>,
}

impl VpcFlowParser {
    pub fn new() -> Self {
        VpcFlowParser { column_map: None }
    }

    fn inspect_header(&mut self, line: &str) -> bool {
        let headers: Vec<&str> = line.split(' ').map(|h| h.trim()).collect();
        let match_count = headers
            .iter()
            .filter(|h| KNOWN_HEADERS.contains(*h))
            .count();

        if match_count < HEADER_THRESHOLD {
            return false;
        }

        self.column_map = Some(headers.into_iter().map(|h| h.to_owned()).collect());
        true
    }

    fn populate_event(&self, columns: &[String]) -> Option<NormalizedEvent> {
        let column_map = self.column_map.as_ref()?;
        let mut vpc_data = BTreeMap::new();
        let mut start_time: Option<DateTime<Utc>> = None;
        let mut end_time: Option<DateTime<Utc>> = None;
        let mut interface_id: Option<String> = None;
        let mut src_addr: Option<String> = None;

        for (i, raw) in columns.iter().enumerate() {
            let Some(header) = column_map.get(i) else {
                continue;
            };
            let value = raw.trim();
            if value.is_empty() || value == "-" {
                continue;
            }

            match header.as_str() {
                "version" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("version".to_string(), Value::from(v));
                    }
                }
                "account-id" => {
                    vpc_data.insert("accountId".to_string(), Value::from(value));
                }
                "interface-id" => {
                    interface_id = csv_string(value);
                    vpc_data.insert("interfaceId".to_string(), Value::from(value));
                }
                "srcaddr" => {
                    src_addr = csv_string(value);
                    vpc_data.insert("srcAddr".to_string(), Value::from(value));
                }
                "dstaddr" => {
                    vpc_data.insert("dstAddr".to_string(), Value::from(value));
                }
                "srcport" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("srcPort".to_string(), Value::from(v));
                    }
                }
                "dstport" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("dstPort".to_string(), Value::from(v));
                    }
                }
                "protocol" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("protocol".to_string(), Value::from(v));
                    }
                }
                "packets" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("packets".to_string(), Value::from(v));
                    }
                }
                "bytes" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("bytes".to_string(), Value::from(v));
                    }
                }
                "start" => {
                    if let Ok(secs) = value.parse::<i64>() {
                        if let Some(t) = Utc.timestamp_opt(secs, 0).single() {
                            start_time = Some(t);
                            vpc_data.insert("start".to_string(), Value::String(t.to_rfc3339()));
                        }
                    }
                }
                "end" => {
                    if let Ok(secs) = value.parse::<i64>() {
                        if let Some(t) = Utc.timestamp_opt(secs, 0).single() {
                            end_time = Some(t);
                            vpc_data.insert("end".to_string(), Value::String(t.to_rfc3339()));
                        }
                    }
                }
                "action" => {
                    vpc_data.insert("action".to_string(), Value::from(value));
                }
                "log-status" => {
                    vpc_data.insert("logStatus".to_string(), Value::from(value));
                }
                "vpc-id" => {
                    vpc_data.insert("vpcId".to_string(), Value::from(value));
                }
                "subnet-id" => {
                    vpc_data.insert("subnetId".to_string(), Value::from(value));
                }
                "instance-id" => {
                    vpc_data.insert("instanceId".to_string(), Value::from(value));
                }
                "tcp-flags" => {
                    if let Some(v) = csv_int(value) {
                        vpc_data.insert("tcpFlags".to_string(), Value::from(v));
                    }
                }
                "type" => {
                    vpc_data.insert("type".to_string(), Value::from(value));
                }
                "pkt-srcaddr" => {
                    vpc_data.insert("pktSrcAddr".to_string(), Value::from(value));
                }
                "pkt-dstaddr" => {
                    vpc_data.insert("pktDstAddr".to_string(), Value::from(value));
                }
                _ => {}
            }
        }

        let start_time = start_time?;
        let event_time = end_time.unwrap_or(start_time);

        let stamp = compact_timestamp(event_time);
        let event_id = match &interface_id {
            Some(iface) => format!("vpcflow-{}-{}", iface, stamp),
            None => format!("vpcflow-{}", stamp),
        };

        let mut event = NormalizedEvent::at(event_time);
        event.event_version = "1.0".to_string();
        event.event_source = "vpcflowlogs.amazonaws.com".to_string();
        event.event_name = "VPCFlow".to_string();
        event.source_ip_address = src_addr.unwrap_or_default();
        event.request_id = event_id.clone();
        event.event_id = event_id;
        event.event_type = "AwsApiCall".to_string();
        event.request_parameters = Some(vpc_data);

        Some(event)
    }
}

impl Default for VpcFlowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for VpcFlowParser {
    fn log_type(&self) -> &'static str {
        "AWS.VPCFlow"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        if !looks_like_csv(line) {
            bail!("log is not CSV");
        }

        if self.column_map.is_none() {
            if !self.inspect_header(line) {
                bail!("invalid VPC Flow header");
            }
            // Header lines classify successfully but carry no events.
            return Ok(Vec::new());
        }

        // A late header re-binds the column map.
        let token_count = line
            .split(' ')
            .filter(|t| KNOWN_HEADERS.contains(&t.trim()))
            .count();
        if token_count >= HEADER_THRESHOLD && self.inspect_header(line) {
            return Ok(Vec::new());
        }

        let record = csvline::split_line(line, ' ');
        match self.populate_event(&record) {
            Some(event) => Ok(vec![event]),
            None => bail!("failed to populate event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "version account-id interface-id srcaddr dstaddr srcport dstport protocol packets bytes start end action log-status";
    const DATA: &str = "2 123456789012 eni-12345678 10.0.1.5 10.0.1.6 443 8080 6 10 1000 1234567890 1234567900 ACCEPT OK";

    #[test]
    fn test_header_then_data() {
        let mut parser = VpcFlowParser::new();

        let header_events = parser.parse(HEADER).unwrap();
        assert!(header_events.is_empty());

        let events = parser.parse(DATA).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_name, "VPCFlow");
        assert_eq!(event.source_ip_address, "10.0.1.5");
        // event-time comes from end=1234567900
        assert_eq!(event.event_time.timestamp(), 1234567900);
        assert!(event.event_id.starts_with("vpcflow-eni-12345678-"));

        let params = event.request_parameters.as_ref().unwrap();
        assert_eq!(params["dstPort"], 8080);
        assert_eq!(params["action"], "ACCEPT");
    }

    #[test]
    fn test_data_before_header_fails() {
        let mut parser = VpcFlowParser::new();
        assert!(parser.parse(DATA).is_err());
    }

    #[test]
    fn test_header_mid_stream_rebinds_columns() {
        let mut parser = VpcFlowParser::new();
        parser.parse(HEADER).unwrap();
        parser.parse(DATA).unwrap();

        // Shorter header: only srcaddr/dstaddr plus timing columns.
        let new_header = "version account-id interface-id dstaddr srcaddr srcport dstport protocol packets bytes start end action log-status";
        let events = parser.parse(new_header).unwrap();
        assert!(events.is_empty());

        let events = parser.parse(DATA).unwrap();
        // srcaddr/dstaddr swapped by the new header
        assert_eq!(events[0].source_ip_address, "10.0.1.6");
    }

    #[test]
    fn test_garbage_header_fails() {
        let mut parser = VpcFlowParser::new();
        assert!(parser.parse("this is not a flow log header").is_err());
    }
}
