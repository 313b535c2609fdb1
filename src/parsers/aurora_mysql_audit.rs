use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{compact_timestamp, csv_int, csv_string, csvline, opt_value, LogParser};
use crate::types::event::NormalizedEvent;

const MIN_COLUMNS: usize = 9;

/// Aurora MySQL audit logs: comma-delimited, microsecond unix timestamp in
/// column 0. The query text is unquoted and may itself contain commas, so
/// the object field spans columns 8..n-1 re-joined.
pub struct AuroraMySqlAuditParser;

impl AuroraMySqlAuditParser {
    pub fn new() -> Self {
        AuroraMySqlAuditParser
    }
}

impl Default for AuroraMySqlAuditParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for AuroraMySqlAuditParser {
    fn log_type(&self) -> &'static str {
        "AWS.AuroraMySQLAudit"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        let record = csvline::split_line(line, ',');
        if record.len() < MIN_COLUMNS {
            bail!(
                "invalid number of columns: got {}, expected at least {}",
                record.len(),
                MIN_COLUMNS
            );
        }

        let timestamp_micros: i64 = record[0].parse().context("parse timestamp")?;
        let time_stamp = Utc
            .timestamp_opt(
                timestamp_micros / 1_000_000,
                (timestamp_micros % 1_000_000) as u32 * 1000,
            )
            .single()
            .context("timestamp out of range")?;

        let object_string = record[8..record.len() - 1].join(",");
        let connection_id = csv_int(&record[4]);
        let operation = csv_string(&record[6]);
        let host = csv_string(&record[3]);

        let mut aurora_data = BTreeMap::new();
        aurora_data.insert(
            "timestamp".to_string(),
            Value::String(time_stamp.to_rfc3339()),
        );
        aurora_data.insert("serverHost".to_string(), opt_value(csv_string(&record[1])));
        aurora_data.insert("username".to_string(), opt_value(csv_string(&record[2])));
        aurora_data.insert("host".to_string(), opt_value(host.clone()));
        aurora_data.insert("connectionId".to_string(), opt_value(connection_id));
        aurora_data.insert("queryId".to_string(), opt_value(csv_int(&record[5])));
        aurora_data.insert("operation".to_string(), opt_value(operation.clone()));
        aurora_data.insert("database".to_string(), opt_value(csv_string(&record[7])));
        aurora_data.insert("object".to_string(), opt_value(csv_string(&object_string)));
        aurora_data.insert(
            "retCode".to_string(),
            opt_value(csv_int(&record[record.len() - 1])),
        );

        let stamp = compact_timestamp(time_stamp);
        let event_id = match connection_id {
            Some(conn) => format!("aurora-{}-{}", conn, stamp),
            None => format!("aurora-{}", stamp),
        };

        let event_name = match &operation {
            Some(op) => format!("AuroraMySQL-{}", op),
            None => "AuroraMySQLAudit".to_string(),
        };

        let mut event = NormalizedEvent::at(time_stamp);
        event.event_version = "1.0".to_string();
        event.event_source = "rds.amazonaws.com".to_string();
        event.event_name = event_name;
        event.source_ip_address = host.unwrap_or_default();
        event.request_id = event_id.clone();
        event.event_id = event_id;
        event.event_type = "AwsApiCall".to_string();
        event.request_parameters = Some(aurora_data);

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1546990809234657,db-host-1,admin,10.0.5.17,12345,67890,QUERY,mydb,'SELECT a, b FROM users WHERE id = 1',0";

    #[test]
    fn test_parses_audit_line_with_commas_in_query() {
        let mut parser = AuroraMySqlAuditParser::new();
        let events = parser.parse(SAMPLE).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_source, "rds.amazonaws.com");
        assert_eq!(event.event_name, "AuroraMySQL-QUERY");
        assert_eq!(event.source_ip_address, "10.0.5.17");
        assert!(event.event_id.starts_with("aurora-12345-"));

        let params = event.request_parameters.as_ref().unwrap();
        // columns 8..n-1 re-joined, commas inside the query preserved
        assert_eq!(params["object"], "'SELECT a, b FROM users WHERE id = 1'");
        assert_eq!(params["retCode"], 0);
        assert_eq!(params["connectionId"], 12345);
    }

    #[test]
    fn test_microsecond_timestamp_resolution() {
        let mut parser = AuroraMySqlAuditParser::new();
        let events = parser.parse(SAMPLE).unwrap();
        assert_eq!(events[0].event_time.timestamp(), 1546990809);
        assert_eq!(
            events[0].event_time.timestamp_subsec_micros(),
            234657
        );
    }

    #[test]
    fn test_rejects_non_numeric_timestamp() {
        let mut parser = AuroraMySqlAuditParser::new();
        assert!(parser
            .parse("notatime,db,admin,host,1,2,QUERY,mydb,x,0")
            .is_err());
    }

    #[test]
    fn test_rejects_short_record() {
        let mut parser = AuroraMySqlAuditParser::new();
        assert!(parser.parse("1546990809234657,db,admin").is_err());
    }
}
