use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{compact_timestamp, csv_int, csv_string, csvline, looks_like_csv, opt_value, LogParser};
use crate::types::event::NormalizedEvent;

const MIN_COLUMNS: usize = 25;

/// S3 server-access logs: space-delimited, quoted request/agent fields, the
/// timestamp bracketed across two columns (`[date` and `zone]`).
pub struct S3ServerAccessParser;

impl S3ServerAccessParser {
    pub fn new() -> Self {
        S3ServerAccessParser
    }
}

impl Default for S3ServerAccessParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for S3ServerAccessParser {
    fn log_type(&self) -> &'static str {
        "AWS.S3ServerAccess"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        if !looks_like_csv(line) {
            bail!("log is not CSV");
        }

        let record = csvline::split_line(line, ' ');
        if record.len() < MIN_COLUMNS {
            bail!(
                "wrong number of columns: got {}, expected at least {}",
                record.len(),
                MIN_COLUMNS
            );
        }

        let joined = format!("{}{}", record[2], record[3]);
        let parsed_time = DateTime::parse_from_str(&joined, "[%d/%b/%Y:%H:%M:%S%z]")
            .context("parse timestamp")?
            .with_timezone(&Utc);

        let additional_fields: Vec<String> = if record.len() > MIN_COLUMNS {
            record[MIN_COLUMNS..].to_vec()
        } else {
            Vec::new()
        };

        let request_id = csv_string(&record[6]);
        let operation = csv_string(&record[7]);
        let remote_ip = csv_string(&record[4]);
        let user_agent = csv_string(&record[17]);

        let mut s3_data = BTreeMap::new();
        s3_data.insert("bucketOwner".to_string(), opt_value(csv_string(&record[0])));
        s3_data.insert("bucket".to_string(), opt_value(csv_string(&record[1])));
        s3_data.insert("time".to_string(), Value::String(parsed_time.to_rfc3339()));
        s3_data.insert("remoteIP".to_string(), opt_value(remote_ip.clone()));
        s3_data.insert("requester".to_string(), opt_value(csv_string(&record[5])));
        s3_data.insert("requestID".to_string(), opt_value(request_id.clone()));
        s3_data.insert("operation".to_string(), opt_value(operation.clone()));
        s3_data.insert("key".to_string(), opt_value(csv_string(&record[8])));
        s3_data.insert("requestURI".to_string(), opt_value(csv_string(&record[9])));
        s3_data.insert("httpStatus".to_string(), opt_value(csv_int(&record[10])));
        s3_data.insert("errorCode".to_string(), opt_value(csv_string(&record[11])));
        s3_data.insert("bytesSent".to_string(), opt_value(csv_int(&record[12])));
        s3_data.insert("objectSize".to_string(), opt_value(csv_int(&record[13])));
        s3_data.insert("totalTime".to_string(), opt_value(csv_int(&record[14])));
        s3_data.insert("turnAroundTime".to_string(), opt_value(csv_int(&record[15])));
        s3_data.insert("referrer".to_string(), opt_value(csv_string(&record[16])));
        s3_data.insert("userAgent".to_string(), opt_value(user_agent.clone()));
        s3_data.insert("versionID".to_string(), opt_value(csv_string(&record[18])));
        s3_data.insert("hostID".to_string(), opt_value(csv_string(&record[19])));
        s3_data.insert(
            "signatureVersion".to_string(),
            opt_value(csv_string(&record[20])),
        );
        s3_data.insert("cipherSuite".to_string(), opt_value(csv_string(&record[21])));
        s3_data.insert(
            "authenticationType".to_string(),
            opt_value(csv_string(&record[22])),
        );
        s3_data.insert("hostHeader".to_string(), opt_value(csv_string(&record[23])));
        s3_data.insert("tlsVersion".to_string(), opt_value(csv_string(&record[24])));
        s3_data.insert(
            "additionalFields".to_string(),
            Value::from(additional_fields),
        );

        let stamp = compact_timestamp(parsed_time);
        let event_id = match &request_id {
            Some(id) => format!("s3-{}-{}", id, stamp),
            None => format!("s3-{}", stamp),
        };

        let mut event = NormalizedEvent::at(parsed_time);
        event.event_version = "1.0".to_string();
        event.event_source = "s3.amazonaws.com".to_string();
        event.event_name = operation.unwrap_or_else(|| "S3ServerAccess".to_string());
        event.source_ip_address = remote_ip.unwrap_or_default();
        event.user_agent = user_agent.unwrap_or_default();
        event.request_id = event_id.clone();
        event.event_id = event_id;
        event.event_type = "AwsApiCall".to_string();
        event.request_parameters = Some(s3_data);

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"79a59df900b949e55d96a1e698fbacedfd6e09d98eacf8f8d5218e7cd47ef2be mybucket [06/Feb/2019:00:00:38 +0000] 192.0.2.3 79a59df900b949e55d96a1e698fbacedfd6e09d98eacf8f8d5218e7cd47ef2be 3E57427F3EXAMPLE REST.GET.BUCKET - "GET /mybucket HTTP/1.1" 200 - 113 - 7 - "-" "S3Console/0.4" - - SigV2 ECDHE-RSA-AES128-GCM-SHA256 AuthHeader mybucket.s3.us-west-1.amazonaws.com TLSV1.1 -"#;

    #[test]
    fn test_parses_canonical_line() {
        let mut parser = S3ServerAccessParser::new();
        let events = parser.parse(SAMPLE).unwrap();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_source, "s3.amazonaws.com");
        assert_eq!(event.event_name, "REST.GET.BUCKET");
        assert_eq!(event.source_ip_address, "192.0.2.3");
        assert_eq!(event.user_agent, "S3Console/0.4");
        assert_eq!(event.event_id, "s3-3E57427F3EXAMPLE-20190206000038");

        let params = event.request_parameters.as_ref().unwrap();
        assert_eq!(params["bucket"], "mybucket");
        assert_eq!(params["httpStatus"], 200);
        assert_eq!(params["errorCode"], Value::Null);
    }

    #[test]
    fn test_rejects_short_record() {
        let mut parser = S3ServerAccessParser::new();
        assert!(parser.parse("a b c d e").is_err());
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let mut parser = S3ServerAccessParser::new();
        let line = SAMPLE.replace("[06/Feb/2019:00:00:38", "[notadate");
        assert!(parser.parse(&line).is_err());
    }

    #[test]
    fn test_rejects_json_line() {
        let mut parser = S3ServerAccessParser::new();
        assert!(parser.parse(r#"{"eventID":"x"}"#).is_err());
    }
}
