use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    compact_timestamp, csv_array, csv_float, csv_int, csv_string, csvline, looks_like_csv,
    opt_value, LogParser,
};
use crate::types::event::NormalizedEvent;

const MIN_COLUMNS: usize = 25;

/// ALB access logs: space-delimited, RFC3339Nano timestamp at column 1, the
/// HTTP request quoted as one `method url version` field at column 12.
pub struct AlbParser;

impl AlbParser {
    pub fn new() -> Self {
        AlbParser
    }
}

impl Default for AlbParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split the quoted request field into `[method, url, http-version]`.
/// URLs may themselves contain spaces, so everything between the first and
/// last segment is re-joined.
fn extract_request_params(request_info: &str) -> [String; 3] {
    let segments: Vec<&str> = request_info.split(' ').collect();
    let count = segments.len();

    let mut params = [String::new(), String::new(), String::new()];
    if count < 3 {
        return params;
    }

    params[0] = segments[0].to_owned();
    params[2] = segments[count - 1].to_owned();
    params[1] = segments[1..count - 1].join(" ");
    params
}

fn split_ip_port(field: &str) -> (String, String) {
    match field.rsplit_once(':') {
        Some((ip, port)) => (ip.to_owned(), port.to_owned()),
        None => (field.to_owned(), "-".to_owned()),
    }
}

impl LogParser for AlbParser {
    fn log_type(&self) -> &'static str {
        "AWS.ALB"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        if !looks_like_csv(line) {
            bail!("log is not CSV");
        }

        let record = csvline::split_line(line, ' ');
        if record.len() < MIN_COLUMNS {
            bail!(
                "invalid number of columns: got {}, expected at least {}",
                record.len(),
                MIN_COLUMNS
            );
        }

        let time_stamp: DateTime<Utc> = record[1]
            .parse::<DateTime<Utc>>()
            .context("parse timestamp")?;
        let request_creation_time = record[21]
            .parse::<DateTime<Utc>>()
            .unwrap_or(time_stamp);

        let (client_ip, client_port) = split_ip_port(&record[3]);
        let (target_ip, target_port) = split_ip_port(&record[4]);

        let request_params = extract_request_params(&record[12]);

        let mut alb_data = BTreeMap::new();
        alb_data.insert("type".to_string(), opt_value(csv_string(&record[0])));
        alb_data.insert(
            "timestamp".to_string(),
            Value::String(time_stamp.to_rfc3339()),
        );
        alb_data.insert("elb".to_string(), opt_value(csv_string(&record[2])));
        alb_data.insert("clientIP".to_string(), opt_value(csv_string(&client_ip)));
        alb_data.insert("clientPort".to_string(), opt_value(csv_int(&client_port)));
        alb_data.insert("targetIP".to_string(), opt_value(csv_string(&target_ip)));
        alb_data.insert("targetPort".to_string(), opt_value(csv_int(&target_port)));
        alb_data.insert(
            "requestProcessingTime".to_string(),
            opt_value(csv_float(&record[5])),
        );
        alb_data.insert(
            "targetProcessingTime".to_string(),
            opt_value(csv_float(&record[6])),
        );
        alb_data.insert(
            "responseProcessingTime".to_string(),
            opt_value(csv_float(&record[7])),
        );
        alb_data.insert("elbStatusCode".to_string(), opt_value(csv_int(&record[8])));
        alb_data.insert(
            "targetStatusCode".to_string(),
            opt_value(csv_int(&record[9])),
        );
        alb_data.insert("receivedBytes".to_string(), opt_value(csv_int(&record[10])));
        alb_data.insert("sentBytes".to_string(), opt_value(csv_int(&record[11])));
        alb_data.insert(
            "requestHttpMethod".to_string(),
            opt_value(csv_string(&request_params[0])),
        );
        alb_data.insert(
            "requestUrl".to_string(),
            opt_value(csv_string(&request_params[1])),
        );
        alb_data.insert(
            "requestHttpVersion".to_string(),
            opt_value(csv_string(&request_params[2])),
        );
        alb_data.insert("userAgent".to_string(), opt_value(csv_string(&record[13])));
        alb_data.insert("sslCipher".to_string(), opt_value(csv_string(&record[14])));
        alb_data.insert("sslProtocol".to_string(), opt_value(csv_string(&record[15])));
        alb_data.insert(
            "targetGroupArn".to_string(),
            opt_value(csv_string(&record[16])),
        );
        alb_data.insert("traceId".to_string(), opt_value(csv_string(&record[17])));
        alb_data.insert("domainName".to_string(), opt_value(csv_string(&record[18])));
        alb_data.insert(
            "chosenCertArn".to_string(),
            opt_value(csv_string(&record[19])),
        );
        alb_data.insert(
            "matchedRulePriority".to_string(),
            opt_value(csv_int(&record[20])),
        );
        alb_data.insert(
            "requestCreationTime".to_string(),
            Value::String(request_creation_time.to_rfc3339()),
        );
        alb_data.insert(
            "actionsExecuted".to_string(),
            opt_value(csv_array(&record[22])),
        );
        alb_data.insert("redirectUrl".to_string(), opt_value(csv_string(&record[23])));
        alb_data.insert("errorReason".to_string(), opt_value(csv_string(&record[24])));

        let stamp = compact_timestamp(time_stamp);
        let event_id = match csv_string(&record[2]) {
            Some(elb) => format!("alb-{}-{}", elb, stamp),
            None => format!("alb-{}", stamp),
        };

        let event_name = match csv_string(&request_params[0]) {
            Some(method) => format!("ALB-{}", method),
            None => "ALBAccess".to_string(),
        };

        let mut event = NormalizedEvent::at(time_stamp);
        event.event_version = "1.0".to_string();
        event.event_source = "elasticloadbalancing.amazonaws.com".to_string();
        event.event_name = event_name;
        event.source_ip_address = csv_string(&client_ip).unwrap_or_default();
        event.request_id = event_id.clone();
        event.event_id = event_id;
        event.event_type = "AwsApiCall".to_string();
        event.request_parameters = Some(alb_data);

        Ok(vec![event])
    }
}
