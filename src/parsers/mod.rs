//! Format parsers. Each parser turns one raw log line (or one pre-split
//! record) into zero or more [`NormalizedEvent`]s, or fails so the adaptive
//! classifier can try the next candidate.

pub mod alb;
pub mod aurora_mysql_audit;
pub mod cloudtrail;
pub mod csvline;
pub mod gsuite;
pub mod okta;
pub mod onepassword;
pub mod s3_server_access;
pub mod vpc_flow;

pub use alb::AlbParser;
pub use aurora_mysql_audit::AuroraMySqlAuditParser;
pub use cloudtrail::CloudTrailParser;
pub use gsuite::GSuiteParser;
pub use okta::OktaParser;
pub use onepassword::OnePasswordParser;
pub use s3_server_access::S3ServerAccessParser;
pub use vpc_flow::VpcFlowParser;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::event::NormalizedEvent;

/// Contract every format parser implements. `parse` takes `&mut self`
/// because some formats are stateful within a stream (VPC flow binds a
/// column map from its header line).
pub trait LogParser: Send {
    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>>;
    fn log_type(&self) -> &'static str;
}

/// The built-in parser set, one instance per classifier. Keyed by the
/// canonical log-type label.
pub fn default_parsers() -> Vec<(&'static str, Box<dyn LogParser>)> {
    vec![
        ("AWS.CloudTrail", Box::new(CloudTrailParser::new()) as Box<dyn LogParser>),
        ("AWS.S3ServerAccess", Box::new(S3ServerAccessParser::new())),
        ("AWS.VPCFlow", Box::new(VpcFlowParser::new())),
        ("AWS.ALB", Box::new(AlbParser::new())),
        ("AWS.AuroraMySQLAudit", Box::new(AuroraMySqlAuditParser::new())),
        ("Okta.SystemLog", Box::new(OktaParser::new())),
        ("GSuite.Reports", Box::new(GSuiteParser::new())),
        ("OnePassword.SignInAttempt", Box::new(OnePasswordParser::new())),
    ]
}

/// `""` and `"-"` are the CSV formats' null markers.
pub(crate) fn csv_string(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        None
    } else {
        Some(s.to_owned())
    }
}

pub(crate) fn csv_int(s: &str) -> Option<i64> {
    csv_string(s)?.parse::<i64>().ok()
}

pub(crate) fn csv_float(s: &str) -> Option<f64> {
    csv_string(s)?.parse::<f64>().ok()
}

pub(crate) fn csv_array(s: &str) -> Option<Vec<String>> {
    Some(
        csv_string(s)?
            .split(',')
            .map(|p| p.to_owned())
            .collect(),
    )
}

pub(crate) fn opt_value<T: Into<Value>>(v: Option<T>) -> Value {
    v.map(Into::into).unwrap_or(Value::Null)
}

/// Quick structural check so JSON parsers are not fed CSV and vice versa.
pub(crate) fn looks_like_csv(line: &str) -> bool {
    line.contains(' ') || line.contains(',') || line.contains('\t')
}

/// `YYYYMMDDHHMMSS`, used when fabricating event ids for formats that
/// carry no native record identity.
pub(crate) fn compact_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_string_null_markers() {
        assert_eq!(csv_string("-"), None);
        assert_eq!(csv_string(""), None);
        assert_eq!(csv_string("  "), None);
        assert_eq!(csv_string("value"), Some("value".to_string()));
        assert_eq!(csv_string(" padded "), Some("padded".to_string()));
    }

    #[test]
    fn test_csv_int_rejects_garbage() {
        assert_eq!(csv_int("200"), Some(200));
        assert_eq!(csv_int("-"), None);
        assert_eq!(csv_int("abc"), None);
    }

    #[test]
    fn test_csv_array_splits_on_commas() {
        assert_eq!(
            csv_array("forward,redirect"),
            Some(vec!["forward".to_string(), "redirect".to_string()])
        );
        assert_eq!(csv_array("-"), None);
    }

    #[test]
    fn test_default_parsers_registers_all_eight() {
        let parsers = default_parsers();
        assert_eq!(parsers.len(), 8);
        let labels: Vec<&str> = parsers.iter().map(|(label, _)| *label).collect();
        assert!(labels.contains(&"AWS.CloudTrail"));
        assert!(labels.contains(&"OnePassword.SignInAttempt"));
        for (label, parser) in &parsers {
            assert_eq!(*label, parser.log_type());
        }
    }
}
