//! CloudTrail object-key parsing.
//!
//! Keys in the delivery convention
//! `AWSLogs/[o-<org>/]<account>/CloudTrail/<region>/YYYY/MM/DD/<file>` carry
//! the account and region used for resumable-state tracking. A key outside
//! the convention is not an error: it parses as invalid and the caller
//! processes the object without state tracking.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CLOUDTRAIL_LOG_FILENAME: Regex =
        Regex::new(r"^(\d{12})_CloudTrail_([^_]+)_\d{8}T\d{4}Z_\w+\.json(\.gz)?$")
            .expect("cloudtrail filename regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeyInfo {
    pub account_id: String,
    pub region: String,
    pub is_valid: bool,
}

impl ObjectKeyInfo {
    fn invalid() -> Self {
        ObjectKeyInfo {
            account_id: String::new(),
            region: String::new(),
            is_valid: false,
        }
    }
}

pub fn parse_cloudtrail_key(key: &str) -> ObjectKeyInfo {
    let Some(stripped) = key.strip_prefix("AWSLogs/") else {
        return ObjectKeyInfo::invalid();
    };
    let parts: Vec<&str> = stripped.split('/').collect();

    if parts.len() < 4 {
        return ObjectKeyInfo::invalid();
    }

    let account_idx = if parts[0].starts_with("o-") {
        if parts.len() < 5 {
            return ObjectKeyInfo::invalid();
        }
        1
    } else {
        0
    };

    if account_idx + 3 >= parts.len() {
        return ObjectKeyInfo::invalid();
    }

    if parts[account_idx + 1] != "CloudTrail" {
        return ObjectKeyInfo::invalid();
    }

    let account_id = parts[account_idx];
    let region = parts[account_idx + 2];
    if account_id.is_empty() || region.is_empty() {
        return ObjectKeyInfo::invalid();
    }

    let filename = key.rsplit('/').next().unwrap_or_default();
    if !CLOUDTRAIL_LOG_FILENAME.is_match(filename) {
        return ObjectKeyInfo::invalid();
    }

    ObjectKeyInfo {
        account_id: account_id.to_owned(),
        region: region.to_owned(),
        is_valid: true,
    }
}
