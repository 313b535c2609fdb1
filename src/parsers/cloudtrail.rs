use anyhow::{bail, Context, Result};

use super::LogParser;
use crate::types::event::NormalizedEvent;

/// CloudTrail records already carry the normalized shape; parsing is a
/// straight JSON decode plus the identity check.
pub struct CloudTrailParser;

impl CloudTrailParser {
    pub fn new() -> Self {
        CloudTrailParser
    }
}

impl Default for CloudTrailParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser for CloudTrailParser {
    fn log_type(&self) -> &'static str {
        "AWS.CloudTrail"
    }

    fn parse(&mut self, line: &str) -> Result<Vec<NormalizedEvent>> {
        let event: NormalizedEvent =
            serde_json::from_str(line).context("failed to parse CloudTrail event")?;

        if event.event_id.is_empty() {
            bail!("missing eventID");
        }

        Ok(vec![event])
    }
}
