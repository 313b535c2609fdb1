//! Rule evaluation runs in a child process, one invocation per batch. The
//! detection rule language is the hostile input here, so it stays out of
//! this address space entirely: we hand the engine a JSON request on stdin
//! and read matches back from stdout. A non-zero exit is a batch-level
//! failure the caller treats as transient.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::types::event::NormalizedEvent;

pub struct RuleEngine {
    interpreter: String,
    engine_path: String,
    rules_dir: String,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    rules_dir: &'a str,
    events: &'a [NormalizedEvent],
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Match {
    pub rule_id: String,
    pub title: String,
    pub severity: String,
    #[serde(default)]
    pub dedup: String,
    pub event: Option<NormalizedEvent>,
}

impl RuleEngine {
    pub fn new(interpreter: &str, engine_path: &str, rules_dir: &str) -> Self {
        RuleEngine {
            interpreter: interpreter.to_owned(),
            engine_path: engine_path.to_owned(),
            rules_dir: rules_dir.to_owned(),
        }
    }

    pub async fn analyze(
        &self,
        events: &[NormalizedEvent],
        token: &CancellationToken,
    ) -> Result<Vec<Match>> {
        let request = Request {
            rules_dir: &self.rules_dir,
            events,
        };
        let request_json = serde_json::to_vec(&request).context("marshal engine request")?;

        let mut child = tokio::process::Command::new(&self.interpreter)
            .arg(&self.engine_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn rule engine")?;

        let mut stdin = child.stdin.take().context("rule engine stdin")?;
        stdin
            .write_all(&request_json)
            .await
            .context("write engine request")?;
        drop(stdin);

        let output = tokio::select! {
            output = child.wait_with_output() => output.context("run rule engine")?,
            _ = token.cancelled() => bail!("rule engine cancelled"),
        };

        if !output.status.success() {
            bail!(
                "rule engine exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let response: Response =
            serde_json::from_slice(&output.stdout).context("unmarshal engine response")?;
        Ok(response.matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn sample_event() -> NormalizedEvent {
        let mut event =
            NormalizedEvent::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        event.event_id = "E-1".to_string();
        event.event_source = "iam.amazonaws.com".to_string();
        event
    }

    #[tokio::test]
    async fn test_engine_round_trip_through_subprocess() {
        // stand-in engine: drain stdin, emit one canned match
        let script = r#"cat > /dev/null; echo '{"matches":[{"rule_id":"R1","title":"root used","severity":"HIGH","dedup":"d","event":null}]}'"#;
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("engine.sh");
        std::fs::write(&script_path, script).unwrap();

        let engine = RuleEngine::new("sh", &script_path.to_string_lossy(), "rules/");
        let token = CancellationToken::new();
        let matches = engine.analyze(&[sample_event()], &token).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id, "R1");
        assert_eq!(matches[0].severity, "HIGH");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_batch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("engine.sh");
        std::fs::write(&script_path, "cat > /dev/null; exit 3").unwrap();

        let engine = RuleEngine::new(
            "sh",
            &script_path.to_string_lossy(),
            "rules/",
        );
        let token = CancellationToken::new();
        let result = engine.analyze(&[sample_event()], &token).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_garbage_stdout_is_batch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("engine.sh");
        std::fs::write(&script_path, "cat > /dev/null; echo not-json").unwrap();

        let engine = RuleEngine::new(
            "sh",
            &script_path.to_string_lossy(),
            "rules/",
        );
        let token = CancellationToken::new();
        assert!(engine.analyze(&[sample_event()], &token).await.is_err());
    }
}
