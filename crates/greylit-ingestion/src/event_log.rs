//! Append-only JSONL audit log of a search run.
//!
//! Separate from diagnostic `tracing` output: every line is one [`Event`]
//! stamped with a UTC second-resolution timestamp, e.g.
//! `{"ts":"2024-05-01T12:00:00Z","event":"start","source":"openalex",...}`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use greylit_common::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Start {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        seed_sites: Vec<String>,
    },
    NoMoreResults {
        source: String,
        query_id: String,
    },
    EarlyStopIrrelevantStreak {
        source: String,
        query_id: String,
        irrelevant_streak: usize,
        n_collected: usize,
    },
    /// A pairing aborted on an adapter error.
    SourceFailed {
        source: String,
        query_id: String,
        error: String,
    },
    CrawlPageFailed {
        url: String,
        error: String,
    },
    Complete {
        raw_n: usize,
        filtered_n: usize,
        deduped_n: usize,
        output_ris: String,
    },
}

/// One persisted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The file and its directory are created on first use.
    pub fn append(&self, event: Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&LoggedEvent { ts: now_iso(), event })?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<LoggedEvent>> {
        let text = fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_timestamp_format() {
        let ts = now_iso();
        assert_eq!(ts.len(), "2024-05-01T12:00:00Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_early_stop_line_shape() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("logs").join("search_log.jsonl"));
        log.append(Event::EarlyStopIrrelevantStreak {
            source: "openalex".into(),
            query_id: "A".into(),
            irrelevant_streak: 150,
            n_collected: 350,
        })
        .unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let value: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["event"], json!("early_stop_irrelevant_streak"));
        assert_eq!(value["irrelevant_streak"], json!(150));
        assert_eq!(value["n_collected"], json!(350));
        assert!(value["ts"].is_string());
    }

    #[test]
    fn test_append_keeps_earlier_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("search_log.jsonl"));
        log.append(Event::Start {
            source: "seed_sites".into(),
            query_id: None,
            query: None,
            seed_sites: vec!["https://example.org".into()],
        })
        .unwrap();
        log.append(Event::Complete {
            raw_n: 3,
            filtered_n: 2,
            deduped_n: 1,
            output_ris: "out.ris".into(),
        })
        .unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, Event::Start { .. }));
        assert_eq!(
            events[1].event,
            Event::Complete { raw_n: 3, filtered_n: 2, deduped_n: 1, output_ris: "out.ris".into() }
        );
    }
}
