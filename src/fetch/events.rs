use serde::Serialize;

use crate::domain::digest::DigestEntry;
use crate::domain::email::NormalizedRecord;
use crate::fetch::cycle::CycleReport;

/// Wire form of a streamed cycle, one JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DigestEvent {
    Record {
        index: usize,
        #[serde(flatten)]
        entry: DigestEntry,
    },
    Complete {
        total: usize,
        unread: usize,
        decode_errors: Vec<String>,
        window: Option<String>,
    },
}

impl DigestEvent {
    pub fn record(index: usize, record: &NormalizedRecord) -> Self {
        DigestEvent::Record {
            index,
            entry: DigestEntry::from(record),
        }
    }

    pub fn complete(report: &CycleReport) -> Self {
        DigestEvent::Complete {
            total: report.digest.len(),
            unread: report.digest.unread_count(),
            decode_errors: report.decode_errors.iter().map(|e| e.to_string()).collect(),
            window: report.window.as_ref().map(|w| w.to_string()),
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::email::BodyFormat;
    use chrono::DateTime;

    #[test]
    fn record_event_is_flat_and_tagged() {
        let r = NormalizedRecord {
            server_id: "3".into(),
            subject: "DAIS".into(),
            sender: "dept@example.edu".into(),
            body: "hi".into(),
            body_format: BodyFormat::Plain,
            timestamp: DateTime::parse_from_rfc3339("2024-03-04T10:15:00+03:00").unwrap(),
            read: false,
        };
        let v: serde_json::Value =
            serde_json::from_str(&DigestEvent::record(0, &r).to_json_line().unwrap()).unwrap();
        assert_eq!(v["event"], "record");
        assert_eq!(v["index"], 0);
        assert_eq!(v["subject"], "DAIS");
        assert_eq!(v["date"], "04.03.2024");
        assert_eq!(v["time"], "10:15");
        assert_eq!(v["body_format"], "plain");
    }

    #[test]
    fn complete_event_for_empty_report() {
        let v: serde_json::Value = serde_json::from_str(
            &DigestEvent::complete(&CycleReport::default())
                .to_json_line()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(v["event"], "complete");
        assert_eq!(v["total"], 0);
        assert!(v["window"].is_null());
    }
}
