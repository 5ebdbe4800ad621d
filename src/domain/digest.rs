use serde::Serialize;

use crate::domain::email::{BodyFormat, NormalizedRecord};

/// Records for one cycle: unread first, then read, each newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Digest {
    records: Vec<NormalizedRecord>,
}

impl Digest {
    pub fn from_records(records: Vec<NormalizedRecord>) -> Self {
        let (mut unread, mut read): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| !r.read);

        // stable: equal timestamps keep fetch order
        unread.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        read.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        unread.append(&mut read);
        Self { records: unread }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    pub fn entries(&self) -> Vec<DigestEntry> {
        self.records.iter().map(DigestEntry::from).collect()
    }
}

/// Flat view handed to renderers and transports.
#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub body_format: BodyFormat,
    pub date: String,
    pub time: String,
    pub read: bool,
}

impl From<&NormalizedRecord> for DigestEntry {
    fn from(r: &NormalizedRecord) -> Self {
        Self {
            subject: r.subject.clone(),
            sender: r.sender.clone(),
            body: r.body.clone(),
            body_format: r.body_format,
            date: r.timestamp.format("%d.%m.%Y").to_string(),
            time: r.timestamp.format("%H:%M").to_string(),
            read: r.read,
        }
    }
}
