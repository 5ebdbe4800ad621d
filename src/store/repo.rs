use std::collections::HashSet;

/// Ids observed in earlier cycles. Entries are never removed.
pub trait DedupLedger: Send {
    fn contains(&self, id: &str) -> bool;

    /// Adds `id`; recording a known id is a no-op. Returns whether it was new.
    fn record(&mut self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local ledger, for tests and callers that do not persist.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    ids: HashSet<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupLedger for MemoryLedger {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn record(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
