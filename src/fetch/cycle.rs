use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;

use crate::domain::digest::Digest;
use crate::domain::email::{MailboxCredential, NormalizedRecord, RawMessage, ServerId};
use crate::error::{CycleError, DecodeError};
use crate::mail::normalize::normalize;
use crate::mail::search::{FallbackPolicy, SearchWindow, candidate_windows, find_first_match};
use crate::mail::session::{MailboxConnector, MailboxSession};
use crate::store::repo::DedupLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Connecting,
    Authenticating,
    Searching,
    Fetching,
    Normalizing,
    MarkingSeen,
    Sorting,
    Emitting,
    Done,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Done | CycleState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub reference_date: NaiveDate,
    pub keywords: Vec<String>,
    pub fallback: FallbackPolicy,
    /// Drop records whose id the ledger already held before this cycle.
    /// Off by default: re-running a cycle shows the same digest again.
    pub skip_already_fetched: bool,
    /// Pause between streamed records. Never changes their order.
    pub stream_delay: Option<Duration>,
    /// Checked between states; a set flag abandons the cycle.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl FetchOptions {
    pub fn new(reference_date: NaiveDate, keywords: Vec<String>) -> Self {
        Self {
            reference_date,
            keywords,
            fallback: FallbackPolicy::default(),
            skip_already_fetched: false,
            stream_delay: None,
            cancel: None,
        }
    }
}

/// Outcome of a successful cycle. An empty digest means no message matched
/// in any window; failures are a [`CycleError`] instead.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub digest: Digest,
    /// The window that produced matches.
    pub window: Option<SearchWindow>,
    pub decode_errors: Vec<DecodeError>,
    /// Ids the ledger first saw during this cycle.
    pub newly_recorded: Vec<ServerId>,
    pub marked_seen: usize,
}

impl CycleReport {
    pub fn found_nothing(&self) -> bool {
        self.window.is_none()
    }
}

/// Batch mode: the whole ordered digest as one value.
///
/// Every fetched message is marked `\Seen` on the server before this returns.
/// There is no rollback if the cycle is abandoned afterwards, so a message
/// can be delivered as unread at most once but may be marked without being
/// delivered.
pub fn run_fetch_cycle(
    connector: &dyn MailboxConnector,
    credential: &MailboxCredential,
    options: &FetchOptions,
    ledger: &mut dyn DedupLedger,
) -> Result<CycleReport, CycleError> {
    let mut cycle = Cycle::new(connector, ledger, options);
    let report = cycle.prepare(credential)?;
    cycle.advance(CycleState::Emitting)?;
    cycle.advance(CycleState::Done)?;
    Ok(report)
}

/// Streaming mode: `on_record` once per record in the same order batch mode
/// returns them, then `on_complete` exactly once. Neither callback runs if
/// the cycle fails before emitting.
pub fn run_fetch_cycle_streaming(
    connector: &dyn MailboxConnector,
    credential: &MailboxCredential,
    options: &FetchOptions,
    ledger: &mut dyn DedupLedger,
    mut on_record: impl FnMut(&NormalizedRecord),
    on_complete: impl FnOnce(&CycleReport),
) -> Result<CycleReport, CycleError> {
    let mut cycle = Cycle::new(connector, ledger, options);
    let report = cycle.prepare(credential)?;
    cycle.advance(CycleState::Emitting)?;

    for (i, record) in report.digest.records().iter().enumerate() {
        if i > 0
            && let Some(delay) = options.stream_delay
        {
            thread::sleep(delay);
        }
        on_record(record);
    }
    on_complete(&report);

    cycle.advance(CycleState::Done)?;
    Ok(report)
}

struct Cycle<'a> {
    state: CycleState,
    connector: &'a dyn MailboxConnector,
    ledger: &'a mut dyn DedupLedger,
    options: &'a FetchOptions,
}

impl<'a> Cycle<'a> {
    fn new(
        connector: &'a dyn MailboxConnector,
        ledger: &'a mut dyn DedupLedger,
        options: &'a FetchOptions,
    ) -> Self {
        Self {
            state: CycleState::Idle,
            connector,
            ledger,
            options,
        }
    }

    fn advance(&mut self, next: CycleState) -> Result<(), CycleError> {
        let cancelled = self
            .options
            .cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::SeqCst));
        if cancelled && !next.is_terminal() {
            log::info!("cycle abandoned in {:?}", self.state);
            self.state = CycleState::Failed;
            return Err(CycleError::Cancelled);
        }
        log::debug!("cycle {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: CycleError) -> CycleError {
        log::warn!("cycle failed in {:?}: {}", self.state, err);
        self.state = CycleState::Failed;
        err
    }

    /// Everything up to and including Sorting.
    fn prepare(&mut self, credential: &MailboxCredential) -> Result<CycleReport, CycleError> {
        self.advance(CycleState::Connecting)?;
        let unauthenticated = self.connector.connect().map_err(|e| self.fail(e))?;

        self.advance(CycleState::Authenticating)?;
        let mut session = unauthenticated
            .login(credential)
            .map_err(|e| self.fail(e))?;
        log::info!("Logged in as {}", credential.username);

        let result = self.run_session(session.as_mut());
        if let Err(e) = session.logout() {
            log::warn!("logout failed: {e}");
        }
        let (window, records, mut report) = result.map_err(|e| self.fail(e))?;

        self.advance(CycleState::Sorting)?;
        report.digest = Digest::from_records(records);
        report.window = window;
        log::info!(
            "digest ready: {} record(s), {} unread, {} decode error(s)",
            report.digest.len(),
            report.digest.unread_count(),
            report.decode_errors.len()
        );
        Ok(report)
    }

    fn run_session(
        &mut self,
        session: &mut dyn MailboxSession,
    ) -> Result<(Option<SearchWindow>, Vec<NormalizedRecord>, CycleReport), CycleError> {
        let mut report = CycleReport::default();

        self.advance(CycleState::Searching)?;
        let windows = candidate_windows(
            self.options.reference_date,
            &self.options.keywords,
            self.options.fallback,
        );
        // a date-only SEARCH matches the whole window and would mark it all seen
        if windows.first().is_none_or(|w| w.keywords().is_empty()) {
            log::warn!("no subject keywords configured, nothing to search for");
            return Ok((None, Vec::new(), report));
        }
        let Some((window, ids)) =
            find_first_match(windows, |w| session.search(&w.to_imap_query()))?
        else {
            log::info!("No matching emails found in any window");
            return Ok((None, Vec::new(), report));
        };

        self.advance(CycleState::Fetching)?;
        let mut raws: Vec<RawMessage> = Vec::with_capacity(ids.len());
        for id in &ids {
            match session.fetch(id)? {
                Some(raw) => raws.push(raw),
                None => report
                    .decode_errors
                    .push(DecodeError::MissingPayload { id: id.clone() }),
            }
        }

        self.advance(CycleState::Normalizing)?;
        let records = self.normalize_all(&raws, &mut report);

        self.advance(CycleState::MarkingSeen)?;
        let fetched: Vec<ServerId> = raws.iter().map(|r| r.id.clone()).collect();
        session.mark_seen(&fetched)?;
        report.marked_seen = fetched.len();

        Ok((Some(window), records, report))
    }

    fn normalize_all(
        &mut self,
        raws: &[RawMessage],
        report: &mut CycleReport,
    ) -> Vec<NormalizedRecord> {
        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let record = match normalize(raw) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping message: {e}");
                    report.decode_errors.push(e);
                    continue;
                }
            };

            let known = self.ledger.contains(&record.server_id);
            if self.ledger.record(&record.server_id) {
                report.newly_recorded.push(record.server_id.clone());
            }
            if known && self.options.skip_already_fetched {
                log::debug!("UID {} already fetched, left out", record.server_id);
                continue;
            }
            records.push(record);
        }
        records
    }
}
