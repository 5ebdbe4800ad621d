use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::NaiveDate;

use mail_digest::domain::email::{MailboxCredential, RawMessage, ServerId};
use mail_digest::error::{CycleError, DecodeError};
use mail_digest::fetch::{FetchOptions, run_fetch_cycle, run_fetch_cycle_streaming};
use mail_digest::mail::search::FallbackPolicy;
use mail_digest::mail::session::{MailboxConnector, MailboxSession, UnauthenticatedMailbox};
use mail_digest::store::ledger_file::FileLedger;
use mail_digest::store::repo::{DedupLedger, MemoryLedger};

// ── Fake mailbox ────────────────────────────────────────────────────

struct FakeMessage {
    uid: u32,
    internal_date: NaiveDate,
    subject: String,
    seen: bool,
    payload: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    messages: Vec<FakeMessage>,
    reject_login: bool,
    refuse_connect: bool,
    refuse_search: bool,
    searches: Vec<String>,
    fetched: Vec<String>,
    marked: Vec<String>,
    logged_out: bool,
}

#[derive(Clone, Default)]
struct FakeServer(Rc<RefCell<ServerState>>);

impl FakeServer {
    fn with_messages(messages: Vec<FakeMessage>) -> Self {
        let s = Self::default();
        s.0.borrow_mut().messages = messages;
        s
    }

    fn is_seen(&self, uid: u32) -> bool {
        self.0
            .borrow()
            .messages
            .iter()
            .any(|m| m.uid == uid && m.seen)
    }
}

impl MailboxConnector for FakeServer {
    fn connect(&self) -> Result<Box<dyn UnauthenticatedMailbox>, CycleError> {
        if self.0.borrow().refuse_connect {
            return Err(CycleError::Connection {
                server: self.describe(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "fake:993".into()
    }
}

impl UnauthenticatedMailbox for FakeServer {
    fn login(
        self: Box<Self>,
        credential: &MailboxCredential,
    ) -> Result<Box<dyn MailboxSession>, CycleError> {
        if self.0.borrow().reject_login {
            return Err(CycleError::Authentication {
                username: credential.username.clone(),
                reason: "[AUTHENTICATIONFAILED] Invalid credentials".into(),
            });
        }
        Ok(self)
    }
}

impl MailboxSession for FakeServer {
    fn search(&mut self, query: &str) -> Result<Vec<ServerId>, CycleError> {
        let mut st = self.0.borrow_mut();
        st.searches.push(query.to_string());
        if st.refuse_search {
            return Err(CycleError::Protocol {
                command: "UID SEARCH".into(),
                reason: "BAD [CLIENTBUG] Invalid search".into(),
            });
        }
        let (since, before) = window_of(query);
        let keywords = keywords_of(query);
        Ok(st
            .messages
            .iter()
            .filter(|m| m.internal_date >= since && m.internal_date < before)
            .filter(|m| keywords.iter().any(|k| m.subject.contains(k.as_str())))
            .map(|m| m.uid.to_string())
            .collect())
    }

    fn fetch(&mut self, id: &ServerId) -> Result<Option<RawMessage>, CycleError> {
        let mut st = self.0.borrow_mut();
        st.fetched.push(id.clone());
        Ok(st
            .messages
            .iter()
            .find(|m| m.uid.to_string() == *id)
            .map(|m| RawMessage {
                id: id.clone(),
                seen: m.seen,
                payload: m.payload.clone(),
            }))
    }

    fn mark_seen(&mut self, ids: &[ServerId]) -> Result<(), CycleError> {
        let mut st = self.0.borrow_mut();
        for m in st.messages.iter_mut() {
            if ids.contains(&m.uid.to_string()) {
                m.seen = true;
            }
        }
        st.marked.extend(ids.iter().cloned());
        Ok(())
    }

    fn logout(&mut self) -> Result<(), CycleError> {
        self.0.borrow_mut().logged_out = true;
        Ok(())
    }
}

fn window_of(query: &str) -> (NaiveDate, NaiveDate) {
    let date_after = |key: &str| {
        let idx = query.find(key).unwrap() + key.len();
        let token = query[idx..].split_whitespace().next().unwrap();
        NaiveDate::parse_from_str(token, "%d-%b-%Y").unwrap()
    };
    (date_after("SINCE "), date_after("BEFORE "))
}

fn keywords_of(query: &str) -> Vec<String> {
    query
        .split("SUBJECT \"")
        .skip(1)
        .map(|rest| rest.split('"').next().unwrap().to_string())
        .collect()
}

// ── Fixtures ────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn msg(uid: u32, date: NaiveDate, hour: u32, subject: &str, seen: bool) -> FakeMessage {
    let date_header = date.format("%a, %d %b %Y").to_string();
    let payload = format!(
        "Subject: {subject}\r\nFrom: Registrar <registrar@example.edu>\r\nDate: {date_header} {hour:02}:00:00 +0300\r\n\r\nBody of {uid}\r\n"
    );
    FakeMessage {
        uid,
        internal_date: date,
        subject: subject.to_string(),
        seen,
        payload: payload.into_bytes(),
    }
}

fn options(reference: NaiveDate) -> FetchOptions {
    let mut o = FetchOptions::new(reference, vec!["DAIS".into(), "AIRS".into()]);
    o.fallback = FallbackPolicy::Lookback { max_weeks: 4 };
    o
}

fn cred() -> MailboxCredential {
    MailboxCredential::new("student@ug.example.edu", "hunter2")
}

fn ids(report: &mail_digest::CycleReport) -> Vec<String> {
    report
        .digest
        .records()
        .iter()
        .map(|r| r.server_id.clone())
        .collect()
}

/// Its week starts Monday 2024-03-04.
fn wednesday() -> NaiveDate {
    d(2024, 3, 6)
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn lookback_finds_matches_four_weeks_back() {
    let server = FakeServer::with_messages(vec![
        msg(1, d(2024, 2, 6), 9, "DAIS kickoff", false),
        msg(2, d(2024, 2, 8), 9, "AIRS reading group", false),
        msg(3, d(2024, 3, 5), 9, "Cafeteria menu", false),
    ]);
    let mut ledger = MemoryLedger::new();

    let report = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();

    assert_eq!(ids(&report), vec!["2", "1"]);
    assert!(report.decode_errors.is_empty());
    let window = report.window.as_ref().unwrap();
    assert_eq!(window.start(), d(2024, 2, 5));
    assert_eq!(window.end(), d(2024, 2, 12));
    assert_eq!(server.0.borrow().searches.len(), 5);
}

#[test]
fn malformed_date_is_skipped_with_attached_error() {
    let mut bad = msg(11, d(2024, 3, 5), 10, "DAIS notice", false);
    bad.payload = b"Subject: DAIS notice\r\nDate: not a real date\r\n\r\nx\r\n".to_vec();
    let server = FakeServer::with_messages(vec![
        msg(10, d(2024, 3, 4), 10, "DAIS one", false),
        bad,
        msg(12, d(2024, 3, 6), 10, "AIRS two", true),
    ]);
    let mut ledger = MemoryLedger::new();

    let report = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();

    assert_eq!(ids(&report), vec!["10", "12"]);
    assert_eq!(report.decode_errors.len(), 1);
    assert!(matches!(
        &report.decode_errors[0],
        DecodeError::InvalidDate { id, .. } if id == "11"
    ));
    // fetched messages are all marked, including the undecodable one
    assert_eq!(report.marked_seen, 3);
    assert!(!ledger.contains("11"));
}

#[test]
fn no_matches_anywhere_is_empty_digest_not_error() {
    let server = FakeServer::with_messages(vec![msg(1, d(2023, 1, 2), 9, "DAIS", false)]);
    let mut ledger = MemoryLedger::new();

    let report = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();

    assert!(report.digest.is_empty());
    assert!(report.found_nothing());
    assert!(report.decode_errors.is_empty());
    assert!(ledger.is_empty());
    let st = server.0.borrow();
    assert!(st.fetched.is_empty());
    assert!(st.marked.is_empty());
    assert!(st.logged_out);
}

#[test]
fn rejected_login_leaves_ledger_untouched() {
    let server = FakeServer::with_messages(vec![msg(1, d(2024, 3, 5), 9, "DAIS", false)]);
    server.0.borrow_mut().reject_login = true;
    let mut ledger = MemoryLedger::new();

    let err = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap_err();

    assert!(err.is_authentication());
    assert!(ledger.is_empty());
    assert!(server.0.borrow().searches.is_empty());
    assert!(!server.is_seen(1));
}

#[test]
fn connection_failure_is_distinct_from_auth() {
    let server = FakeServer::default();
    server.0.borrow_mut().refuse_connect = true;
    let mut ledger = MemoryLedger::new();

    let err = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap_err();

    assert!(matches!(err, CycleError::Connection { .. }));
    assert!(!err.is_authentication());
}

#[test]
fn read_state_is_captured_before_marking_seen() {
    let server = FakeServer::with_messages(vec![
        msg(1, d(2024, 3, 4), 8, "DAIS", false),
        msg(2, d(2024, 3, 5), 8, "AIRS", true),
        msg(3, d(2024, 3, 6), 8, "DAIS", false),
    ]);
    let mut ledger = MemoryLedger::new();

    let first = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();
    // unread newest first, then read
    assert_eq!(ids(&first), vec!["3", "1", "2"]);
    assert_eq!(first.digest.unread_count(), 2);
    assert_eq!(first.newly_recorded.len(), 3);
    assert!(server.is_seen(1) && server.is_seen(3));

    // the ledger is advisory: a second run shows the same records, now read
    let second = run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();
    assert_eq!(ids(&second), vec!["3", "2", "1"]);
    assert_eq!(second.digest.unread_count(), 0);
    assert!(second.newly_recorded.is_empty());
}

#[test]
fn opt_in_filter_drops_already_fetched_ids() {
    let server = FakeServer::with_messages(vec![msg(1, d(2024, 3, 4), 8, "DAIS", false)]);
    let mut ledger = MemoryLedger::new();
    let mut opts = options(wednesday());
    opts.skip_already_fetched = true;

    let first = run_fetch_cycle(&server, &cred(), &opts, &mut ledger).unwrap();
    assert_eq!(first.digest.len(), 1);

    server
        .0
        .borrow_mut()
        .messages
        .push(msg(2, d(2024, 3, 5), 8, "AIRS", false));
    let second = run_fetch_cycle(&server, &cred(), &opts, &mut ledger).unwrap();
    assert_eq!(ids(&second), vec!["2"]);
    assert!(!second.found_nothing());
}

#[test]
fn streaming_replays_batch_order_then_completes_once() {
    let messages = || {
        vec![
            msg(1, d(2024, 3, 4), 8, "DAIS", true),
            msg(2, d(2024, 3, 5), 8, "AIRS", false),
            msg(3, d(2024, 3, 6), 8, "DAIS", true),
            msg(4, d(2024, 3, 7), 8, "AIRS", false),
        ]
    };

    let batch_server = FakeServer::with_messages(messages());
    let batch =
        run_fetch_cycle(&batch_server, &cred(), &options(wednesday()), &mut MemoryLedger::new())
            .unwrap();

    let stream_server = FakeServer::with_messages(messages());
    let mut streamed = Vec::new();
    let mut completions = 0;
    let mut opts = options(wednesday());
    opts.stream_delay = Some(std::time::Duration::from_millis(1));
    let report = run_fetch_cycle_streaming(
        &stream_server,
        &cred(),
        &opts,
        &mut MemoryLedger::new(),
        |r| streamed.push(r.server_id.clone()),
        |rep| {
            completions += 1;
            assert_eq!(rep.digest.len(), 4);
        },
    )
    .unwrap();

    assert_eq!(streamed, ids(&batch));
    assert_eq!(streamed, vec!["4", "2", "3", "1"]);
    assert_eq!(completions, 1);
    assert_eq!(ids(&report), streamed);
}

#[test]
fn streaming_failure_emits_nothing() {
    let server = FakeServer::default();
    server.0.borrow_mut().reject_login = true;
    let called = std::cell::Cell::new(false);

    let res = run_fetch_cycle_streaming(
        &server,
        &cred(),
        &options(wednesday()),
        &mut MemoryLedger::new(),
        |_| called.set(true),
        |_| called.set(true),
    );

    assert!(res.is_err());
    assert!(!called.get());
}

#[test]
fn month_fallback_widens_once() {
    let server = FakeServer::with_messages(vec![
        msg(1, d(2024, 3, 1), 8, "AIRS", false),
        msg(2, d(2024, 2, 28), 8, "AIRS", false),
    ]);
    let mut opts = options(wednesday());
    opts.fallback = FallbackPolicy::Month;

    let report = run_fetch_cycle(&server, &cred(), &opts, &mut MemoryLedger::new()).unwrap();

    assert_eq!(ids(&report), vec!["1"]);
    assert_eq!(server.0.borrow().searches.len(), 2);
}

#[test]
fn cancelled_cycle_fails_without_marking() {
    let server = FakeServer::with_messages(vec![msg(1, d(2024, 3, 4), 8, "DAIS", false)]);
    let mut opts = options(wednesday());
    opts.cancel = Some(Arc::new(AtomicBool::new(true)));

    let err = run_fetch_cycle(&server, &cred(), &opts, &mut MemoryLedger::new()).unwrap_err();

    assert!(matches!(err, CycleError::Cancelled));
    assert!(!server.is_seen(1));
}

#[test]
fn file_ledger_records_each_id_once_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let server = FakeServer::with_messages(vec![
        msg(7, d(2024, 3, 4), 8, "DAIS", false),
        msg(8, d(2024, 3, 5), 8, "AIRS", false),
    ]);

    for _ in 0..3 {
        let mut ledger = FileLedger::open_for_account(dir.path(), &cred().username);
        run_fetch_cycle(&server, &cred(), &options(wednesday()), &mut ledger).unwrap();
    }

    let ledger = FileLedger::open_for_account(dir.path(), &cred().username);
    let contents = std::fs::read_to_string(ledger.path()).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["7", "8"]);
}

#[test]
fn blank_keywords_search_nothing_and_mark_nothing() {
    let server = FakeServer::with_messages(vec![
        msg(1, d(2024, 3, 4), 8, "Cafeteria menu", false),
        msg(2, d(2024, 3, 5), 8, "Parking notice", false),
    ]);
    let mut ledger = MemoryLedger::new();
    let opts = FetchOptions::new(wednesday(), vec!["".into(), "  ".into()]);

    let report = run_fetch_cycle(&server, &cred(), &opts, &mut ledger).unwrap();

    assert!(report.digest.is_empty());
    assert!(report.found_nothing());
    assert!(ledger.is_empty());
    let st = server.0.borrow();
    assert!(st.searches.is_empty());
    assert!(st.fetched.is_empty());
    assert!(st.marked.is_empty());
    assert!(!server.is_seen(1) && !server.is_seen(2));
    assert!(st.logged_out);
}

#[test]
fn failed_search_is_an_error_not_an_empty_digest() {
    let server = FakeServer::with_messages(vec![msg(1, d(2024, 3, 4), 8, "DAIS", false)]);
    server.0.borrow_mut().refuse_search = true;
    let mut ledger = MemoryLedger::new();
    let streamed = std::cell::Cell::new(false);

    let res = run_fetch_cycle_streaming(
        &server,
        &cred(),
        &options(wednesday()),
        &mut ledger,
        |_| streamed.set(true),
        |_| streamed.set(true),
    );

    let err = res.unwrap_err();
    assert!(matches!(err, CycleError::Protocol { .. }));
    assert!(!err.is_authentication());
    assert!(!streamed.get());
    assert!(ledger.is_empty());
    let st = server.0.borrow();
    assert_eq!(st.searches.len(), 1);
    assert!(st.marked.is_empty());
    assert!(st.logged_out);
}
