use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::email::ServerId;

pub const DEFAULT_LOOKBACK_WEEKS: u32 = 4;

/// How to widen the search when the current week has no matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Current week only.
    Week,
    /// Current week, then the whole current month once.
    Month,
    /// Current week, then each completed week before it, newest first.
    Lookback { max_weeks: u32 },
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Lookback {
            max_weeks: DEFAULT_LOOKBACK_WEEKS,
        }
    }
}

/// One search attempt: `[start, end)` plus the subject keywords (any may match).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchWindow {
    start: NaiveDate,
    end: NaiveDate,
    keywords: Vec<String>,
}

impl SearchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, keywords: &[String]) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            start,
            end,
            keywords,
        }
    }

    /// Monday 00:00 of the reference week up to the following Monday.
    pub fn week_of(reference: NaiveDate, keywords: &[String]) -> Self {
        let start = monday_of(reference);
        Self::new(start, start + Days::new(7), keywords)
    }

    /// First day of the reference month up to the first day of the next.
    pub fn month_of(reference: NaiveDate, keywords: &[String]) -> Self {
        let start = reference - Days::new(u64::from(reference.day0()));
        let end = start
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        Self::new(start, end, keywords)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// IMAP SEARCH criteria. `SINCE` is inclusive and `BEFORE` exclusive,
    /// matching the window bounds.
    pub fn to_imap_query(&self) -> String {
        let dates = format!(
            "SINCE {} BEFORE {}",
            imap_date(self.start),
            imap_date(self.end)
        );

        let terms: Vec<String> = self
            .keywords
            .iter()
            .map(|k| format!("(SUBJECT {})", quote(k)))
            .collect();

        let query = match or_chain(&terms) {
            Some(pred) => format!("{pred} {dates}"),
            None => dates,
        };

        if self.keywords.iter().any(|k| !k.is_ascii()) {
            format!("CHARSET UTF-8 {query}")
        } else {
            query
        }
    }
}

impl std::fmt::Display for SearchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn imap_date(d: NaiveDate) -> String {
    d.format("%d-%b-%Y").to_string()
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// IMAP `OR` is binary, so N terms become a right-nested chain.
fn or_chain(terms: &[String]) -> Option<String> {
    match terms {
        [] => None,
        [only] => Some(only.clone()),
        [first, rest @ ..] => Some(format!("(OR {first} {})", or_chain(rest)?)),
    }
}

/// Every window to try for `reference`, in order. The first is always the
/// primary week.
pub fn candidate_windows(
    reference: NaiveDate,
    keywords: &[String],
    policy: FallbackPolicy,
) -> Vec<SearchWindow> {
    let primary = SearchWindow::week_of(reference, keywords);
    let mut out = vec![primary.clone()];

    match policy {
        FallbackPolicy::Week => {}
        FallbackPolicy::Month => out.push(SearchWindow::month_of(reference, keywords)),
        FallbackPolicy::Lookback { max_weeks } => {
            // week 1 ends on the most recently completed Sunday
            for k in 1..=u64::from(max_weeks) {
                let Some(start) = primary.start.checked_sub_days(Days::new(7 * k)) else {
                    break;
                };
                out.push(SearchWindow::new(start, start + Days::new(7), keywords));
            }
        }
    }
    out
}

/// Runs `search` over the windows in order and stops at the first window
/// with at least one match. `Ok(None)` means every window came back empty.
pub fn find_first_match<E>(
    windows: Vec<SearchWindow>,
    mut search: impl FnMut(&SearchWindow) -> Result<Vec<ServerId>, E>,
) -> Result<Option<(SearchWindow, Vec<ServerId>)>, E> {
    for (attempt, window) in windows.into_iter().enumerate() {
        let ids = search(&window)?;
        log::info!(
            "search attempt {} over {}: {} match(es)",
            attempt,
            window,
            ids.len()
        );
        if !ids.is_empty() {
            return Ok(Some((window, ids)));
        }
    }
    Ok(None)
}
