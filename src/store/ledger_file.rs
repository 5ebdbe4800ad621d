use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;
use crate::store::repo::DedupLedger;

const FILE_PREFIX: &str = "fetched_uids";

/// Append-only text file, one id per line, loaded once into a set.
///
/// IO failures never abort a cycle: an unreadable file yields an empty,
/// read-only ledger, and a failed append leaves the id recorded in memory.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    ids: HashSet<String>,
    writable: bool,
}

impl FileLedger {
    /// Strict open; callers that want the degrade behaviour use [`FileLedger::open`].
    pub fn try_open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ids = match fs::read_to_string(&path) {
            Ok(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(source) => {
                return Err(LedgerError {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(Self {
            path,
            ids,
            writable: true,
        })
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_open(&path) {
            Ok(l) => {
                log::debug!("ledger {} holds {} id(s)", path.display(), l.ids.len());
                l
            }
            Err(e) => {
                log::warn!("{e}; continuing with an empty, read-only ledger");
                Self {
                    path,
                    ids: HashSet::new(),
                    writable: false,
                }
            }
        }
    }

    /// One file per account so concurrent cycles for different users never share state.
    pub fn open_for_account(dir: &Path, username: &str) -> Self {
        Self::open(dir.join(ledger_file_name(username)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, id: &str) -> Result<(), LedgerError> {
        let wrap = |source| LedgerError {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(wrap)?;
        writeln!(f, "{id}").and_then(|_| f.flush()).map_err(wrap)
    }
}

impl DedupLedger for FileLedger {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn record(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        if self.writable
            && let Err(e) = self.append(id)
        {
            log::warn!("{e}; further ids stay in memory only");
            self.writable = false;
        }
        true
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub fn ledger_file_name(username: &str) -> String {
    let safe: String = username
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{FILE_PREFIX}-{safe}.txt")
}
