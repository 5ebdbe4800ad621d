//! Weekly keyword digest of a university IMAP inbox.
//!
//! One fetch cycle logs in, searches the current week (widening per
//! [`mail::search::FallbackPolicy`]), normalizes every match, records ids in a
//! per-account ledger, marks the messages seen and hands back a
//! [`domain::digest::Digest`], unread first and newest first.

pub mod auth;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod mail;
pub mod render;
pub mod store;

pub use domain::digest::{Digest, DigestEntry};
pub use domain::email::{MailboxCredential, NormalizedRecord, RawMessage, ServerId};
pub use error::{CycleError, DecodeError};
pub use fetch::{CycleReport, FetchOptions, run_fetch_cycle, run_fetch_cycle_streaming};
