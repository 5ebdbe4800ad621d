pub mod notifier;

use anyhow::Result;
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::domain::email::MailboxCredential;
use crate::fetch::{FetchOptions, run_fetch_cycle};
use crate::mail::session::MailboxConnector;
use crate::store::repo::DedupLedger;

use crate::daemon::notifier::Notifier;

const SLEEP_STEP: Duration = Duration::from_millis(250);

pub struct WatchConfig {
    pub interval: Duration,
}

/// Runs a fetch cycle every `interval` until Ctrl-C. `make_options` is called
/// per cycle so the reference date follows the clock.
///
/// Unread records whose id is new to the ledger raise a desktop notification.
/// An authentication failure stops the loop; other failures wait for the
/// next tick.
pub fn run_watch(
    connector: &dyn MailboxConnector,
    credential: &MailboxCredential,
    ledger: &mut dyn DedupLedger,
    make_options: impl Fn() -> FetchOptions,
    cfg: WatchConfig,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let cancel = Arc::new(AtomicBool::new(false));
    let (r2, c2) = (running.clone(), cancel.clone());
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
        c2.store(true, Ordering::SeqCst);
    })?;

    let notifier = Notifier::new();

    while running.load(Ordering::SeqCst) {
        let mut options = make_options();
        options.cancel = Some(cancel.clone());

        match run_fetch_cycle(connector, credential, &options, ledger) {
            Ok(report) => {
                let fresh = report
                    .digest
                    .records()
                    .iter()
                    .filter(|r| !r.read && report.newly_recorded.contains(&r.server_id));
                let mut notified = 0;
                for r in fresh {
                    notifier.notify_email(r)?;
                    notified += 1;
                }
                log::info!(
                    "cycle done: {} record(s), {} notified",
                    report.digest.len(),
                    notified
                );
            }
            Err(e) if e.is_authentication() => return Err(e.into()),
            Err(e) => log::warn!("cycle failed, retrying next tick: {e}"),
        }

        let deadline = Instant::now() + cfg.interval;
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(SLEEP_STEP);
        }
    }

    log::info!("watch stopped");
    Ok(())
}
