use anyhow::{Result, anyhow};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use mail_digest::auth::credential_store;
use mail_digest::config::{Config, FallbackMode, load_config, resolve_ledger_dir};
use mail_digest::daemon::{WatchConfig, run_watch};
use mail_digest::domain::email::NormalizedRecord;
use mail_digest::fetch::{CycleReport, DigestEvent, FetchOptions};
use mail_digest::mail::imap_client::ImapConnector;
use mail_digest::render::render_digest;
use mail_digest::store::ledger_file::FileLedger;
use mail_digest::{run_fetch_cycle, run_fetch_cycle_streaming};

#[derive(Parser)]
#[command(name = "mail_digest")]
#[command(about = "Weekly keyword digest of a university IMAP inbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Clone)]
struct CycleArgs {
    /// Reference date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Subject keyword; repeat to match any of several. Overrides config.
    #[arg(long = "keyword", short = 'k')]
    keywords: Vec<String>,

    /// week | month | lookback
    #[arg(long, value_parser = parse_fallback)]
    fallback: Option<FallbackMode>,

    #[arg(long)]
    lookback_weeks: Option<u32>,

    /// Leave out messages fetched by an earlier run
    #[arg(long)]
    skip_already_fetched: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cycle and print the digest
    Fetch {
        #[command(flatten)]
        cycle: CycleArgs,

        /// Write the HTML digest to this path
        #[arg(long)]
        html: Option<PathBuf>,

        /// Write the HTML digest to a temp file and open it in the browser
        #[arg(long)]
        open: bool,
    },

    /// Run one cycle and emit JSON lines, one per record, then a completion event
    Stream {
        #[command(flatten)]
        cycle: CycleArgs,

        /// Delay between records in milliseconds; overrides config
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Poll every interval and notify about new unread matches
    Watch {
        #[command(flatten)]
        cycle: CycleArgs,

        #[arg(long)]
        interval: Option<u64>,
    },

    /// Store the mailbox password in the keyring
    SetPassword {
        #[arg(long)]
        username: Option<String>,
    },
}

fn parse_fallback(s: &str) -> Result<FallbackMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "week" => Ok(FallbackMode::Week),
        "month" => Ok(FallbackMode::Month),
        "lookback" => Ok(FallbackMode::Lookback),
        other => Err(format!("unknown fallback mode {other:?}")),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;

    match cli.cmd {
        Command::SetPassword { username } => {
            let username = username
                .or(cfg.username.clone())
                .ok_or_else(|| anyhow!("username not set in config"))?;
            eprintln!("Paste password (end with Ctrl-D):");
            let mut secret = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut secret)?;
            credential_store::save_password(&username, secret.trim())?;
            println!("Saved password for {}", username);
            Ok(())
        }

        Command::Fetch { cycle, html, open } => {
            let options = cycle_options(&mut cfg, &cycle);
            let (connector, credential, mut ledger) = session_parts(&cfg)?;

            let report = match run_fetch_cycle(&connector, &credential, &options, &mut ledger) {
                Ok(r) => r,
                Err(e) => return Err(anyhow!("Could not fetch emails: {e}")),
            };
            print_report(&report);

            if report.digest.is_empty() {
                return Ok(());
            }
            let page = render_digest(&report.digest);
            if let Some(path) = html {
                std::fs::write(&path, &page)?;
                println!("Digest written to {}", path.display());
            }
            if open {
                let path = std::env::temp_dir()
                    .join(format!("mail_digest-{}.html", std::process::id()));
                std::fs::write(&path, &page)?;
                println!("Opening {}", path.display());
                open::that(&path)?;
            }
            Ok(())
        }

        Command::Stream { cycle, delay_ms } => {
            if let Some(ms) = delay_ms {
                cfg.stream_delay_ms = ms;
            }
            let options = cycle_options(&mut cfg, &cycle);
            let (connector, credential, mut ledger) = session_parts(&cfg)?;

            let stdout = std::io::stdout();
            let mut index = 0;
            let emit = |event: DigestEvent| {
                let line = match event.to_json_line() {
                    Ok(l) => l,
                    Err(e) => {
                        log::warn!("could not encode event: {e}");
                        return;
                    }
                };
                let mut out = stdout.lock();
                if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                    log::warn!("stdout closed: {e}");
                }
            };

            let result = run_fetch_cycle_streaming(
                &connector,
                &credential,
                &options,
                &mut ledger,
                |r: &NormalizedRecord| {
                    emit(DigestEvent::record(index, r));
                    index += 1;
                },
                |report: &CycleReport| emit(DigestEvent::complete(report)),
            );
            result.map_err(|e| anyhow!("Could not fetch emails: {e}"))?;
            Ok(())
        }

        Command::Watch { cycle, interval } => {
            if let Some(secs) = interval {
                cfg.poll_interval_secs = secs;
            }
            let template = cycle_options(&mut cfg, &cycle);
            let fixed_date = cycle.date;
            let (connector, credential, mut ledger) = session_parts(&cfg)?;

            run_watch(
                &connector,
                &credential,
                &mut ledger,
                || FetchOptions {
                    reference_date: fixed_date.unwrap_or_else(|| Local::now().date_naive()),
                    ..template.clone()
                },
                WatchConfig {
                    interval: cfg.poll_interval(),
                },
            )
        }
    }
}

/// Folds command-line overrides into the config and builds cycle options.
fn cycle_options(cfg: &mut Config, args: &CycleArgs) -> FetchOptions {
    if !args.keywords.is_empty() {
        cfg.keywords = args.keywords.clone();
    }
    if let Some(f) = args.fallback {
        cfg.fallback = f;
    }
    if let Some(n) = args.lookback_weeks {
        cfg.lookback_weeks = n;
    }
    if args.skip_already_fetched {
        cfg.skip_already_fetched = true;
    }

    let reference = args.date.unwrap_or_else(|| Local::now().date_naive());
    let mut options = FetchOptions::new(reference, cfg.keywords.clone());
    options.fallback = cfg.fallback_policy();
    options.skip_already_fetched = cfg.skip_already_fetched;
    options.stream_delay = cfg.stream_delay();
    options
}

fn session_parts(
    cfg: &Config,
) -> Result<(ImapConnector, mail_digest::MailboxCredential, FileLedger)> {
    let username = cfg
        .username
        .clone()
        .ok_or_else(|| anyhow!("username not set in config"))?;
    let credential = credential_store::resolve_credential(&username)?;

    let connector = ImapConnector::new(cfg.imap_server.clone(), cfg.imap_port)
        .with_timeouts(cfg.connect_timeout(), cfg.io_timeout());

    let ledger_dir = resolve_ledger_dir(cfg)?;
    let ledger = FileLedger::open_for_account(&ledger_dir, &username);
    Ok((connector, credential, ledger))
}

fn print_report(report: &CycleReport) {
    for e in &report.decode_errors {
        eprintln!("Skipped: {e}");
    }
    if report.digest.is_empty() {
        println!("No matching emails found.");
        return;
    }
    if let Some(w) = &report.window {
        println!("Window: {w}");
    }
    println!("Total Emails Filtered: {}", report.digest.len());
    for entry in report.digest.entries() {
        let label = if entry.read { "Old Email!" } else { "New Email!" };
        println!(
            "{label} ** {} | Subject: {} | {} {}",
            entry.sender, entry.subject, entry.date, entry.time
        );
        println!("-----");
    }
}
