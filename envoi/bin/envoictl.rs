//! Command-line utility for maintaining envoi's durable state
//!
//! This tool works directly on the configured stores:
//! - Session management (list, inspect, delete, prune expired sessions)
//! - Ledger inspection (totals, per-recipient history, export)
//! - Ledger reset

use std::{io::Write, path::PathBuf};

use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use envoi::{DEFAULT_RETENTION_DAYS, Envoi, find_config_file, prune_sessions};
use envoi_common::{Recipient, UnitStatus};
use envoi_store::{ResetConfirmation, SessionId, SessionSummary, Stores};

/// Command-line utility for maintaining envoi
#[derive(Parser, Debug)]
#[command(name = "envoictl")]
#[command(about = "Inspect and maintain envoi sessions and the ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to the usual lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch session management
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Deduplication ledger commands
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// List every stored session, newest first
    List,
    /// List sessions that stopped with work left
    Resumable,
    /// Show one session in detail
    Show {
        /// Session ID to show
        session_id: String,
    },
    /// Delete a session
    Delete {
        /// Session ID to delete
        session_id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete sessions older than the retention window
    Prune {
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        max_age_days: i64,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerAction {
    /// Show ledger totals
    Stats,
    /// Show what was sent to one recipient
    History {
        recipient: String,
    },
    /// Write the whole ledger to a RON file
    Export {
        file: PathBuf,
    },
    /// Forget every recorded send
    Reset {
        /// Skip typing the confirmation phrase
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let envoi = Envoi::load(&config_path)?;
    envoi.init_logging();

    let stores = envoi.open_stores().await?;

    match cli.command {
        Commands::Sessions { action } => match action {
            SessionAction::List => {
                let sessions = stores.sessions.list().await?;
                print_sessions(&sessions);
            }
            SessionAction::Resumable => {
                let sessions = stores.sessions.list_resumable().await?;
                print_sessions(&sessions);
            }
            SessionAction::Show { session_id } => cmd_show(&stores, &session_id).await?,
            SessionAction::Delete { session_id, yes } => {
                cmd_delete(&stores, &session_id, yes).await?;
            }
            SessionAction::Prune { max_age_days } => {
                let pruned = prune_sessions(
                    stores.sessions.as_ref(),
                    TimeDelta::days(max_age_days),
                    Utc::now(),
                )
                .await?;
                println!("Pruned {} session(s)", pruned.len());
            }
        },
        Commands::Ledger { action } => match action {
            LedgerAction::Stats => {
                let stats = stores.ledger.stats().await?;
                println!("Recipients: {}", stats.total_recipients);
                println!("Messages:   {}", stats.total_messages);
            }
            LedgerAction::History { recipient } => cmd_history(&stores, &recipient).await?,
            LedgerAction::Export { file } => {
                let snapshot = stores.ledger.export().await?;
                let content =
                    ron::ser::to_string_pretty(&snapshot, ron::ser::PrettyConfig::default())?;
                tokio::fs::write(&file, content).await?;
                println!(
                    "Exported {} recipient(s) to {}",
                    snapshot.stats.total_recipients,
                    file.display()
                );
            }
            LedgerAction::Reset { yes } => cmd_reset(&stores, yes).await?,
        },
    }

    Ok(())
}

fn print_sessions(sessions: &[SessionSummary]) {
    println!(
        "{:<28} {:<10} {:>9} {:>6} {:>6} {:>6} {:<6}",
        "SESSION ID", "STATE", "PROGRESS", "SENT", "FAILED", "SKIP", "AGE"
    );
    println!("{}", "-".repeat(80));

    for session in sessions {
        let progress = format!("{}/{}", session.cursor, session.total);
        println!(
            "{:<28} {:<10} {:>9} {:>6} {:>6} {:>6} {:<6}",
            session.id.to_string(),
            session.state.as_str(),
            progress,
            session.counts.succeeded,
            session.counts.failed,
            session.counts.not_attempted,
            format_age(session.age()),
        );
    }

    println!("\nTotal: {} session(s)", sessions.len());
}

fn parse_session_id(id: &str) -> anyhow::Result<SessionId> {
    id.parse()
        .map_err(|e| anyhow::anyhow!("Invalid session ID '{id}': {e}"))
}

async fn cmd_show(stores: &Stores, session_id: &str) -> anyhow::Result<()> {
    let id = parse_session_id(session_id)?;
    let record = stores.sessions.load(&id).await?;

    println!("Session ID: {}", record.id);
    println!("State:      {}", record.state);
    println!("Created:    {}", record.created_at.to_rfc3339());
    println!("Updated:    {}", record.updated_at.to_rfc3339());
    println!("Age:        {}", format_age(record.summary().age()));
    println!("Resumable:  {}", if record.is_resumable() { "yes" } else { "no" });
    println!();

    println!("Settings:");
    println!("  Batch size:  {}", record.settings.batch_size);
    println!("  Workers:     {}", record.settings.max_workers);
    println!("  Rate:        {}/s", record.settings.pacing.messages_per_second);
    println!(
        "  Batch pause: {}ms",
        record.settings.pacing.batch_pause.as_millis()
    );
    println!();

    println!("Progress: {}/{}", record.cursor, record.len());
    println!("  Sent:          {}", record.counts.succeeded);
    println!("  Failed:        {}", record.counts.failed);
    println!("  Not attempted: {}", record.counts.not_attempted);
    println!("  Pending:       {}", record.counts.pending);

    let failures: Vec<_> = record
        .units
        .iter()
        .zip(&record.statuses)
        .filter_map(|(unit, status)| match status {
            UnitStatus::FailedTerminal { attempts, kind } => Some((unit, *attempts, *kind)),
            _ => None,
        })
        .collect();

    if !failures.is_empty() {
        println!();
        println!("Failures:");
        for (unit, attempts, kind) in failures {
            println!(
                "  row {:<6} {:<20} {:<20} after {attempts} attempt(s)",
                unit.row_index(),
                unit.recipient().raw(),
                kind.as_str(),
            );
        }
    }

    Ok(())
}

/// Ask on stdin; anything but y/yes declines
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn cmd_delete(stores: &Stores, session_id: &str, skip_confirm: bool) -> anyhow::Result<()> {
    let id = parse_session_id(session_id)?;

    if !skip_confirm && !confirm(&format!("Delete session {id}?"))? {
        println!("Cancelled.");
        return Ok(());
    }

    stores.sessions.delete(&id).await?;
    println!("Session {id} deleted");

    Ok(())
}

async fn cmd_history(stores: &Stores, recipient: &str) -> anyhow::Result<()> {
    let recipient = Recipient::new(recipient);

    let Some(entry) = stores.ledger.history(&recipient).await? else {
        println!("Nothing has been sent to {}", recipient.raw());
        return Ok(());
    };

    println!("Recipient:  {}", recipient.normalized());
    println!("Messages:   {}", entry.total_sent);
    println!("Last sent:  {}", entry.last_sent.to_rfc3339());
    println!("Fingerprints:");
    for fingerprint in &entry.fingerprints {
        println!("  - {}", fingerprint.as_str());
    }

    Ok(())
}

async fn cmd_reset(stores: &Stores, skip_confirm: bool) -> anyhow::Result<()> {
    let phrase = if skip_confirm {
        ResetConfirmation::PHRASE.to_owned()
    } else {
        print!(
            "This forgets every recorded send. Type '{}' to confirm: ",
            ResetConfirmation::PHRASE
        );
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        input.trim().to_owned()
    };

    let Ok(confirmation) = ResetConfirmation::new(&phrase) else {
        println!("Cancelled.");
        return Ok(());
    };

    stores.ledger.reset(confirmation).await?;
    println!("Ledger reset");

    Ok(())
}

fn format_age(age: TimeDelta) -> String {
    let age_secs = age.num_seconds().max(0);

    if age_secs < 60 {
        format!("{age_secs}s")
    } else if age_secs < 3600 {
        format!("{}m", age_secs / 60)
    } else if age_secs < 86400 {
        format!("{}h", age_secs / 3600)
    } else {
        format!("{}d", age_secs / 86400)
    }
}
