use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vouchledger::{
    config::{CliArgs, Command, Config, LoggingConfig},
    migration::{self, ImportOutcome},
    vouch::{self, Attachment, Post, VouchPolicy},
    Leaderboard, Ledger, LedgerBackend,
};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let ledger = match vouchledger::open_ledger(&config.storage) {
        Ok(ledger) => ledger,
        Err(e) => {
            tracing::error!(backend = ?config.storage.backend, error = %e, "Ledger initialization failed");
            return ExitCode::FAILURE;
        }
    };

    match run(&ledger, &config, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(ledger: &Ledger, config: &Config, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Points { user_id } => {
            println!("{} has {} vouch point(s)", user_id, ledger.get_points(user_id)?);
        }
        Command::Stats { user_id } => {
            let stats = ledger.get_stats(user_id)?;
            println!(
                "{} has {} vouch point(s) from {} vouch(es)",
                user_id, stats.points, stats.total_vouches
            );
        }
        Command::Add { user_id, delta } => {
            let points = ledger.add_points(user_id, delta)?;
            println!("{} now has {} vouch point(s)", user_id, points);
        }
        Command::Vouch { user_id, points, vouches } => {
            let stats = ledger.add_vouch(user_id, points, vouches)?;
            println!(
                "{} now has {} vouch point(s) from {} vouch(es)",
                user_id, stats.points, stats.total_vouches
            );
        }
        Command::Top { limit } => {
            let limit = limit.unwrap_or(config.vouch.leaderboard_size);
            print!("{}", Leaderboard::from(ledger.top(limit)?));
        }
        Command::Import { force } => {
            let relational = ledger
                .relational()
                .ok_or("import needs a relational backend (sqlite or postgres)")?;
            let legacy_path = &config.storage.legacy_path;
            let outcome = if force {
                migration::force_import(relational, legacy_path)?
            } else {
                migration::import_if_empty(relational, legacy_path)?
            };
            match outcome {
                ImportOutcome::Imported(report) => println!(
                    "Imported {} user(s), skipped {} entr(ies)",
                    report.imported, report.skipped
                ),
                ImportOutcome::NoLegacyData => {
                    println!("Nothing to import from {}", legacy_path.display())
                }
                ImportOutcome::AlreadyPopulated { rows } => println!(
                    "Store already holds {} user(s); pass --force to re-import",
                    rows
                ),
            }
        }
        Command::CreditPost { user, channel, bot, attachments } => {
            let post = Post {
                author_id: user,
                author_is_bot: bot,
                channel_id: channel,
                attachments: attachments.iter().map(|a| Attachment::parse(a)).collect(),
            };
            let policy = VouchPolicy::from(&config.vouch);
            match vouch::credit_post(ledger, &policy, &post)? {
                Some(stats) => println!(
                    "{} now has {} vouch point(s) from {} vouch(es)",
                    user, stats.points, stats.total_vouches
                ),
                None => println!("Post does not qualify for a vouch"),
            }
        }
    }
    Ok(())
}
